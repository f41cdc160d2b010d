//! Transfer protocol: header record and fixed protocol constants.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Well-known TCP port shared by sender and listener.
pub const TRANSFER_PORT: u16 = 1995;

/// How long the listener waits for its single inbound connection.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the sender waits for the outbound connection to complete.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffer size for the payload copy loops on both sides.
pub const COPY_BUFFER_LEN: usize = 100 * 1024;

/// Buffer size for staging the outgoing file into the cache.
pub const STAGING_BUFFER_LEN: usize = 1024;

/// Metadata exchanged before payload bytes. Must be the first object
/// deserialized from a freshly accepted connection; anything else is a
/// protocol violation. Everything after the header, until stream closure,
/// is the raw file payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHeader {
    pub file_name: String,
}

impl TransferHeader {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Field-by-field schema check applied on receipt. The receiver writes
    /// `file_name` verbatim into its cache subdirectory, so any name that
    /// could escape it is rejected as a protocol violation.
    pub fn validate(&self) -> Result<(), HeaderValidationError> {
        if self.file_name.is_empty() {
            return Err(HeaderValidationError::EmptyName);
        }
        if self.file_name.contains(['/', '\\']) {
            return Err(HeaderValidationError::PathSeparator);
        }
        if self.file_name == "." || self.file_name == ".." {
            return Err(HeaderValidationError::Traversal);
        }
        if self.file_name.contains('\0') {
            return Err(HeaderValidationError::Nul);
        }
        Ok(())
    }
}

/// A header that decoded cleanly but does not fit the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderValidationError {
    #[error("empty file name")]
    EmptyName,
    #[error("file name contains a path separator")]
    PathSeparator,
    #[error("file name is a directory reference")]
    Traversal,
    #[error("file name contains a NUL byte")]
    Nul,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(TransferHeader::new("photo.jpg").validate().is_ok());
        assert!(TransferHeader::new("42_photo.jpg").validate().is_ok());
        assert!(TransferHeader::new("..hidden").validate().is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(
            TransferHeader::new("").validate(),
            Err(HeaderValidationError::EmptyName)
        );
    }

    #[test]
    fn rejects_separators() {
        assert_eq!(
            TransferHeader::new("a/b").validate(),
            Err(HeaderValidationError::PathSeparator)
        );
        assert_eq!(
            TransferHeader::new("..\\b").validate(),
            Err(HeaderValidationError::PathSeparator)
        );
        assert_eq!(
            TransferHeader::new("/etc/passwd").validate(),
            Err(HeaderValidationError::PathSeparator)
        );
    }

    #[test]
    fn rejects_directory_references() {
        assert_eq!(
            TransferHeader::new("..").validate(),
            Err(HeaderValidationError::Traversal)
        );
        assert_eq!(
            TransferHeader::new(".").validate(),
            Err(HeaderValidationError::Traversal)
        );
    }

    #[test]
    fn rejects_nul() {
        assert_eq!(
            TransferHeader::new("a\0b").validate(),
            Err(HeaderValidationError::Nul)
        );
    }
}
