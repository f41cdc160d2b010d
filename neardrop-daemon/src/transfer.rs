//! Shared transfer-job plumbing: the single-job guard, the failure
//! taxonomy, and header I/O on the connection.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use neardrop_core::protocol::HeaderValidationError;
use neardrop_core::wire::{self, HeaderDecodeError, HeaderEncodeError};
use neardrop_core::TransferHeader;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Handle to the at-most-one in-flight transfer job. Completion clears the
/// slot; aborting the handle drops the job's socket and file handles, which
/// is the cancellation mechanism.
pub type JobSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Abort the active job, if any, and clear the slot.
pub async fn cancel_job(slot: &JobSlot) {
    if let Some(job) = slot.lock().await.take() {
        job.abort();
    }
}

/// Why a transfer job failed. Converted into exactly one `Failed` emission
/// at the job boundary; nothing propagates past it.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("no inbound connection within {}s", .0.as_secs())]
    AcceptTimeout(Duration),
    #[error("connect to {0} timed out")]
    ConnectTimeout(SocketAddr),
    #[error("malformed transfer header: {0}")]
    Header(#[from] HeaderDecodeError),
    #[error("rejected transfer header: {0}")]
    InvalidHeader(#[from] HeaderValidationError),
    #[error("encoding transfer header: {0}")]
    EncodeHeader(#[from] HeaderEncodeError),
    #[error("file name for {0} could not be resolved")]
    SourceName(PathBuf),
    #[error("source {path} could not be opened: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Read the single header frame off the front of the connection. Anything
/// other than a well-formed, schema-valid header is a protocol violation.
pub async fn read_header<R>(stream: &mut R) -> Result<TransferHeader, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; wire::LEN_SIZE];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > wire::MAX_HEADER_LEN {
        return Err(HeaderDecodeError::TooLarge.into());
    }
    let mut frame = vec![0u8; wire::LEN_SIZE + len as usize];
    frame[..wire::LEN_SIZE].copy_from_slice(&len_buf);
    stream.read_exact(&mut frame[wire::LEN_SIZE..]).await?;
    let (header, _) = wire::decode_header(&frame)?;
    header.validate()?;
    Ok(header)
}

/// Write the header frame; payload bytes follow it on the same stream.
pub async fn write_header<W>(stream: &mut W, header: &TransferHeader) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    let frame = wire::encode_header(header)?;
    stream.write_all(&frame).await?;
    Ok(())
}
