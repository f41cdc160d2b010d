//! Header framing: length-prefix (4 bytes LE) + bincode payload.

use crate::protocol::TransferHeader;

pub const LEN_SIZE: usize = 4;
pub const MAX_HEADER_LEN: u32 = 64 * 1024; // 64 KiB

/// Encode the transfer header into a single frame: 4 bytes LE length +
/// bincode payload.
pub fn encode_header(header: &TransferHeader) -> Result<Vec<u8>, HeaderEncodeError> {
    let payload = bincode::serialize(header).map_err(HeaderEncodeError::Encode)?;
    let len = payload.len() as u32;
    if len > MAX_HEADER_LEN {
        return Err(HeaderEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding the header into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum HeaderEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("header frame too large")]
    TooLarge,
}

/// Decode one header frame from the front of `bytes`. Returns the header and
/// the number of bytes consumed; anything after the consumed prefix is
/// payload and is left untouched.
pub fn decode_header(bytes: &[u8]) -> Result<(TransferHeader, usize), HeaderDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(HeaderDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_HEADER_LEN as usize {
        return Err(HeaderDecodeError::TooLarge);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(HeaderDecodeError::NeedMore);
    }
    let header: TransferHeader = bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len])
        .map_err(HeaderDecodeError::Decode)?;
    Ok((header, LEN_SIZE + len))
}

/// Error decoding a header frame (need more bytes, too large, or bincode
/// failure). Anything other than `NeedMore` on a live connection is a
/// protocol violation.
#[derive(Debug, thiserror::Error)]
pub enum HeaderDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("header frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let header = TransferHeader::new("photo.jpg");
        let frame = encode_header(&header).unwrap();
        let (decoded, n) = decode_header(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(decoded, header);
    }

    #[test]
    fn partial_read_need_more() {
        let frame = encode_header(&TransferHeader::new("photo.jpg")).unwrap();
        assert!(matches!(
            decode_header(&frame[..2]),
            Err(HeaderDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_header(&frame[..LEN_SIZE]),
            Err(HeaderDecodeError::NeedMore)
        ));
    }

    #[test]
    fn payload_after_header_left_untouched() {
        let mut buf = encode_header(&TransferHeader::new("notes.txt")).unwrap();
        let frame_len = buf.len();
        buf.extend_from_slice(b"raw payload bytes");
        let (decoded, n) = decode_header(&buf).unwrap();
        assert_eq!(decoded.file_name, "notes.txt");
        assert_eq!(n, frame_len);
        assert_eq!(&buf[n..], b"raw payload bytes");
    }

    #[test]
    fn oversize_length_rejected() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(MAX_HEADER_LEN + 1).to_le_bytes());
        frame.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            decode_header(&frame),
            Err(HeaderDecodeError::TooLarge)
        ));
    }

    #[test]
    fn garbage_payload_rejected() {
        // Claimed string length far beyond the frame's actual payload.
        let mut frame = Vec::new();
        frame.extend_from_slice(&8u32.to_le_bytes());
        frame.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            decode_header(&frame),
            Err(HeaderDecodeError::Decode(_))
        ));
    }
}
