use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Record header: big-endian payload length (4 bytes).
pub const RECORD_HEADER_SIZE: usize = 4;

/// Default maximum record payload size: 16 MiB.
pub const DEFAULT_MAX_RECORD: usize = 16 * 1024 * 1024;

/// One complete encoded video frame (opaque bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Bytes,
}

impl Frame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Encode one stream video record.
///
/// Wire format:
/// ```text
/// ┌──────────────┬─────────────────┐
/// │ Length       │ Payload          │
/// │ (4B BE)      │ (Length bytes)   │
/// └──────────────┴─────────────────┘
/// ```
pub fn encode_record(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::RecordTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(RECORD_HEADER_SIZE + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one stream video record from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete record yet.
/// On success, consumes the record bytes from the buffer.
pub fn decode_record(src: &mut BytesMut, max_record: usize) -> Result<Option<Frame>> {
    if src.len() < RECORD_HEADER_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len > max_record {
        return Err(FrameError::RecordTooLarge {
            size: len,
            max: max_record,
        });
    }

    let total = RECORD_HEADER_SIZE + len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(RECORD_HEADER_SIZE);
    let bytes = src.split_to(len).freeze();

    Ok(Some(Frame { bytes }))
}

/// Configuration for the stream record reader.
#[derive(Debug, Clone)]
pub struct RecordConfig {
    /// Maximum record payload size in bytes. Default: 16 MiB.
    pub max_record_size: usize,
    /// Read timeout applied to the socket so the reader can poll its stop signal.
    pub read_timeout: Option<std::time::Duration>,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            max_record_size: DEFAULT_MAX_RECORD,
            read_timeout: Some(std::time::Duration::from_millis(500)),
        }
    }
}
