//! Wire codecs for the kiosklink protocol engine.
//!
//! Three framings travel between the kiosk and the remote device:
//! - Control lines: UTF-8 text terminated by `\n`
//! - Stream video records: a 4-byte big-endian length followed by the payload
//! - Datagram video fragments: an 8-byte big-endian header
//!   (`frame_id: u32`, `total_fragments: u16`, `fragment_index: u16`)
//!   followed by the fragment bytes
//!
//! Complete video frames are handed out as [`Frame`] values; the codecs never
//! look inside the encoded image.

pub mod codec;
pub mod error;
pub mod fragment;
pub mod line;
pub mod reader;

pub use codec::{
    decode_record, encode_record, Frame, RecordConfig, DEFAULT_MAX_RECORD, RECORD_HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use fragment::{
    fragment_payload, FragmentHeader, DEFAULT_MAX_PACKET_SIZE, FRAGMENT_HEADER_SIZE,
};
pub use line::{encode_line, LineBuffer, DEFAULT_MAX_LINE, LINE_DELIMITER};
pub use reader::{LineReader, RecordReader};
