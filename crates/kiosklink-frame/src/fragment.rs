use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Fragment header: frame id (4) + total fragments (2) + fragment index (2).
pub const FRAGMENT_HEADER_SIZE: usize = 8;

/// Packet size the remote device fragments with unless configured otherwise.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4096;

/// Header carried at the front of every video datagram.
///
/// ```text
/// ┌──────────────┬──────────────┬──────────────┬──────────────────┐
/// │ Frame id     │ Total        │ Index        │ Fragment bytes    │
/// │ (4B BE)      │ (2B BE)      │ (2B BE)      │ (rest of datagram)│
/// └──────────────┴──────────────┴──────────────┴──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_id: u32,
    pub total_fragments: u16,
    pub fragment_index: u16,
}

impl FragmentHeader {
    /// Split a datagram into its header and fragment bytes.
    ///
    /// Datagrams no longer than the header carry no fragment bytes and are
    /// rejected, as are headers announcing zero fragments. The index is not
    /// range-checked here: a reassembler checks it against the total recorded
    /// for the frame, which may differ from a corrupt header's total.
    pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8])> {
        if datagram.len() <= FRAGMENT_HEADER_SIZE {
            return Err(FrameError::TooShort {
                len: datagram.len(),
                header: FRAGMENT_HEADER_SIZE,
            });
        }

        let header = Self {
            frame_id: u32::from_be_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]),
            total_fragments: u16::from_be_bytes([datagram[4], datagram[5]]),
            fragment_index: u16::from_be_bytes([datagram[6], datagram[7]]),
        };

        if header.total_fragments == 0 {
            return Err(FrameError::ZeroFragments);
        }

        Ok((header, &datagram[FRAGMENT_HEADER_SIZE..]))
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(FRAGMENT_HEADER_SIZE);
        dst.put_u32(self.frame_id);
        dst.put_u16(self.total_fragments);
        dst.put_u16(self.fragment_index);
    }
}

/// Split an encoded frame into datagrams of at most `max_packet_size` bytes,
/// header included, in index order.
///
/// This is the sending side of the datagram transport, used to drive the
/// reassembler from tests and loopback tooling.
pub fn fragment_payload(frame_id: u32, payload: &[u8], max_packet_size: usize) -> Result<Vec<Bytes>> {
    if payload.is_empty() {
        return Err(FrameError::EmptyPayload);
    }
    if max_packet_size <= FRAGMENT_HEADER_SIZE {
        return Err(FrameError::PacketTooSmall {
            size: max_packet_size,
            header: FRAGMENT_HEADER_SIZE,
        });
    }

    let chunk_size = max_packet_size - FRAGMENT_HEADER_SIZE;
    let count = payload.len().div_ceil(chunk_size);
    let total = u16::try_from(count).map_err(|_| FrameError::TooManyFragments {
        count,
        max: u16::MAX as usize,
    })?;

    let datagrams = payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, chunk)| {
            let mut datagram = BytesMut::with_capacity(FRAGMENT_HEADER_SIZE + chunk.len());
            FragmentHeader {
                frame_id,
                total_fragments: total,
                fragment_index: index as u16,
            }
            .encode(&mut datagram);
            datagram.put_slice(chunk);
            datagram.freeze()
        })
        .collect();

    Ok(datagrams)
}
