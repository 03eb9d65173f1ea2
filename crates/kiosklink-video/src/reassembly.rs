use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use kiosklink_frame::{Frame, FrameError, FragmentHeader};

/// Partial frames tracked at once before the stalest is evicted.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 256;

/// Fragments received so far for one frame id.
#[derive(Debug)]
pub struct FrameAssemblyBuffer {
    frame_id: u32,
    total_fragments: u16,
    fragments: Vec<Option<Bytes>>,
    received_count: u16,
    last_seen: Instant,
}

impl FrameAssemblyBuffer {
    fn new(frame_id: u32, total_fragments: u16, now: Instant) -> Self {
        Self {
            frame_id,
            total_fragments,
            fragments: vec![None; usize::from(total_fragments)],
            received_count: 0,
            last_seen: now,
        }
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub fn total_fragments(&self) -> u16 {
        self.total_fragments
    }

    pub fn received_count(&self) -> u16 {
        self.received_count
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn is_complete(&self) -> bool {
        self.received_count == self.total_fragments
    }

    /// Whether the fragment at `index` has arrived.
    pub fn has_fragment(&self, index: u16) -> bool {
        self.fragments
            .get(usize::from(index))
            .is_some_and(Option::is_some)
    }

    /// Store a fragment. Returns `false` if the slot was already filled; the
    /// first copy is kept.
    fn insert(&mut self, index: u16, chunk: &[u8], now: Instant) -> bool {
        let Some(slot) = self.fragments.get_mut(usize::from(index)) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(Bytes::copy_from_slice(chunk));
        self.received_count += 1;
        self.last_seen = now;
        true
    }

    fn assemble(self) -> Frame {
        let size = self.fragments.iter().flatten().map(Bytes::len).sum();
        let mut payload = BytesMut::with_capacity(size);
        for chunk in self.fragments.into_iter().flatten() {
            payload.extend_from_slice(&chunk);
        }
        Frame::new(payload.freeze())
    }
}

/// Why a datagram contributed nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No bytes beyond the header.
    TooShort { len: usize },
    /// Header announced zero fragments.
    ZeroFragments { frame_id: u32 },
    /// Index outside the total recorded for the frame.
    IndexOutOfRange { frame_id: u32, index: u16, total: u16 },
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::TooShort { len } => write!(f, "datagram too short ({len} bytes)"),
            DropReason::ZeroFragments { frame_id } => {
                write!(f, "frame {frame_id} announces zero fragments")
            }
            DropReason::IndexOutOfRange {
                frame_id,
                index,
                total,
            } => write!(f, "frame {frame_id} fragment {index} outside 0..{total}"),
        }
    }
}

/// Outcome of feeding one datagram to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// The datagram completed its frame.
    Complete { frame_id: u32, frame: Frame },
    /// Stored; the frame is still missing fragments.
    Pending {
        frame_id: u32,
        received: u16,
        total: u16,
    },
    /// The fragment's slot was already filled; ignored.
    Duplicate { frame_id: u32, index: u16 },
    /// Malformed; ignored.
    Dropped(DropReason),
}

/// Rebuilds frames from fragments that may arrive out of order, duplicated,
/// or not at all.
///
/// Pure state: the caller supplies the clock, guards it with a lock, and
/// delivers completed frames after releasing that lock.
///
/// Completed frame ids are remembered until the next sweep finds them older
/// than the fragment timeout, so stragglers cannot deliver a frame twice.
#[derive(Debug)]
pub struct Reassembler {
    buffers: HashMap<u32, FrameAssemblyBuffer>,
    completed: HashMap<u32, Instant>,
    max_pending: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING_FRAMES)
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            completed: HashMap::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Feed one raw datagram, header included.
    pub fn ingest(&mut self, datagram: &[u8], now: Instant) -> Ingest {
        match FragmentHeader::parse(datagram) {
            Ok((header, chunk)) => self.ingest_fragment(header, chunk, now),
            Err(FrameError::ZeroFragments) => {
                let frame_id = u32::from_be_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
                Ingest::Dropped(DropReason::ZeroFragments { frame_id })
            }
            Err(_) => Ingest::Dropped(DropReason::TooShort {
                len: datagram.len(),
            }),
        }
    }

    /// Feed one parsed fragment.
    ///
    /// A fragment for an unseen frame id opens a buffer sized by its header;
    /// later fragments are checked against that recorded total.
    pub fn ingest_fragment(&mut self, header: FragmentHeader, chunk: &[u8], now: Instant) -> Ingest {
        let FragmentHeader {
            frame_id,
            total_fragments,
            fragment_index,
        } = header;

        if total_fragments == 0 {
            return Ingest::Dropped(DropReason::ZeroFragments { frame_id });
        }

        if self.completed.contains_key(&frame_id) {
            return Ingest::Duplicate {
                frame_id,
                index: fragment_index,
            };
        }

        if !self.buffers.contains_key(&frame_id) {
            if fragment_index >= total_fragments {
                return Ingest::Dropped(DropReason::IndexOutOfRange {
                    frame_id,
                    index: fragment_index,
                    total: total_fragments,
                });
            }
            if self.buffers.len() >= self.max_pending {
                self.evict_stalest();
            }
        }

        let mut entry = match self.buffers.entry(frame_id) {
            Entry::Occupied(entry) => entry,
            Entry::Vacant(entry) => {
                entry.insert_entry(FrameAssemblyBuffer::new(frame_id, total_fragments, now))
            }
        };
        let buffer = entry.get_mut();

        if fragment_index >= buffer.total_fragments {
            return Ingest::Dropped(DropReason::IndexOutOfRange {
                frame_id,
                index: fragment_index,
                total: buffer.total_fragments,
            });
        }

        if !buffer.insert(fragment_index, chunk, now) {
            return Ingest::Duplicate {
                frame_id,
                index: fragment_index,
            };
        }

        if !buffer.is_complete() {
            return Ingest::Pending {
                frame_id,
                received: buffer.received_count,
                total: buffer.total_fragments,
            };
        }

        let frame = entry.remove().assemble();
        self.remember_completed(frame_id, now);
        Ingest::Complete { frame_id, frame }
    }

    /// Drop every partial frame not touched for longer than `timeout`.
    /// Returns the evicted frame ids.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<u32> {
        let expired: Vec<u32> = self
            .buffers
            .values()
            .filter(|buffer| now.saturating_duration_since(buffer.last_seen) > timeout)
            .map(|buffer| buffer.frame_id)
            .collect();
        for frame_id in &expired {
            self.buffers.remove(frame_id);
        }
        self.completed
            .retain(|_, completed_at| now.saturating_duration_since(*completed_at) <= timeout);
        expired
    }

    fn remember_completed(&mut self, frame_id: u32, now: Instant) {
        if self.completed.len() >= self.max_pending {
            let oldest = self
                .completed
                .iter()
                .min_by_key(|(_, completed_at)| **completed_at)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                self.completed.remove(&oldest);
            }
        }
        self.completed.insert(frame_id, now);
    }

    fn evict_stalest(&mut self) {
        let stalest = self
            .buffers
            .values()
            .min_by_key(|buffer| buffer.last_seen)
            .map(|buffer| buffer.frame_id);
        if let Some(frame_id) = stalest {
            self.buffers.remove(&frame_id);
            tracing::debug!(frame_id, "partial frame table full; evicted stalest frame");
        }
    }

    pub fn contains(&self, frame_id: u32) -> bool {
        self.buffers.contains_key(&frame_id)
    }

    pub fn get(&self, frame_id: u32) -> Option<&FrameAssemblyBuffer> {
        self.buffers.get(&frame_id)
    }

    /// Number of partial frames held.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
        self.completed.clear();
    }
}
