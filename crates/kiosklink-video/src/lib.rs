//! Video frame sources for kiosklink.
//!
//! The host picks one transport at construction through [`VideoConfig`] and
//! drives it through the [`VideoSource`] trait:
//! - [`DatagramSource`]: binds a UDP port and reassembles fragmented frames
//! - [`StreamSource`]: reads length-prefixed frames from a TCP endpoint
//!
//! Either way, the registered [`FrameHandler`] receives one complete encoded
//! frame per call, on the source's own worker thread.

pub mod datagram;
pub mod error;
pub mod reassembly;
pub mod source;
pub mod stream;

pub use datagram::{DatagramConfig, DatagramSource};
pub use error::{Result, VideoError};
pub use kiosklink_frame::Frame;
pub use reassembly::{DropReason, FrameAssemblyBuffer, Ingest, Reassembler, DEFAULT_MAX_PENDING_FRAMES};
pub use source::{FrameHandler, VideoConfig, VideoSource};
pub use stream::{StreamConfig, StreamSource};
