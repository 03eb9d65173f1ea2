//! Socket plumbing for the kiosklink protocol engine.
//!
//! Provides the two socket kinds the engine talks over:
//! - [`LinkStream`]: a connected TCP stream (control channel, stream video)
//! - [`DatagramSocket`]: a bound UDP socket (fragmented datagram video)
//!
//! plus [`StopSignal`], the cooperative cancellation flag every long-running
//! worker observes between blocking calls, and [`panic_message`] for logging
//! host callbacks that panic on those workers.
//!
//! This is the lowest layer of kiosklink. Everything else builds on top of it.

pub mod datagram;
pub mod error;
pub mod signal;
pub mod state;
pub mod stream;
pub mod worker;

pub use datagram::{DatagramSocket, MAX_DATAGRAM_SIZE};
pub use error::{Result, TransportError};
pub use signal::StopSignal;
pub use state::ConnectionState;
pub use stream::{is_broken_pipe, is_timeout, LinkStream};
pub use worker::panic_message;
