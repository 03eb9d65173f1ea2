//! Protocol engine for a kiosk client talking to a remote capture device.
//!
//! kiosklink keeps one reconnecting control connection to the device,
//! correlates commands with their responses, and receives encoded video
//! frames over either a fragmented datagram transport or a length-prefixed
//! stream transport.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP/UDP socket wrappers and the shared stop signal
//! - [`frame`]: line, record, and fragment codecs
//! - [`control`]: control channel and command dispatcher
//! - [`video`]: the `VideoSource` trait and both video transports
//! - [`Client`]: composes all of the above behind one connect-and-register
//!   supervisor
//! - [`KioskConfig`]: JSON host configuration

pub mod client;
pub mod config;

pub use client::{Client, ClientConfig, ClientError, EventHandler};
pub use config::{ConfigError, KioskConfig, TransportKind};

/// Re-export transport types.
pub mod transport {
    pub use kiosklink_transport::*;
}

/// Re-export frame codecs.
pub mod frame {
    pub use kiosklink_frame::*;
}

/// Re-export control-plane types.
pub mod control {
    pub use kiosklink_control::*;
}

/// Re-export video sources.
pub mod video {
    pub use kiosklink_video::*;
}
