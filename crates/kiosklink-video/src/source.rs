use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use kiosklink_frame::Frame;
use kiosklink_transport::panic_message;
use parking_lot::RwLock;
use tracing::error;

use crate::datagram::{DatagramConfig, DatagramSource};
use crate::error::Result;
use crate::stream::{StreamConfig, StreamSource};

/// Receives each complete encoded frame, on the source's worker thread.
pub type FrameHandler = Arc<dyn Fn(Frame) + Send + Sync + 'static>;

/// A video transport the host drives without knowing which one it is.
pub trait VideoSource: Send + Sync {
    /// Bind or connect and start delivering frames.
    fn start(&self) -> Result<()>;

    /// Stop delivering frames and release the socket. Idempotent.
    fn stop(&self);

    /// Replace the frame handler. Takes effect for the next delivered frame.
    fn set_frame_handler(&self, handler: FrameHandler);

    fn is_running(&self) -> bool;

    /// Local port the device must be told to push video to, if any.
    fn registration_port(&self) -> Option<u16> {
        None
    }

    /// Short transport name for logs and output.
    fn transport_name(&self) -> &'static str;
}

/// Which video transport to build.
#[derive(Debug, Clone)]
pub enum VideoConfig {
    Datagram(DatagramConfig),
    Stream(StreamConfig),
}

impl VideoConfig {
    pub fn transport_name(&self) -> &'static str {
        match self {
            VideoConfig::Datagram(_) => "udp",
            VideoConfig::Stream(_) => "tcp",
        }
    }

    /// Construct the configured source. Nothing is bound or connected until
    /// [`VideoSource::start`].
    pub fn into_source(self) -> Arc<dyn VideoSource> {
        match self {
            VideoConfig::Datagram(config) => Arc::new(DatagramSource::new(config)),
            VideoConfig::Stream(config) => Arc::new(StreamSource::new(config)),
        }
    }
}

/// Handler slot shared between a source and its workers.
#[derive(Clone, Default)]
pub(crate) struct HandlerSlot(Arc<RwLock<Option<FrameHandler>>>);

impl HandlerSlot {
    pub(crate) fn set(&self, handler: FrameHandler) {
        *self.0.write() = Some(handler);
    }

    /// Hand `frame` to the current handler, outside any lock. A panicking
    /// handler is logged and the worker carries on.
    pub(crate) fn deliver(&self, transport: &'static str, frame: Frame) {
        let handler = self.0.read().clone();
        let Some(handler) = handler else {
            tracing::trace!(transport, len = frame.len(), "no frame handler; frame dropped");
            return;
        };
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| handler(frame))) {
            error!(
                transport,
                panic = panic_message(panic.as_ref()),
                "frame handler panicked"
            );
        }
    }
}
