/// Errors that can occur on the control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Socket-level error.
    #[error("transport error: {0}")]
    Transport(#[from] kiosklink_transport::TransportError),

    /// Line framing error.
    #[error("frame error: {0}")]
    Frame(#[from] kiosklink_frame::FrameError),

    /// The channel was closed locally; no further connects or sends.
    #[error("control channel closed")]
    Closed,

    /// No connection is established.
    #[error("control channel not connected")]
    NotConnected,

    /// Writing a message failed and was not retried further.
    #[error("send failed: {0}")]
    Send(std::io::Error),

    /// A background worker could not be started.
    #[error("failed to start worker: {0}")]
    Worker(std::io::Error),
}

pub type Result<T> = std::result::Result<T, ControlError>;
