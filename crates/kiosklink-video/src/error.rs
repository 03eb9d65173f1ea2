/// Errors that can occur starting or running a video source.
#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    /// Socket-level error (bind, connect).
    #[error("transport error: {0}")]
    Transport(#[from] kiosklink_transport::TransportError),

    /// Framing error.
    #[error("frame error: {0}")]
    Frame(#[from] kiosklink_frame::FrameError),

    /// `start` was called on a source that is already running.
    #[error("video source already running")]
    AlreadyRunning,

    /// A worker thread could not be started.
    #[error("failed to start worker: {0}")]
    Worker(std::io::Error),
}

pub type Result<T> = std::result::Result<T, VideoError>;
