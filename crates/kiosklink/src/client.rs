use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use kiosklink_control::{
    ChannelConfig, CommandDispatcher, CommandSink, ControlChannel, ControlError, DeviceEvent,
    DispatcherConfig, EndReason, CONNECTION_LOST_MESSAGE,
};
use kiosklink_transport::{panic_message, ConnectionState, StopSignal};
use kiosklink_video::{FrameHandler, VideoConfig, VideoError, VideoSource};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Receives unsolicited device output, on the supervisor thread.
pub type EventHandler = Arc<dyn Fn(DeviceEvent) + Send + Sync + 'static>;

const CONNECT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("control error: {0}")]
    Control(#[from] ControlError),

    #[error("video error: {0}")]
    Video(#[from] VideoError),

    #[error("client already started")]
    AlreadyStarted,

    #[error("client stopped")]
    Stopped,

    #[error("failed to start supervisor: {0}")]
    Worker(std::io::Error),
}

/// Everything a [`Client`] needs to run.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub channel: ChannelConfig,
    pub dispatcher: DispatcherConfig,
    /// Video transport run alongside the control channel. `None` builds a
    /// control-only client.
    pub video: Option<VideoConfig>,
}

impl ClientConfig {
    pub fn new(channel: ChannelConfig, video: Option<VideoConfig>) -> Self {
        Self {
            channel,
            dispatcher: DispatcherConfig::default(),
            video,
        }
    }
}

/// A kiosk client: control channel, command dispatcher, and one video source.
///
/// [`start`](Self::start) starts the video source and a supervisor thread
/// that connects the control channel, tells the device where to send
/// datagram video, and routes every received line through the dispatcher.
/// When the connection drops, the commands written on it settle with
/// "Connection lost" and the supervisor reconnects after the channel's
/// reconnect delay.
///
/// [`stop`](Self::stop) is terminal; a stopped client cannot be restarted.
pub struct Client {
    channel: Arc<ControlChannel>,
    dispatcher: Arc<CommandDispatcher>,
    video: Option<Arc<dyn VideoSource>>,
    events: Arc<RwLock<Option<EventHandler>>>,
    stop: StopSignal,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    reconnect_delay: Duration,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let reconnect_delay = config.channel.reconnect_delay;
        let channel = Arc::new(ControlChannel::new(config.channel));
        let sink: Arc<dyn CommandSink> = channel.clone();
        let dispatcher = CommandDispatcher::with_config(sink, config.dispatcher)?;

        Ok(Self {
            channel,
            dispatcher: Arc::new(dispatcher),
            video: config.video.map(VideoConfig::into_source),
            events: Arc::default(),
            stop: StopSignal::new(),
            supervisor: Mutex::new(None),
            reconnect_delay,
        })
    }

    pub fn start(&self) -> Result<(), ClientError> {
        let mut supervisor = self.supervisor.lock();
        if self.stop.is_stopped() {
            return Err(ClientError::Stopped);
        }
        if supervisor.is_some() {
            return Err(ClientError::AlreadyStarted);
        }

        if let Some(video) = &self.video {
            video.start()?;
        }

        let session = Supervisor {
            channel: Arc::clone(&self.channel),
            dispatcher: Arc::clone(&self.dispatcher),
            video: self.video.clone(),
            events: Arc::clone(&self.events),
            stop: self.stop.clone(),
            reconnect_delay: self.reconnect_delay,
        };
        let spawned = thread::Builder::new()
            .name("kiosklink-supervisor".to_string())
            .spawn(move || session.run());

        match spawned {
            Ok(handle) => {
                info!(
                    addr = %self.channel.config().addr,
                    video = self.video.as_ref().map(|video| video.transport_name()),
                    "client started"
                );
                *supervisor = Some(handle);
                Ok(())
            }
            Err(err) => {
                if let Some(video) = &self.video {
                    video.stop();
                }
                Err(ClientError::Worker(err))
            }
        }
    }

    /// Stop everything: close the channel, stop the video source, and settle
    /// every pending command. Idempotent.
    pub fn stop(&self) {
        if self.stop.is_stopped() {
            return;
        }
        self.stop.stop();
        self.channel.close();

        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        if let Some(video) = &self.video {
            video.stop();
        }
        self.dispatcher.shutdown();
        info!(addr = %self.channel.config().addr, "client stopped");
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn channel(&self) -> &ControlChannel {
        &self.channel
    }

    pub fn video(&self) -> Option<&Arc<dyn VideoSource>> {
        self.video.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.lock().is_some()
    }

    pub fn set_event_handler(&self, handler: EventHandler) {
        *self.events.write() = Some(handler);
    }

    /// Install the frame handler on the video source. Returns `false` for a
    /// control-only client.
    pub fn set_frame_handler(&self, handler: FrameHandler) -> bool {
        match &self.video {
            Some(video) => {
                video.set_frame_handler(handler);
                true
            }
            None => false,
        }
    }

    /// Block until the control channel is connected, `timeout` passes, or the
    /// client is stopped. Returns whether it is connected.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.channel.is_connected() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline || self.stop.wait_timeout(CONNECT_POLL.min(deadline - now)) {
                return self.channel.is_connected();
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.channel.config().addr)
            .field("state", &self.state())
            .field(
                "video",
                &self.video.as_ref().map(|video| video.transport_name()),
            )
            .field("pending", &self.dispatcher.pending_count())
            .finish()
    }
}

struct Supervisor {
    channel: Arc<ControlChannel>,
    dispatcher: Arc<CommandDispatcher>,
    video: Option<Arc<dyn VideoSource>>,
    events: Arc<RwLock<Option<EventHandler>>>,
    stop: StopSignal,
    reconnect_delay: Duration,
}

impl Supervisor {
    fn run(self) {
        let mut sessions: u64 = 0;

        while !self.stop.is_stopped() {
            match self.channel.connect() {
                Ok(()) => {}
                Err(ControlError::Closed) => break,
                Err(err) => {
                    warn!(error = %err, "control connect failed");
                    if self.stop.wait_timeout(self.reconnect_delay) {
                        break;
                    }
                    continue;
                }
            }
            sessions += 1;
            self.register_video_port();

            let end = self.channel.receive_loop(|line| {
                if let Some(event) = self.dispatcher.handle_line(line) {
                    self.emit(event);
                }
            });
            match end {
                Ok(end) if matches!(end.reason, EndReason::Closed) => break,
                Ok(end) => {
                    let abandoned = self
                        .dispatcher
                        .abandon_connection(end.generation, CONNECTION_LOST_MESSAGE);
                    info!(generation = end.generation, abandoned, "control session ended");
                }
                // A failed write dropped the link before the loop began;
                // `connect` picks it back up.
                Err(ControlError::NotConnected) => continue,
                Err(err) => warn!(error = %err, "control receive loop failed"),
            }

            if self.stop.wait_timeout(self.reconnect_delay) {
                break;
            }
        }

        debug!(sessions, "supervisor exited");
    }

    fn register_video_port(&self) {
        let Some(video) = self.video.as_ref().filter(|video| video.is_running()) else {
            return;
        };
        if let Some(port) = video.registration_port() {
            if let Err(err) = self.dispatcher.register_transport_port(port) {
                debug!(port, error = %err, "registration will be retried on next connect");
            }
        }
    }

    fn emit(&self, event: DeviceEvent) {
        let handler = self.events.read().clone();
        let Some(handler) = handler else {
            debug!(?event, "device event without handler");
            return;
        };
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
            error!(
                panic = panic_message(panic.as_ref()),
                "event handler panicked"
            );
        }
    }
}
