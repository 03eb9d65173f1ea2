use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kiosklink_frame::{FrameError, RecordConfig, RecordReader, DEFAULT_MAX_RECORD};
use kiosklink_transport::{ConnectionState, LinkStream, StopSignal};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, VideoError};
use crate::source::{FrameHandler, HandlerSlot, VideoSource};

const TRANSPORT: &str = "tcp";

/// Configuration for [`StreamSource`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Video endpoint, `host:port`.
    pub addr: String,
    /// Bound on a single connect attempt. Default: 5s.
    pub connect_timeout: Duration,
    /// Pause before reconnecting. Default: 2s.
    pub reconnect_delay: Duration,
    /// Read poll interval; bounds how long `stop` waits. Default: 500ms.
    pub read_timeout: Duration,
    /// Largest record accepted. Default: 16 MiB.
    pub max_record_size: usize,
}

impl StreamConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
            read_timeout: Duration::from_millis(500),
            max_record_size: DEFAULT_MAX_RECORD,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 5050)
    }
}

/// State shared between the source and its worker.
#[derive(Default)]
struct Shared {
    state: Mutex<ConnectionState>,
    /// Clone of the live socket, kept so `stop` can shut it down.
    socket: Mutex<Option<LinkStream>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

struct Running {
    stop: StopSignal,
    worker: JoinHandle<()>,
}

/// Reads length-prefixed frames from a TCP video endpoint.
///
/// One worker connects, reads records until the connection ends, then
/// reconnects after `reconnect_delay`, indefinitely. A record cut short by
/// a disconnect is discarded.
pub struct StreamSource {
    config: StreamConfig,
    handler: HandlerSlot,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl StreamSource {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            handler: HandlerSlot::default(),
            shared: Arc::new(Shared::default()),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }
}

impl VideoSource for StreamSource {
    fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(VideoError::AlreadyRunning);
        }

        let stop = StopSignal::new();
        let worker = {
            let config = self.config.clone();
            let handler = self.handler.clone();
            let shared = Arc::clone(&self.shared);
            let stop = stop.clone();
            thread::Builder::new()
                .name("kiosklink-tcp-video".to_string())
                .spawn(move || run(config, handler, shared, stop))
                .map_err(VideoError::Worker)?
        };

        info!(addr = %self.config.addr, "stream video source started");
        *running = Some(Running { stop, worker });
        Ok(())
    }

    fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.stop.stop();

        let socket = self.shared.socket.lock().take();
        if let Some(socket) = socket {
            if let Err(err) = socket.shutdown() {
                debug!(error = %err, "video socket shutdown failed");
            }
        }

        if running.worker.thread().id() != thread::current().id() {
            let _ = running.worker.join();
        }
        self.shared.set_state(ConnectionState::Disconnected);
        info!(addr = %self.config.addr, "stream video source stopped");
    }

    fn set_frame_handler(&self, handler: FrameHandler) {
        self.handler.set(handler);
    }

    fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    fn transport_name(&self) -> &'static str {
        TRANSPORT
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("addr", &self.config.addr)
            .field("state", &self.state())
            .finish()
    }
}

fn run(config: StreamConfig, handler: HandlerSlot, shared: Arc<Shared>, stop: StopSignal) {
    let mut attempt: u64 = 0;

    while !stop.is_stopped() {
        attempt += 1;
        shared.set_state(ConnectionState::Connecting);

        match LinkStream::connect(&config.addr, config.connect_timeout) {
            Ok(stream) => {
                shared.set_state(ConnectionState::Connected);
                info!(addr = %config.addr, attempt, "video stream connected");
                attempt = 0;

                match stream.try_clone() {
                    Ok(clone) => *shared.socket.lock() = Some(clone),
                    Err(err) => debug!(error = %err, "could not keep video socket for shutdown"),
                }
                // `stop` may have run before the clone was published.
                if stop.is_stopped() {
                    shared.socket.lock().take();
                    break;
                }

                let end = read_records(stream, &config, &handler, &stop);
                shared.socket.lock().take();

                match end {
                    FrameError::Stopped => break,
                    _ if stop.is_stopped() => break,
                    FrameError::ConnectionClosed => {
                        info!(addr = %config.addr, "video stream closed by peer")
                    }
                    err => warn!(addr = %config.addr, error = %err, "video stream failed"),
                }
                shared.set_state(ConnectionState::Disconnected);
            }
            Err(err) => {
                shared.set_state(ConnectionState::Error);
                warn!(addr = %config.addr, attempt, error = %err, "video stream connect failed");
            }
        }

        if stop.wait_timeout(config.reconnect_delay) {
            break;
        }
    }

    shared.set_state(ConnectionState::Disconnected);
    debug!(addr = %config.addr, "stream video worker exited");
}

/// Deliver records until the connection ends, returning why it ended.
fn read_records(
    stream: LinkStream,
    config: &StreamConfig,
    handler: &HandlerSlot,
    stop: &StopSignal,
) -> FrameError {
    let record_config = RecordConfig {
        max_record_size: config.max_record_size,
        read_timeout: Some(config.read_timeout),
    };
    let mut reader = match RecordReader::with_config_link(stream, record_config) {
        Ok(reader) => reader.with_stop(stop.clone()),
        Err(err) => return err,
    };

    let mut frames: u64 = 0;
    loop {
        match reader.read_frame() {
            Ok(frame) => {
                frames += 1;
                trace!(len = frame.len(), "video record received");
                handler.deliver(TRANSPORT, frame);
            }
            Err(err) => {
                let partial = reader.buffered_len();
                if partial > 0 {
                    debug!(partial, "incomplete video record discarded");
                }
                debug!(frames, "video stream session ended");
                return err;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;
    use std::time::Instant;

    use bytes::BytesMut;
    use crossbeam_channel::unbounded;
    use kiosklink_frame::{encode_record, Frame};

    use super::*;

    fn fast_config(port: u16) -> StreamConfig {
        let mut config = StreamConfig::new("127.0.0.1", port);
        config.connect_timeout = Duration::from_millis(500);
        config.reconnect_delay = Duration::from_millis(50);
        config.read_timeout = Duration::from_millis(50);
        config
    }

    fn record(payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_record(payload, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn delivers_ten_byte_record() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(&[0x00, 0x00, 0x00, 0x0A]).unwrap();
            conn.write_all(b"0123456789").unwrap();
            std::thread::sleep(Duration::from_millis(200));
        });

        let source = StreamSource::new(fast_config(port));
        let (tx, frames) = unbounded();
        source.set_frame_handler(Arc::new(move |frame: Frame| {
            let _ = tx.send(frame);
        }));
        source.start().unwrap();

        let frame = frames.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.bytes.as_ref(), b"0123456789");
        server.join().unwrap();
        source.stop();
    }

    #[test]
    fn short_record_is_dropped_and_source_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut first, _) = listener.accept().unwrap();
            first.write_all(&[0x00, 0x00, 0x00, 0x0A]).unwrap();
            first.write_all(b"012345").unwrap();
            drop(first);

            let (mut second, _) = listener.accept().unwrap();
            second.write_all(&record(b"after-reconnect")).unwrap();
            std::thread::sleep(Duration::from_millis(200));
        });

        let source = StreamSource::new(fast_config(port));
        let (tx, frames) = unbounded();
        source.set_frame_handler(Arc::new(move |frame: Frame| {
            let _ = tx.send(frame);
        }));
        source.start().unwrap();

        let frame = frames.recv_timeout(Duration::from_secs(3)).unwrap();
        assert_eq!(frame.bytes.as_ref(), b"after-reconnect");
        assert!(frames.try_recv().is_err());
        server.join().unwrap();
        source.stop();
    }

    #[test]
    fn keeps_retrying_until_endpoint_appears() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let source = StreamSource::new(fast_config(port));
        let (tx, frames) = unbounded();
        source.set_frame_handler(Arc::new(move |frame: Frame| {
            let _ = tx.send(frame);
        }));
        source.start().unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_ne!(source.state(), ConnectionState::Connected);

        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        let (mut conn, _) = listener.accept().unwrap();
        conn.write_all(&record(b"late")).unwrap();

        assert_eq!(
            frames.recv_timeout(Duration::from_secs(2)).unwrap().bytes.as_ref(),
            b"late"
        );
        source.stop();
    }

    #[test]
    fn stop_unblocks_idle_reader_promptly() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut config = fast_config(port);
        config.read_timeout = Duration::from_secs(30);
        let source = StreamSource::new(config);
        source.start().unwrap();
        let (_conn, _) = listener.accept().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while source.state() != ConnectionState::Connected && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        // Give the worker time to publish its socket for shutdown.
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        source.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(source.state(), ConnectionState::Disconnected);
        assert!(!source.is_running());
    }
}
