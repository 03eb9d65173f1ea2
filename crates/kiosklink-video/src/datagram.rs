use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use kiosklink_transport::{is_timeout, DatagramSocket, StopSignal, MAX_DATAGRAM_SIZE};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, VideoError};
use crate::reassembly::{Ingest, Reassembler, DEFAULT_MAX_PENDING_FRAMES};
use crate::source::{FrameHandler, HandlerSlot, VideoSource};

const TRANSPORT: &str = "udp";

/// Configuration for [`DatagramSource`].
#[derive(Debug, Clone)]
pub struct DatagramConfig {
    /// Local interface to bind. Default: all interfaces.
    pub bind_host: String,
    /// Local port to bind; 0 picks an ephemeral port.
    pub port: u16,
    /// Age after which a partial frame is discarded. Default: 2s.
    pub fragment_timeout: Duration,
    /// Interval between sweeps for stale partial frames. Default: 500ms.
    pub sweep_interval: Duration,
    /// Receive poll interval; bounds how long `stop` waits. Default: 500ms.
    pub recv_timeout: Duration,
    /// Partial frames held before the stalest is evicted. Default: 256.
    pub max_pending_frames: usize,
}

impl DatagramConfig {
    pub fn new(bind_host: &str, port: u16) -> Self {
        Self {
            bind_host: bind_host.to_string(),
            port,
            fragment_timeout: Duration::from_secs(2),
            sweep_interval: Duration::from_millis(500),
            recv_timeout: Duration::from_millis(500),
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", 5005)
    }
}

struct Running {
    stop: StopSignal,
    local_addr: SocketAddr,
    workers: Vec<JoinHandle<()>>,
}

/// Receives fragmented frames on a bound UDP port.
///
/// `start` binds the socket and spawns two workers: one receiving and
/// reassembling datagrams, one sweeping stale partial frames. Both poll the
/// stop signal between blocking calls; the socket is closed when the
/// receive worker exits.
pub struct DatagramSource {
    config: DatagramConfig,
    handler: HandlerSlot,
    table: Arc<Mutex<Reassembler>>,
    running: Mutex<Option<Running>>,
}

impl DatagramSource {
    pub fn new(config: DatagramConfig) -> Self {
        let table = Reassembler::with_max_pending(config.max_pending_frames);
        Self {
            config,
            handler: HandlerSlot::default(),
            table: Arc::new(Mutex::new(table)),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DatagramConfig {
        &self.config
    }

    /// Address actually bound while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local_addr)
    }

    /// Partial frames currently held.
    pub fn pending_frames(&self) -> usize {
        self.table.lock().len()
    }

    fn spawn_workers(&self, socket: DatagramSocket, stop: &StopSignal) -> Result<Vec<JoinHandle<()>>> {
        let receiver = {
            let stop = stop.clone();
            let table = Arc::clone(&self.table);
            let handler = self.handler.clone();
            thread::Builder::new()
                .name("kiosklink-udp-recv".to_string())
                .spawn(move || receive_loop(socket, table, handler, stop))
                .map_err(VideoError::Worker)?
        };

        let sweeper = {
            let stop = stop.clone();
            let table = Arc::clone(&self.table);
            let interval = self.config.sweep_interval;
            let timeout = self.config.fragment_timeout;
            thread::Builder::new()
                .name("kiosklink-udp-sweep".to_string())
                .spawn(move || sweep_loop(table, interval, timeout, stop))
        };

        match sweeper {
            Ok(sweeper) => Ok(vec![receiver, sweeper]),
            Err(err) => {
                stop.stop();
                let _ = receiver.join();
                Err(VideoError::Worker(err))
            }
        }
    }
}

impl VideoSource for DatagramSource {
    fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(VideoError::AlreadyRunning);
        }

        let socket = DatagramSocket::bind(&self.config.bind_addr())?;
        socket.set_read_timeout(Some(self.config.recv_timeout))?;
        let local_addr = socket.local_addr()?;

        self.table.lock().clear();
        let stop = StopSignal::new();
        let workers = self.spawn_workers(socket, &stop)?;

        info!(
            %local_addr,
            fragment_timeout_ms = self.config.fragment_timeout.as_millis() as u64,
            "datagram video source started"
        );
        *running = Some(Running {
            stop,
            local_addr,
            workers,
        });
        Ok(())
    }

    fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.stop.stop();

        let current = thread::current().id();
        for worker in running.workers {
            // A frame handler may call stop from the receive worker itself.
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
        self.table.lock().clear();
        info!(local_addr = %running.local_addr, "datagram video source stopped");
    }

    fn set_frame_handler(&self, handler: FrameHandler) {
        self.handler.set(handler);
    }

    fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    fn registration_port(&self) -> Option<u16> {
        match self.local_addr() {
            Some(addr) => Some(addr.port()),
            None if self.config.port != 0 => Some(self.config.port),
            None => None,
        }
    }

    fn transport_name(&self) -> &'static str {
        TRANSPORT
    }
}

impl Drop for DatagramSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DatagramSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramSource")
            .field("bind_addr", &self.config.bind_addr())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

fn receive_loop(
    socket: DatagramSocket,
    table: Arc<Mutex<Reassembler>>,
    handler: HandlerSlot,
    stop: StopSignal,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut frames: u64 = 0;

    while !stop.is_stopped() {
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(err) if is_timeout(&err) || err.kind() == ErrorKind::Interrupted => continue,
            Err(_) if stop.is_stopped() => break,
            Err(err) => {
                warn!(error = %err, "datagram receive failed");
                if stop.wait_timeout(Duration::from_millis(100)) {
                    break;
                }
                continue;
            }
        };

        let outcome = table.lock().ingest(&buf[..len], Instant::now());
        match outcome {
            Ingest::Complete { frame_id, frame } => {
                frames += 1;
                trace!(frame_id, len = frame.len(), "frame reassembled");
                handler.deliver(TRANSPORT, frame);
            }
            Ingest::Pending {
                frame_id,
                received,
                total,
            } => trace!(frame_id, received, total, "fragment stored"),
            Ingest::Duplicate { frame_id, index } => {
                trace!(frame_id, index, "duplicate fragment ignored")
            }
            Ingest::Dropped(reason) => debug!(%reason, len, "datagram dropped"),
        }
    }

    debug!(frames, "datagram receive loop exited");
}

fn sweep_loop(table: Arc<Mutex<Reassembler>>, interval: Duration, timeout: Duration, stop: StopSignal) {
    while !stop.wait_timeout(interval) {
        let expired = table.lock().sweep(Instant::now(), timeout);
        if !expired.is_empty() {
            debug!(count = expired.len(), ?expired, "stale partial frames discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::UdpSocket;

    use crossbeam_channel::unbounded;
    use kiosklink_frame::{fragment_payload, Frame};

    use super::*;

    fn fast_config() -> DatagramConfig {
        let mut config = DatagramConfig::new("127.0.0.1", 0);
        config.fragment_timeout = Duration::from_millis(200);
        config.sweep_interval = Duration::from_millis(50);
        config.recv_timeout = Duration::from_millis(50);
        config
    }

    #[test]
    fn delivers_reassembled_frames() {
        let source = DatagramSource::new(fast_config());
        let (tx, frames) = unbounded();
        source.set_frame_handler(Arc::new(move |frame: Frame| {
            let _ = tx.send(frame);
        }));
        source.start().unwrap();
        let addr = source.local_addr().unwrap();
        assert_eq!(source.registration_port(), Some(addr.port()));

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut datagrams = fragment_payload(1, &payload, 1024).unwrap();
        datagrams.reverse();
        for datagram in &datagrams {
            sender.send_to(datagram, addr).unwrap();
        }
        sender.send_to(&datagrams[0], addr).unwrap();

        let frame = frames.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.bytes.as_ref(), payload.as_slice());
        assert!(frames.recv_timeout(Duration::from_millis(200)).is_err());

        source.stop();
        assert!(!source.is_running());
    }

    #[test]
    fn incomplete_frame_is_swept() {
        let source = DatagramSource::new(fast_config());
        source.start().unwrap();
        let addr = source.local_addr().unwrap();

        let datagrams = fragment_payload(9, &[7u8; 300], 108).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&datagrams[0], addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while source.pending_frames() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(source.pending_frames(), 1);

        thread::sleep(Duration::from_millis(500));
        assert_eq!(source.pending_frames(), 0);
    }

    #[test]
    fn start_twice_is_rejected_and_restart_works() {
        let source = DatagramSource::new(fast_config());
        source.start().unwrap();
        assert!(matches!(source.start(), Err(VideoError::AlreadyRunning)));

        source.stop();
        source.stop();
        source.start().unwrap();
        assert!(source.is_running());
    }

    #[test]
    fn bind_conflict_is_reported() {
        let holder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let source = DatagramSource::new(DatagramConfig::new("127.0.0.1", port));
        assert!(matches!(source.start(), Err(VideoError::Transport(_))));
        assert!(!source.is_running());
        assert_eq!(source.registration_port(), Some(port));
    }
}
