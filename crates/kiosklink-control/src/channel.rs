use std::io::Write;
use std::time::Duration;

use kiosklink_frame::{FrameError, LineReader};
use kiosklink_transport::{is_broken_pipe, ConnectionState, LinkStream, StopSignal};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::{ControlError, Result};

/// Configuration for the control channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Device address, `host:port`.
    pub addr: String,
    /// Bound on a single connect attempt. Default: 5s.
    pub connect_timeout: Duration,
    /// Pause between failed connect attempts. Default: 2s.
    pub reconnect_delay: Duration,
    /// Receive poll interval; bounds how long `close` takes to be observed.
    /// Default: 1s.
    pub read_timeout: Duration,
    /// Bound on a single write. Default: 5s.
    pub write_timeout: Option<Duration>,
}

impl ChannelConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
            read_timeout: Duration::from_secs(1),
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Why a receive loop returned.
#[derive(Debug)]
pub enum EndReason {
    /// The device closed the connection.
    PeerClosed,
    /// Reading failed.
    Failed(FrameError),
    /// The channel was closed locally.
    Closed,
}

/// End of one receive loop, tagged with the connection it served.
#[derive(Debug)]
pub struct ReceiveEnd {
    pub reason: EndReason,
    pub generation: u64,
}

struct Link {
    stream: Option<LinkStream>,
    state: ConnectionState,
    /// Bumped on every successful connect.
    generation: u64,
}

enum WriteFailure {
    NotConnected,
    Broken(std::io::Error),
    Other(std::io::Error),
}

impl WriteFailure {
    fn into_error(self) -> ControlError {
        match self {
            WriteFailure::NotConnected => ControlError::NotConnected,
            WriteFailure::Broken(err) | WriteFailure::Other(err) => ControlError::Send(err),
        }
    }
}

/// One reliable, reconnecting line-oriented connection to the device.
///
/// Writes are serialized by an internal lock so concurrent senders never
/// interleave bytes. Once [`close`](Self::close) is called the channel stays
/// closed; connect attempts and sends fail with [`ControlError::Closed`].
pub struct ControlChannel {
    config: ChannelConfig,
    link: Mutex<Link>,
    connecting: Mutex<()>,
    closed: StopSignal,
}

impl ControlChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            link: Mutex::new(Link {
                stream: None,
                state: ConnectionState::Disconnected,
                generation: 0,
            }),
            connecting: Mutex::new(()),
            closed: StopSignal::new(),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.link.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of successful connects so far.
    pub fn generation(&self) -> u64 {
        self.link.lock().generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_stopped()
    }

    /// Connect, retrying every `reconnect_delay` until a connection is made
    /// or the channel is closed. Returns immediately if already connected.
    pub fn connect(&self) -> Result<()> {
        let _connecting = self.connecting.lock();
        let mut attempt: u64 = 0;

        loop {
            if self.closed.is_stopped() {
                self.set_state(ConnectionState::Disconnected);
                return Err(ControlError::Closed);
            }
            if self.is_connected() {
                return Ok(());
            }

            attempt += 1;
            self.set_state(ConnectionState::Connecting);
            match LinkStream::connect(&self.config.addr, self.config.connect_timeout) {
                Ok(stream) => {
                    if let Err(err) = stream.set_write_timeout(self.config.write_timeout) {
                        debug!(error = %err, "failed to set control write timeout");
                    }

                    let mut link = self.link.lock();
                    if self.closed.is_stopped() {
                        let _ = stream.shutdown();
                        link.state = ConnectionState::Disconnected;
                        return Err(ControlError::Closed);
                    }
                    link.stream = Some(stream);
                    link.state = ConnectionState::Connected;
                    link.generation += 1;
                    info!(
                        addr = %self.config.addr,
                        attempt,
                        generation = link.generation,
                        "control channel connected"
                    );
                    return Ok(());
                }
                Err(err) => {
                    self.set_state(ConnectionState::Error);
                    warn!(
                        addr = %self.config.addr,
                        attempt,
                        error = %err,
                        retry_in_ms = self.config.reconnect_delay.as_millis() as u64,
                        "control connect failed"
                    );
                }
            }

            if self.closed.wait_timeout(self.config.reconnect_delay) {
                self.set_state(ConnectionState::Disconnected);
                return Err(ControlError::Closed);
            }
        }
    }

    /// Write one complete message.
    ///
    /// Connects first if needed. A broken-pipe-class failure marks the link
    /// disconnected, reconnects, and retries exactly once; any other failure
    /// is returned.
    pub fn send(&self, message: &[u8]) -> Result<()> {
        self.send_tracked(message).map(|_| ())
    }

    /// Like [`send`](Self::send), returning the generation of the connection
    /// the message was written to.
    pub fn send_tracked(&self, message: &[u8]) -> Result<u64> {
        if self.closed.is_stopped() {
            return Err(ControlError::Closed);
        }

        let first = match self.write_once(message) {
            Err(WriteFailure::NotConnected) => {
                debug!("control channel not connected; connecting before send");
                self.connect()?;
                self.write_once(message)
            }
            other => other,
        };

        match first {
            Ok(generation) => Ok(generation),
            Err(WriteFailure::Broken(err)) => {
                warn!(error = %err, "control connection broken during send; reconnecting");
                self.connect()?;
                self.write_once(message).map_err(WriteFailure::into_error)
            }
            Err(failure) => Err(failure.into_error()),
        }
    }

    fn write_once(&self, message: &[u8]) -> std::result::Result<u64, WriteFailure> {
        let mut link = self.link.lock();
        let generation = link.generation;
        let Some(stream) = link.stream.as_mut() else {
            return Err(WriteFailure::NotConnected);
        };

        match stream.write_all(message).and_then(|()| stream.flush()) {
            Ok(()) => {
                trace!(bytes = message.len(), generation, "control message written");
                Ok(generation)
            }
            Err(err) => {
                if let Some(stream) = link.stream.take() {
                    let _ = stream.shutdown();
                }
                link.state = ConnectionState::Disconnected;
                if is_broken_pipe(&err) {
                    Err(WriteFailure::Broken(err))
                } else {
                    Err(WriteFailure::Other(err))
                }
            }
        }
    }

    /// Read lines from the current connection until it fails or the channel
    /// is closed, handing each non-empty line to `on_line`.
    ///
    /// Lines that are not UTF-8 or exceed the line limit are logged and
    /// skipped. When the connection ends, it is marked disconnected unless a
    /// newer connection has already replaced it.
    pub fn receive_loop<F>(&self, mut on_line: F) -> Result<ReceiveEnd>
    where
        F: FnMut(&str),
    {
        let (stream, generation) = {
            let link = self.link.lock();
            let stream = link.stream.as_ref().ok_or(ControlError::NotConnected)?;
            (stream.try_clone()?, link.generation)
        };
        stream.set_read_timeout(Some(self.config.read_timeout))?;

        debug!(generation, "control receive loop started");
        let mut reader = LineReader::new(stream).with_stop(self.closed.clone());
        let reason = loop {
            match reader.next_line() {
                Ok(line) => match std::str::from_utf8(&line) {
                    Ok(text) => {
                        let text = text.trim();
                        if !text.is_empty() {
                            trace!(line = text, "control line received");
                            on_line(text);
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, len = line.len(), "dropping control line that is not UTF-8");
                    }
                },
                Err(FrameError::LineTooLong { size, max }) => {
                    warn!(size, max, "dropping oversized control line");
                }
                Err(_) if self.closed.is_stopped() => break EndReason::Closed,
                Err(FrameError::ConnectionClosed) => break EndReason::PeerClosed,
                Err(err) => break EndReason::Failed(err),
            }
        };

        match &reason {
            EndReason::Closed => debug!(generation, "control receive loop stopped"),
            EndReason::PeerClosed => {
                warn!(generation, "control connection closed by device");
                self.mark_disconnected(generation);
            }
            EndReason::Failed(err) => {
                warn!(generation, error = %err, "control receive failed");
                self.mark_disconnected(generation);
            }
        }

        Ok(ReceiveEnd { reason, generation })
    }

    fn mark_disconnected(&self, generation: u64) {
        let mut link = self.link.lock();
        if link.generation != generation {
            return;
        }
        if let Some(stream) = link.stream.take() {
            let _ = stream.shutdown();
        }
        if link.state == ConnectionState::Connected {
            link.state = ConnectionState::Disconnected;
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.link.lock().state = state;
    }

    /// Close the channel for good. Idempotent.
    pub fn close(&self) {
        if self.closed.is_stopped() {
            return;
        }
        self.closed.stop();

        let stream = {
            let mut link = self.link.lock();
            link.state = ConnectionState::Disconnected;
            link.stream.take()
        };
        if let Some(stream) = stream {
            if let Err(err) = stream.shutdown() {
                debug!(error = %err, "control stream shutdown failed");
            }
        }
        info!(addr = %self.config.addr, "control channel closed");
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("addr", &self.config.addr)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}
