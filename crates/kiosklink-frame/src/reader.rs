use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use kiosklink_transport::{is_timeout, LinkStream, StopSignal};

use crate::codec::{decode_record, Frame, RecordConfig};
use crate::error::{FrameError, Result};
use crate::line::LineBuffer;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete length-prefixed video records from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// With a stop signal attached, read timeouts are absorbed and the signal is
/// polled between reads; without one, timeouts surface as `FrameError::Io`.
pub struct RecordReader<T> {
    inner: T,
    buf: BytesMut,
    config: RecordConfig,
    stop: Option<StopSignal>,
}

impl<T: Read> RecordReader<T> {
    /// Create a new record reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, RecordConfig::default())
    }

    /// Create a new record reader with explicit configuration.
    pub fn with_config(inner: T, config: RecordConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            stop: None,
        }
    }

    /// Attach a stop signal observed between reads.
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Read the next complete record (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached,
    /// including EOF in the middle of a record (the partial record is lost).
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(frame) = decode_record(&mut self.buf, self.config.max_record_size)? {
                return Ok(frame);
            }

            let read = read_chunk(&mut self.inner, &mut chunk, self.stop.as_ref())?;
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Bytes of an incomplete record currently buffered.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current record reader configuration.
    pub fn config(&self) -> &RecordConfig {
        &self.config
    }
}

impl RecordReader<LinkStream> {
    /// Create a record reader for `LinkStream` and apply read timeout from config.
    pub fn with_config_link(inner: LinkStream, config: RecordConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

/// Reads newline-delimited control lines from any `Read` stream.
pub struct LineReader<T> {
    inner: T,
    lines: LineBuffer,
    stop: Option<StopSignal>,
}

impl<T: Read> LineReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_buffer(inner, LineBuffer::new())
    }

    pub fn with_buffer(inner: T, lines: LineBuffer) -> Self {
        Self {
            inner,
            lines,
            stop: None,
        }
    }

    /// Attach a stop signal observed between reads.
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Read the next complete line (blocking), without its delimiter.
    ///
    /// `LineTooLong` discards the offending bytes; the caller may keep reading.
    pub fn next_line(&mut self) -> Result<Bytes> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(line) = self.lines.next_line()? {
                return Ok(line);
            }

            let read = read_chunk(&mut self.inner, &mut chunk, self.stop.as_ref())?;
            self.lines.extend(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Read at least one byte, polling `stop` across read timeouts.
fn read_chunk<T: Read>(inner: &mut T, chunk: &mut [u8], stop: Option<&StopSignal>) -> Result<usize> {
    loop {
        if stop.is_some_and(StopSignal::is_stopped) {
            return Err(FrameError::Stopped);
        }

        match inner.read(chunk) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if stop.is_some() && is_timeout(&err) => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}

fn transport_to_frame_error(err: kiosklink_transport::TransportError) -> FrameError {
    match err {
        kiosklink_transport::TransportError::Io(io)
        | kiosklink_transport::TransportError::Bind { source: io, .. }
        | kiosklink_transport::TransportError::Resolve { source: io, .. }
        | kiosklink_transport::TransportError::Connect { source: io, .. } => FrameError::Io(io),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    use bytes::BufMut;

    use super::*;
    use crate::codec::encode_record;

    fn wire(records: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for record in records {
            encode_record(record, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_record() {
        let mut reader = RecordReader::new(Cursor::new(wire(&[b"0123456789"])));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.bytes.as_ref(), b"0123456789");
    }

    #[test]
    fn read_multiple_records() {
        let mut reader = RecordReader::new(Cursor::new(wire(&[b"one", b"two", b"three"])));

        assert_eq!(reader.read_frame().unwrap().bytes.as_ref(), b"one");
        assert_eq!(reader.read_frame().unwrap().bytes.as_ref(), b"two");
        assert_eq!(reader.read_frame().unwrap().bytes.as_ref(), b"three");
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn read_record_larger_than_chunk() {
        let payload = vec![0xAB; 64 * 1024];
        let mut reader = RecordReader::new(Cursor::new(wire(&[&payload])));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.bytes.as_ref(), payload.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let reader = ByteByByteReader {
            bytes: wire(&[b"slow"]),
            pos: 0,
        };
        let mut reader = RecordReader::new(reader);
        assert_eq!(reader.read_frame().unwrap().bytes.as_ref(), b"slow");
    }

    #[test]
    fn closed_mid_record_delivers_nothing() {
        let mut partial = BytesMut::new();
        partial.put_u32(10);
        partial.put_slice(b"012345");

        let mut reader = RecordReader::new(Cursor::new(partial.to_vec()));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ConnectionClosed)
        ));
        assert_eq!(reader.buffered_len(), 10);
    }

    #[test]
    fn oversized_record_in_stream() {
        let mut header = BytesMut::new();
        header.put_u32(1024);

        let cfg = RecordConfig {
            max_record_size: 16,
            ..RecordConfig::default()
        };
        let mut reader = RecordReader::with_config(Cursor::new(header.to_vec()), cfg);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn timeout_without_stop_signal_propagates() {
        let mut reader = RecordReader::new(TimeoutsThenData {
            timeouts: 1,
            bytes: wire(&[b"ok"]),
            pos: 0,
        });
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::TimedOut));
    }

    #[test]
    fn timeouts_are_absorbed_with_stop_signal() {
        let mut reader = RecordReader::new(TimeoutsThenData {
            timeouts: 3,
            bytes: wire(&[b"ok"]),
            pos: 0,
        })
        .with_stop(StopSignal::new());
        assert_eq!(reader.read_frame().unwrap().bytes.as_ref(), b"ok");
    }

    #[test]
    fn raised_stop_signal_ends_read() {
        let stop = StopSignal::new();
        stop.stop();
        let mut reader = RecordReader::new(TimeoutsThenData {
            timeouts: usize::MAX,
            bytes: Vec::new(),
            pos: 0,
        })
        .with_stop(stop);
        assert!(matches!(reader.read_frame(), Err(FrameError::Stopped)));
    }

    #[test]
    fn stop_from_another_thread_unblocks_socket_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = std::thread::spawn(move || listener.accept().unwrap().0);

        let stream = LinkStream::connect(&addr, Duration::from_secs(1)).unwrap();
        let _server: TcpStream = accept.join().unwrap();

        let stop = StopSignal::new();
        let cfg = RecordConfig {
            read_timeout: Some(Duration::from_millis(20)),
            ..RecordConfig::default()
        };
        let mut reader = RecordReader::with_config_link(stream, cfg)
            .unwrap()
            .with_stop(stop.clone());

        let handle = std::thread::spawn(move || reader.read_frame());
        std::thread::sleep(Duration::from_millis(50));
        stop.stop();

        assert!(matches!(handle.join().unwrap(), Err(FrameError::Stopped)));
    }

    #[test]
    fn line_reader_splits_and_reports_eof() {
        let mut reader = LineReader::new(Cursor::new(b"a:1\r\nb:2\npartial".to_vec()));
        assert_eq!(reader.next_line().unwrap().as_ref(), b"a:1");
        assert_eq!(reader.next_line().unwrap().as_ref(), b"b:2");
        assert!(matches!(
            reader.next_line(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn line_reader_continues_after_overlong_line() {
        let mut data = vec![b'x'; 64];
        data.extend_from_slice(b"\nshort\n");
        let reader = ByteByByteReader { bytes: data, pos: 0 };
        let mut reader = LineReader::with_buffer(reader, LineBuffer::with_max_line(16));

        assert!(matches!(
            reader.next_line(),
            Err(FrameError::LineTooLong { .. })
        ));
        // The rest of the overlong line is still in flight; skip to the next one.
        let mut next = reader.next_line();
        while matches!(next, Err(FrameError::LineTooLong { .. })) {
            next = reader.next_line();
        }
        let tail = next.unwrap();
        assert!(tail.iter().all(|b| *b == b'x'));
        assert_eq!(reader.next_line().unwrap().as_ref(), b"short");
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct TimeoutsThenData {
        timeouts: usize,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for TimeoutsThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.timeouts > 0 {
                self.timeouts -= 1;
                return Err(std::io::Error::from(ErrorKind::TimedOut));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let n = (self.bytes.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
