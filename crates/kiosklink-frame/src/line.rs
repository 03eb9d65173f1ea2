use bytes::{Buf, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Control messages are terminated by a single newline.
pub const LINE_DELIMITER: u8 = b'\n';

/// Default cap on a single control line: 1 MiB.
pub const DEFAULT_MAX_LINE: usize = 1024 * 1024;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Encode one outgoing control message, appending the delimiter.
pub fn encode_line(message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 1);
    out.extend_from_slice(message.as_bytes());
    if !message.ends_with('\n') {
        out.push(LINE_DELIMITER);
    }
    out
}

/// Accumulates received bytes and yields complete lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_line,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete line, without its delimiter (a trailing `\r`
    /// is also dropped).
    ///
    /// Returns `Ok(None)` until a delimiter arrives. If more than `max_line`
    /// bytes accumulate without one, the buffered bytes are discarded and
    /// `LineTooLong` is returned; later lines are unaffected.
    pub fn next_line(&mut self) -> Result<Option<Bytes>> {
        match self.buf.iter().position(|b| *b == LINE_DELIMITER) {
            Some(pos) => {
                let mut line = self.buf.split_to(pos);
                self.buf.advance(1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                Ok(Some(line.freeze()))
            }
            None if self.buf.len() > self.max_line => {
                let size = self.buf.len();
                self.buf.clear();
                Err(FrameError::LineTooLong {
                    size,
                    max: self.max_line,
                })
            }
            None => Ok(None),
        }
    }

    /// Bytes received but not yet terminated by a delimiter.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
