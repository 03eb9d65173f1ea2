use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::info;

use crate::error::{Result, TransportError};

/// Largest datagram the receive path accepts.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Bound UDP socket used as the receiving end of the datagram video transport.
pub struct DatagramSocket {
    inner: UdpSocket,
}

impl DatagramSocket {
    /// Bind to `addr` (`host:port`). Port 0 picks an ephemeral port.
    pub fn bind(addr: &str) -> Result<Self> {
        let inner = UdpSocket::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        info!(addr, "udp socket bound");
        Ok(Self { inner })
    }

    /// Receive one datagram into `buf`, returning its length (blocking up to
    /// the read timeout).
    pub fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.recv_from(buf).map(|(len, _src)| len)
    }

    /// Set read timeout so receive loops can observe a stop signal.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }
}

impl std::fmt::Debug for DatagramSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramSocket")
            .field("local", &self.inner.local_addr().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::is_timeout;

    #[test]
    fn bind_and_receive() {
        let socket = DatagramSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"fragment", addr).unwrap();

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let len = socket.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"fragment");
    }

    #[test]
    fn read_timeout_elapses() {
        let socket = DatagramSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();

        let mut buf = [0u8; 16];
        let err = socket.recv(&mut buf).unwrap_err();
        assert!(is_timeout(&err));
    }

    #[test]
    fn bind_conflict_reports_bind_error() {
        let first = DatagramSocket::bind("127.0.0.1:0").unwrap();
        let taken = first.local_addr().unwrap().to_string();

        let result = DatagramSocket::bind(&taken);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }
}
