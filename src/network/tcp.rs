//! TCP connection plumbing shared by the three channels

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::NetworkError;

/// Lifecycle of a channel's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// Connect to `host:port` with a bounded timeout.
///
/// Once connected the read and write timeouts are cleared, so the stream
/// blocks indefinitely until the peer or a shutdown ends it.
pub fn connect_stream(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, NetworkError> {
    let addrs: Vec<_> = (host, port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::AddressResolution(format!("{}:{}: {}", host, port, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(NetworkError::AddressResolution(format!("{}:{}", host, port)));
    }

    let mut last_error = None;
    for addr in addrs {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        match socket.connect_timeout(&SockAddr::from(addr), timeout) {
            Ok(()) => {
                socket
                    .set_nodelay(true)
                    .and_then(|_| socket.set_read_timeout(None))
                    .and_then(|_| socket.set_write_timeout(None))
                    .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
                tracing::debug!("Connected to {}", addr);
                return Ok(socket.into());
            }
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(NetworkError::ConnectionFailed(format!(
        "{}:{}: {}",
        host,
        port,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// A clone of a channel's socket kept aside so another thread can force it
/// closed, unblocking whatever read or write the worker is parked in.
#[derive(Default)]
pub struct ShutdownHandle {
    stream: Mutex<Option<TcpStream>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, stream: &TcpStream) -> std::io::Result<()> {
        *self.stream.lock() = Some(stream.try_clone()?);
        Ok(())
    }

    /// Shut the socket down in both directions. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.stream.lock().is_some()
    }
}
