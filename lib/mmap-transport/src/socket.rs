// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Blocking control-channel sockets.
//!
//! Wire format of every blob:
//! ```text
//! [u32 BE: payload_len][payload bytes]
//! ```
//!
//! A zero-length blob is a complete message. Receivers state the length they
//! expect, so a peer sending the wrong message surfaces as
//! [`ChannelError::LengthMismatch`] rather than as garbage in the caller.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Size of the blob length prefix.
const BLOB_HEADER_SIZE: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    /// The peer closed the connection before the blob was complete.
    #[error("connection closed by peer")]
    Closed,

    /// A read did not complete within the configured timeout.
    #[error("timed out waiting for peer")]
    Timeout,

    /// The peer sent a blob of a different size than expected.
    #[error("expected a {expected} byte blob, peer sent {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The blob cannot be described by the 32-bit length prefix.
    #[error("blob of {0} bytes exceeds the maximum frame size")]
    TooLarge(usize),

    /// The service is not a numeric port.
    #[error("invalid service '{0}'")]
    InvalidService(String),

    /// Name resolution produced no usable address.
    #[error("cannot resolve {node}:{service}: {source}")]
    Resolve {
        node: String,
        service: String,
        #[source]
        source: io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl ChannelError {
    fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => ChannelError::Closed,
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ChannelError::Timeout,
            _ => ChannelError::Io(err),
        }
    }

    fn from_write(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => ChannelError::Closed,
            _ => ChannelError::Io(err),
        }
    }

    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ChannelError::Io(err) | ChannelError::Resolve { source: err, .. } => {
                err.raw_os_error()
            }
            _ => None,
        }
    }
}

/// Reliable byte-stream connection used for negotiation only.
#[derive(Debug)]
pub struct ControlChannel {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl ControlChannel {
    /// Wrap an accepted or connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to set TCP_NODELAY on control channel: {}", e);
        }
        let peer = stream.peer_addr().ok();
        Self { stream, peer }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Send one length-prefixed blob.
    pub fn send_blob(&self, blob: &[u8]) -> Result<(), ChannelError> {
        let len = u32::try_from(blob.len()).map_err(|_| ChannelError::TooLarge(blob.len()))?;

        let mut frame = Vec::with_capacity(BLOB_HEADER_SIZE + blob.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(blob);

        (&self.stream)
            .write_all(&frame)
            .map_err(ChannelError::from_write)
    }

    /// Receive one blob of exactly `buf.len()` bytes.
    pub fn recv_fixed_blob(&self, buf: &mut [u8]) -> Result<(), ChannelError> {
        let actual = self.recv_header()?;
        if actual != buf.len() {
            return Err(ChannelError::LengthMismatch {
                expected: buf.len(),
                actual,
            });
        }
        self.read_exact(buf)
    }

    /// Receive one blob of at most `max` bytes.
    pub fn recv_var_blob(&self, max: usize) -> Result<Vec<u8>, ChannelError> {
        let len = self.recv_header()?;
        if len > max {
            return Err(ChannelError::TooLarge(len));
        }
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        self.stream.set_read_timeout(timeout).map_err(ChannelError::Io)
    }

    /// Shut down both directions. Failures are logged and otherwise ignored.
    pub fn close(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                tracing::warn!(peer = ?self.peer, "Failed to close control channel: {}", e);
            }
        }
    }

    fn recv_header(&self) -> Result<usize, ChannelError> {
        let mut header = [0u8; BLOB_HEADER_SIZE];
        self.read_exact(&mut header)?;
        Ok(u32::from_be_bytes(header) as usize)
    }

    fn read_exact(&self, buf: &mut [u8]) -> Result<(), ChannelError> {
        (&self.stream)
            .read_exact(buf)
            .map_err(ChannelError::from_read)
    }
}

/// Connect a control channel to `node:service`.
///
/// Every resolved address is tried in order; the error of the last attempt is
/// returned when none accepts.
pub fn connect_sock(node: &str, service: &str) -> Result<ControlChannel, ChannelError> {
    let port: u16 = service
        .parse()
        .map_err(|_| ChannelError::InvalidService(service.to_string()))?;

    let addrs = (node, port)
        .to_socket_addrs()
        .map_err(|source| ChannelError::Resolve {
            node: node.to_string(),
            service: service.to_string(),
            source,
        })?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                tracing::debug!(%addr, "Control channel connected");
                return Ok(ControlChannel::from_stream(stream));
            }
            Err(e) => {
                tracing::debug!(%addr, "Connect attempt failed: {}", e);
                last_err = Some(e);
            }
        }
    }

    Err(ChannelError::Resolve {
        node: node.to_string(),
        service: service.to_string(),
        source: last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (ControlChannel, ControlChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let client = thread::spawn(move || connect_sock("127.0.0.1", &port).unwrap());
        let (stream, _) = listener.accept().unwrap();
        (client.join().unwrap(), ControlChannel::from_stream(stream))
    }

    #[test]
    fn test_fixed_blob_round_trip() {
        let (a, b) = pair();
        a.send_blob(&[1, 2, 3, 4, 5]).unwrap();

        let mut buf = [0u8; 5];
        b.recv_fixed_blob(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_zero_length_blob() {
        let (a, b) = pair();
        a.send_blob(&[]).unwrap();
        b.recv_fixed_blob(&mut []).unwrap();
    }

    #[test]
    fn test_length_mismatch_is_reported() {
        let (a, b) = pair();
        a.send_blob(&[0u8; 3]).unwrap();

        let mut buf = [0u8; 8];
        match b.recv_fixed_blob(&mut buf) {
            Err(ChannelError::LengthMismatch { expected, actual }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_peer_close_is_connection_error() {
        let (a, b) = pair();
        a.close();
        drop(a);

        let mut buf = [0u8; 8];
        assert!(matches!(
            b.recv_fixed_blob(&mut buf),
            Err(ChannelError::Closed)
        ));
    }

    #[test]
    fn test_var_blob_limit() {
        let (a, b) = pair();
        a.send_blob(b"endpoint-name").unwrap();
        assert_eq!(b.recv_var_blob(64).unwrap(), b"endpoint-name");

        a.send_blob(&[7u8; 32]).unwrap();
        assert!(matches!(b.recv_var_blob(16), Err(ChannelError::TooLarge(32))));
    }

    #[test]
    fn test_read_timeout() {
        let (_a, b) = pair();
        b.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        assert!(matches!(b.recv_var_blob(16), Err(ChannelError::Timeout)));
    }

    #[test]
    fn test_invalid_service() {
        assert!(matches!(
            connect_sock("127.0.0.1", "not-a-port"),
            Err(ChannelError::InvalidService(_))
        ));
    }
}
