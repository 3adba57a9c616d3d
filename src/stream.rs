//! TCP delivery of encoded readings to the collector.
//!
//! One outbound connection, opened once at startup and owned exclusively
//! here. There is no reconnect: once the peer goes away the loop is expected
//! to wind the process down.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use log::info;
use thiserror::Error;

/// A stalled peer must not block the measurement cadence for long.
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection closed by collector")]
    Closed,
    #[error("socket write failed: {0}")]
    Io(#[from] io::Error),
}

/// Outbound sink for encoded frames.
pub trait MessageSink {
    fn send(&mut self, frame: &[u8]) -> Result<(), StreamError>;
}

pub struct CollectorStream {
    stream: TcpStream,
}

impl CollectorStream {
    /// Establish the one connection this process uses. Callers treat a
    /// failure here as fatal; there is no startup retry.
    pub fn connect(addr: SocketAddr) -> Result<Self, StreamError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(SEND_TIMEOUT))?;
        info!("connected to collector at {}", addr);
        Ok(Self { stream })
    }

    /// Shut the socket down explicitly rather than relying on process exit.
    pub fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl MessageSink for CollectorStream {
    fn send(&mut self, frame: &[u8]) -> Result<(), StreamError> {
        self.stream.write_all(frame).map_err(|err| {
            if peer_closed(err.kind()) {
                StreamError::Closed
            } else {
                StreamError::Io(err)
            }
        })
    }
}

impl Drop for CollectorStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn peer_closed(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn sends_frames_to_the_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut stream = CollectorStream::connect(addr).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        stream.send(b"{\"type\":\"concentration\",\"timeStamp\":0}\r\n").unwrap();
        drop(stream);

        let mut received = Vec::new();
        peer.read_to_end(&mut received).unwrap();
        assert_eq!(
            received,
            b"{\"type\":\"concentration\",\"timeStamp\":0}\r\n"
        );
    }

    #[test]
    fn connect_to_dead_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(CollectorStream::connect(addr).is_err());
    }

    #[test]
    fn send_reports_closed_after_peer_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut stream = CollectorStream::connect(addr).unwrap();
        let (peer, _) = listener.accept().unwrap();
        drop(peer);
        drop(listener);

        // The first writes after the peer drops may still land in the send
        // buffer; keep writing until the failure surfaces.
        let mut result = Ok(());
        for _ in 0..200 {
            result = stream.send(b"x\r\n");
            if result.is_err() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(result, Err(StreamError::Closed)));
    }
}
