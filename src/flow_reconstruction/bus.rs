use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{info, warn};

use crate::error_handling::types::BusError;

/// Non-blocking source of newline-delimited bus messages. `try_recv` returns
/// `Ok(None)` when nothing is pending so the consuming loop can interleave
/// cache-age checks between polls.
pub trait BusSource: Send {
    fn try_recv(&mut self) -> Result<Option<String>, BusError>;
}

/// Bus subscriber over a plain TCP stream carrying one JSON message per
/// line. Connects lazily and reconnects after a disconnect is reported.
pub struct TcpBusSource {
    endpoint: String,
    stream: Option<TcpStream>,
    pending: Vec<u8>,
}

impl TcpBusSource {
    const READ_TIMEOUT: Duration = Duration::from_millis(10);
    const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            stream: None,
            pending: Vec::new(),
        }
    }

    fn ensure_connected(&mut self) -> Result<&mut TcpStream, BusError> {
        if self.stream.is_none() {
            let addr = self
                .endpoint
                .to_socket_addrs()
                .map_err(BusError::ConnectFailed)?
                .next()
                .ok_or_else(|| {
                    BusError::ConnectFailed(io::Error::new(
                        ErrorKind::InvalidInput,
                        "endpoint resolved to no address",
                    ))
                })?;
            // Bounded connect; an unreachable endpoint must not stall the
            // poll loop for the OS default timeout.
            let stream = TcpStream::connect_timeout(&addr, Self::CONNECT_TIMEOUT)
                .map_err(BusError::ConnectFailed)?;
            stream
                .set_read_timeout(Some(Self::READ_TIMEOUT))
                .map_err(BusError::ConnectFailed)?;
            info!("Connected to event bus at {}", self.endpoint);
            self.stream = Some(stream);
        }
        Ok(self.stream.as_mut().unwrap())
    }

    fn take_line(&mut self) -> Option<String> {
        let newline = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=newline).collect();
        let text = String::from_utf8_lossy(&line[..newline]).into_owned();
        Some(text.trim_end_matches('\r').to_string())
    }
}

impl BusSource for TcpBusSource {
    fn try_recv(&mut self) -> Result<Option<String>, BusError> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        let stream = self.ensure_connected()?;
        let mut buf = [0u8; 4096];
        match stream.read(&mut buf) {
            Ok(0) => {
                warn!("Event bus closed the connection");
                self.stream = None;
                self.pending.clear();
                Err(BusError::Disconnected)
            }
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                Ok(self.take_line())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(None)
            }
            Err(e) => {
                self.stream = None;
                self.pending.clear();
                Err(BusError::ReadFailed(e))
            }
        }
    }
}

/// In-memory source for tests.
#[derive(Default)]
pub struct MemoryBusSource {
    messages: VecDeque<String>,
}

impl MemoryBusSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push_back(message.into());
    }
}

impl BusSource for MemoryBusSource {
    fn try_recv(&mut self) -> Result<Option<String>, BusError> {
        Ok(self.messages.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_source_splits_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let publisher = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"{\"a\":1}\n{\"b\":").unwrap();
            conn.write_all(b"2}\r\n").unwrap();
            conn
        });

        let mut source = TcpBusSource::new(addr.to_string());
        let mut lines = Vec::new();
        while lines.len() < 2 {
            if let Ok(Some(line)) = source.try_recv() {
                lines.push(line);
            }
        }
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        drop(publisher.join().unwrap());
    }

    #[test]
    fn test_tcp_source_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let publisher = std::thread::spawn(move || {
            let (conn, _) = listener.accept().unwrap();
            drop(conn);
        });

        let mut source = TcpBusSource::new(addr.to_string());
        let result = loop {
            match source.try_recv() {
                Ok(None) => continue,
                other => break other,
            }
        };
        assert!(matches!(result, Err(BusError::Disconnected)));
        publisher.join().unwrap();
    }

    #[test]
    fn test_memory_source_drains_in_order() {
        let mut source = MemoryBusSource::new();
        source.push("first");
        source.push("second");
        assert_eq!(source.try_recv().unwrap(), Some("first".to_string()));
        assert_eq!(source.try_recv().unwrap(), Some("second".to_string()));
        assert_eq!(source.try_recv().unwrap(), None);
    }
}
