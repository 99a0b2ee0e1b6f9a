use super::{Connector, ReadOutcome, Transport};
use crate::config::StreamConfig;
use crate::error::CaptureError;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

/// Connects to a framed source listening on a TCP port.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>, CaptureError> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|e| CaptureError::Connect(format!("cannot resolve {}: {}", self.addr, e)))?
            .collect();

        if addrs.is_empty() {
            return Err(CaptureError::Connect(format!(
                "{} resolved to no addresses",
                self.addr
            )));
        }
        Ok(addrs)
    }
}

impl Connector for TcpConnector {
    fn open(&self, config: &StreamConfig) -> Result<Box<dyn Transport>, CaptureError> {
        let mut last_error = None;

        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(config.read_timeout))?;
                    stream.set_nodelay(true)?;
                    tracing::debug!(%addr, "Connected");
                    return Ok(Box::new(TcpTransport {
                        stream: Some(stream),
                    }));
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(CaptureError::Connect(format!(
            "{}: {}",
            self.addr,
            last_error.map_or_else(|| "no address".to_string(), |e| e.to_string())
        )))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl Transport for TcpTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, CaptureError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(ReadOutcome::EndOfStream);
        };

        match stream.read(buf) {
            Ok(0) => Ok(ReadOutcome::EndOfStream),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::Idle)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Peer may already be gone
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn config() -> StreamConfig {
        StreamConfig {
            read_timeout: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(500),
            ..StreamConfig::default()
        }
    }

    #[test]
    fn test_read_idle_data_and_end_of_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(60));
            socket.write_all(b"hello").unwrap();
        });

        let connector = TcpConnector::new(addr.to_string());
        let mut transport = connector.open(&config()).unwrap();
        let mut buf = [0u8; 16];

        assert_eq!(transport.read_chunk(&mut buf).unwrap(), ReadOutcome::Idle);

        let mut received = Vec::new();
        loop {
            match transport.read_chunk(&mut buf).unwrap() {
                ReadOutcome::Data(n) => received.extend_from_slice(&buf[..n]),
                ReadOutcome::Idle => continue,
                ReadOutcome::EndOfStream => break,
            }
        }
        assert_eq!(received, b"hello");

        server.join().unwrap();
        transport.close();
        transport.close();
        assert_eq!(transport.read_chunk(&mut buf).unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_refused_connection_is_connect_error() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let connector = TcpConnector::new(addr.to_string());
        assert!(matches!(
            connector.open(&config()),
            Err(CaptureError::Connect(_))
        ));
        assert_eq!(connector.describe(), format!("tcp://{}", addr));
    }

    #[test]
    fn test_unresolvable_address_is_connect_error() {
        let connector = TcpConnector::new("not an address");
        assert!(matches!(
            connector.open(&config()),
            Err(CaptureError::Connect(_))
        ));
    }
}
