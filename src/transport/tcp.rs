//! TCP transport implementation

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::common::{Address, Result, Stream};

use super::Transport;

/// TCP transport - raw TCP connections
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, addr: &Address) -> Result<Stream> {
        let stream = match addr {
            Address::Socket(socket_addr) => TcpStream::connect(socket_addr).await?,
            Address::Domain(domain, port) => {
                TcpStream::connect(format!("{}:{}", domain, port)).await?
            }
        };

        // Disable Nagle's algorithm for lower latency
        stream.set_nodelay(true)?;

        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_to_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = Address::Socket(listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = TcpTransport::new().connect(&addr).await.unwrap();
        stream.write_all(b"hi").await.unwrap();

        assert_eq!(&server.await.unwrap(), b"hi");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let addr = Address::Socket("127.0.0.1:1".parse().unwrap());
        assert!(TcpTransport::new().connect(&addr).await.is_err());
    }
}
