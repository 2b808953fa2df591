//! TCP relay
//!
//! Pumps bytes session→remote and remote→session once the outbound
//! connection is up. The two directions run as independent pumps; either
//! one ending, for any reason, tears the whole session down — half-close
//! is not modeled.

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf};
use tracing::debug;

use crate::common::{Address, Result, Stream};
use crate::error::Error;
use crate::session::adapter::{WsSink, WsSource};
use crate::transport::Transport;

/// Relay buffer size (32KB)
const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Dial the target and relay until either side closes.
///
/// `initial` is the tail of the header buffer — typically the start of a
/// TLS handshake — and is written before any later chunk. Returns the
/// byte totals (session→remote, remote→session).
pub async fn run(
    transport: &dyn Transport,
    target: &Address,
    initial: Bytes,
    source: &mut WsSource,
    sink: &WsSink,
) -> Result<(u64, u64)> {
    let remote = transport
        .connect(target)
        .await
        .map_err(|e| Error::Dial(format!("{}: {}", target, e)))?;

    let (remote_rd, mut remote_wr) = tokio::io::split(remote);

    if !initial.is_empty() {
        remote_wr.write_all(&initial).await?;
        remote_wr.flush().await?;
    }

    let download = tokio::spawn(download_pump(remote_rd, sink.clone()));

    // Upload: session → remote, chunks written in receipt order
    let guard = sink.guard();
    let mut uploaded = initial.len() as u64;
    let result = loop {
        let chunk = tokio::select! {
            _ = guard.closed() => break Ok(()),
            chunk = source.next() => chunk,
        };

        match chunk {
            Ok(Some(data)) => {
                if let Err(e) = remote_wr.write_all(&data).await {
                    break Err(Error::StreamFault(format!("remote write: {}", e)));
                }
                if let Err(e) = remote_wr.flush().await {
                    break Err(Error::StreamFault(format!("remote write: {}", e)));
                }
                uploaded += data.len() as u64;
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    // Either direction ending closes the whole session.
    sink.close().await;
    let _ = remote_wr.shutdown().await;
    let downloaded = download.await.unwrap_or(0);

    result.map(|()| (uploaded, downloaded))
}

/// Download: remote → session, one message per read, in read order.
async fn download_pump(mut remote_rd: ReadHalf<Stream>, sink: WsSink) -> u64 {
    let guard = sink.guard();
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            _ = guard.closed() => break,
            r = remote_rd.read(&mut buf) => match r {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("remote read ended: {}", e);
                    break;
                }
            },
        };

        // A send on a no-longer-open socket aborts this direction.
        if let Err(e) = sink.send(Bytes::copy_from_slice(&buf[..n])).await {
            debug!("tunnel send failed: {}", e);
            break;
        }
        total += n as u64;
    }

    sink.close().await;
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{IntoStream, PrefixedStream};
    use crate::session::adapter::{self, UpgradedStream};
    use crate::transport::TcpTransport;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::Message;
    use tokio_tungstenite::{accept_async, client_async, WebSocketStream};

    type ClientWs = WebSocketStream<Stream>;

    async fn ws_pair() -> (ClientWs, UpgradedStream) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = PrefixedStream::new(Bytes::new(), server_io.into_stream());

        let (client, server) = tokio::join!(
            client_async("ws://relay.test/", client_io.into_stream()),
            accept_async(server),
        );
        (client.unwrap().0, server.unwrap())
    }

    /// Echo server that answers each read with the same bytes.
    async fn spawn_echo_server() -> Address {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if socket.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        });
        Address::Socket(addr)
    }

    #[tokio::test]
    async fn test_initial_payload_and_chunks_echoed() {
        let target = spawn_echo_server().await;
        let (mut client, server) = ws_pair().await;
        let (mut source, sink) = adapter::channel(server, None);

        let transport = TcpTransport::new();
        let relay = tokio::spawn(async move {
            run(
                &transport,
                &target,
                Bytes::from_static(b"CLIENTHELLO"),
                &mut source,
                &sink,
            )
            .await
        });

        // First message back must be the echoed initial payload
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data(), b"CLIENTHELLO");

        // Later chunks are forwarded verbatim, in order
        client
            .send(Message::Binary(b"chunk-1".to_vec()))
            .await
            .unwrap();
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data(), b"chunk-1");

        client.close(None).await.unwrap();

        let (up, down) = tokio::time::timeout(Duration::from_secs(5), relay)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(up, 18); // CLIENTHELLO + chunk-1
        assert_eq!(down, 18);
    }

    #[tokio::test]
    async fn test_dial_failure_reported() {
        let (_client, server) = ws_pair().await;
        let (mut source, sink) = adapter::channel(server, None);

        // Port 1 on localhost: nothing listening
        let target = Address::Socket("127.0.0.1:1".parse().unwrap());
        let transport = TcpTransport::new();
        let err = run(&transport, &target, Bytes::new(), &mut source, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dial(_)));
    }

    #[tokio::test]
    async fn test_remote_close_tears_down_once() {
        // Server sends one reply then closes; the session must observe a
        // single teardown and the client a close frame.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = Address::Socket(listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
            // drop closes the connection
        });

        let (mut client, server) = ws_pair().await;
        let (mut source, sink) = adapter::channel(server, None);
        let guard = sink.guard();

        let transport = TcpTransport::new();
        let relay = tokio::spawn(async move {
            run(
                &transport,
                &target,
                Bytes::from_static(b"ping"),
                &mut source,
                &sink,
            )
            .await
        });

        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data(), b"ping");

        // Remote EOF → teardown → close frame reaches the client
        let closing = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match client.next().await {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        });
        closing.await.expect("close frame expected");

        tokio::time::timeout(Duration::from_secs(5), relay)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(guard.is_closed());
    }
}
