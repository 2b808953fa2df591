//! HTTP upgrade gate
//!
//! Reads the HTTP request head off the raw stream, answers 404 to
//! anything that is not a WebSocket upgrade, and otherwise completes the
//! server handshake over the already-consumed bytes. The
//! `Sec-WebSocket-Protocol` value doubles as the early-data token and is
//! echoed back so negotiating peers accept the handshake.

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::common::{PrefixedStream, Result, Stream};
use crate::error::Error;

use super::adapter::UpgradedStream;

/// Upper bound on the request head, matching common proxy practice
const MAX_REQUEST_HEAD: usize = 8 * 1024;

const NOT_FOUND_RESPONSE: &[u8] =
    b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nNot found";

/// A completed upgrade: the framed socket plus the raw early-data token.
pub struct Upgraded {
    pub ws: UpgradedStream,
    pub early_data: Option<String>,
}

/// Gate and complete the upgrade handshake.
///
/// Returns `Ok(None)` when the request was not an upgrade (a 404 was
/// written and the connection shut down).
pub async fn accept(mut stream: Stream) -> Result<Option<Upgraded>> {
    let head = read_request_head(&mut stream).await?;
    let header_section = head_section(&head);

    if !is_websocket_upgrade(header_section) {
        stream.write_all(NOT_FOUND_RESPONSE).await?;
        stream.flush().await?;
        let _ = stream.shutdown().await;
        return Ok(None);
    }

    let early_data = header_value(header_section, "sec-websocket-protocol");

    let ws_config = WebSocketConfig {
        max_message_size: Some(64 << 20), // 64 MB
        max_frame_size: Some(16 << 20),   // 16 MB
        ..Default::default()
    };

    let subprotocol = early_data.clone();
    let replay = PrefixedStream::new(Bytes::from(head), stream);
    let ws = accept_hdr_async_with_config(
        replay,
        move |_request: &Request, mut response: Response| -> std::result::Result<Response, ErrorResponse> {
            if let Some(value) = subprotocol.and_then(|p| p.parse::<HeaderValue>().ok()) {
                response.headers_mut().insert("sec-websocket-protocol", value);
            }
            Ok(response)
        },
        Some(ws_config),
    )
    .await
    .map_err(|e| Error::Protocol(format!("websocket handshake failed: {}", e)))?;

    Ok(Some(Upgraded { ws, early_data }))
}

/// Read until the end of the request head (CRLFCRLF). Returns everything
/// consumed, including any bytes past the boundary, for replay.
async fn read_request_head(stream: &mut Stream) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(512);
    let mut tmp = [0u8; 1024];

    loop {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Err(Error::StreamFault("client closed before handshake".into()));
        }
        buf.extend_from_slice(&tmp[..n]);
        if find_head_end(&buf).is_some() {
            return Ok(buf);
        }
        if buf.len() > MAX_REQUEST_HEAD {
            return Err(Error::Protocol("request head too large".into()));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn head_section(buf: &[u8]) -> &[u8] {
    match find_head_end(buf) {
        Some(end) => &buf[..end],
        None => buf,
    }
}

fn is_websocket_upgrade(head: &[u8]) -> bool {
    header_value(head, "upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Case-insensitive lookup of a header value in a raw request head.
fn header_value(head: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(head);
    for line in text.split("\r\n").skip(1) {
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case(name) {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IntoStream;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::client_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::protocol::Message;

    #[tokio::test]
    async fn test_non_upgrade_request_gets_404() {
        let (mut client_io, server_io) = tokio::io::duplex(4096);

        let server = tokio::spawn(accept(server_io.into_stream()));

        client_io
            .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        client_io.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 404"));

        assert!(server.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_websocket_upgrade_accepted() {
        let (client_io, server_io) = tokio::io::duplex(4096);

        let server = tokio::spawn(accept(server_io.into_stream()));

        let (mut client, _) = client_async("ws://upgrade.test/", client_io.into_stream())
            .await
            .unwrap();

        let upgraded = server.await.unwrap().unwrap().expect("upgrade expected");
        assert!(upgraded.early_data.is_none());

        // The handshake replay must leave framing intact in both directions
        let mut ws = upgraded.ws;
        client
            .send(Message::Binary(b"ping".to_vec()))
            .await
            .unwrap();
        let msg = ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data(), b"ping");
    }

    #[tokio::test]
    async fn test_early_data_header_extracted_and_echoed() {
        let (client_io, server_io) = tokio::io::duplex(4096);

        let server = tokio::spawn(accept(server_io.into_stream()));

        let mut request = "ws://upgrade.test/".into_client_request().unwrap();
        request
            .headers_mut()
            .insert("sec-websocket-protocol", "dG9rZW4".parse().unwrap());

        let (_client, response) = client_async(request, client_io.into_stream())
            .await
            .unwrap();
        assert_eq!(
            response
                .headers()
                .get("sec-websocket-protocol")
                .and_then(|v| v.to_str().ok()),
            Some("dG9rZW4")
        );

        let upgraded = server.await.unwrap().unwrap().expect("upgrade expected");
        assert_eq!(upgraded.early_data.as_deref(), Some("dG9rZW4"));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let head = b"GET / HTTP/1.1\r\nUPGRADE: WebSocket\r\nX-Other: 1\r\n\r\n";
        assert!(is_websocket_upgrade(head));
        assert_eq!(header_value(head, "x-other").as_deref(), Some("1"));
        assert_eq!(header_value(head, "missing"), None);
    }
}
