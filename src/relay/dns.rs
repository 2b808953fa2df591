//! UDP/DNS relay
//!
//! Only DNS traffic (declared port 53) is tunneled over the UDP command.
//! Chunks carry length-framed datagrams; each datagram is resolved with a
//! DNS-over-HTTPS POST and the raw answer is sent back under the same
//! framing, so the peer demultiplexes identically in both directions.
//!
//! Framing assumes whole `[length][data]` frames per chunk; a frame split
//! across two chunks is not reassembled. A truncated trailing frame is
//! dropped with a warning rather than misparsed.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::common::Result;
use crate::error::Error;
use crate::session::adapter::{WsSink, WsSource};

const DOH_CONTENT_TYPE: &str = "application/dns-message";
const DOH_TIMEOUT: Duration = Duration::from_secs(5);

/// DNS-over-HTTPS resolver client.
///
/// Built once at startup and shared across sessions; the underlying HTTP
/// client pools connections to the resolver.
pub struct DohResolver {
    client: reqwest::Client,
    url: String,
}

impl DohResolver {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOH_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build DoH client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Resolve one raw DNS query, returning the raw answer bytes.
    pub async fn query(&self, packet: &[u8]) -> Result<Bytes> {
        let response = self
            .client
            .post(&self.url)
            .header("content-type", DOH_CONTENT_TYPE)
            .header("accept", DOH_CONTENT_TYPE)
            .body(packet.to_vec())
            .send()
            .await
            .map_err(|e| Error::Resolver(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Resolver(format!(
                "resolver returned status {}",
                response.status().as_u16()
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::Resolver(format!("failed to read answer: {}", e)))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Relay length-framed DNS datagrams until the session ends.
///
/// `initial` is the tail of the header buffer and is demultiplexed before
/// any later chunk. A resolver failure aborts only that datagram's round
/// trip; a send failure on the upgrade socket ends the session.
pub async fn run(
    resolver: &DohResolver,
    initial: Bytes,
    source: &mut WsSource,
    sink: &WsSink,
) -> Result<()> {
    relay_chunk(resolver, &initial, sink).await?;

    let guard = sink.guard();
    let result = loop {
        let chunk = tokio::select! {
            _ = guard.closed() => break Ok(()),
            chunk = source.next() => chunk,
        };

        match chunk {
            Ok(Some(data)) => {
                if let Err(e) = relay_chunk(resolver, &data, sink).await {
                    break Err(e);
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    sink.close().await;
    result
}

/// Demultiplex one chunk and resolve each complete datagram in it.
async fn relay_chunk(resolver: &DohResolver, chunk: &[u8], sink: &WsSink) -> Result<()> {
    for datagram in split_frames(chunk) {
        let answer = match resolver.query(datagram).await {
            Ok(answer) => answer,
            Err(e) => {
                // Recovered locally: this datagram is dropped
                warn!("dns query failed: {}", e);
                continue;
            }
        };

        if answer.len() > u16::MAX as usize {
            warn!("dns answer too large to frame ({} bytes)", answer.len());
            continue;
        }

        debug!("doh answered with {} bytes", answer.len());
        let mut framed = BytesMut::with_capacity(answer.len() + 2);
        framed.put_u16(answer.len() as u16);
        framed.extend_from_slice(&answer);
        sink.send(framed.freeze()).await?;
    }
    Ok(())
}

/// Iterate the complete `[u16 BE length][data]` frames in a chunk.
///
/// Reassembly across chunks is not attempted; a truncated trailing frame
/// is dropped with a warning.
fn split_frames(chunk: &[u8]) -> Vec<&[u8]> {
    let mut frames = Vec::new();
    let mut index = 0;

    while index + 2 <= chunk.len() {
        let len = u16::from_be_bytes([chunk[index], chunk[index + 1]]) as usize;
        let end = index + 2 + len;
        if end > chunk.len() {
            warn!(
                "dropping truncated datagram frame ({} declared, {} available)",
                len,
                chunk.len() - index - 2
            );
            return frames;
        }
        frames.push(&chunk[index + 2..end]);
        index = end;
    }

    if index < chunk.len() {
        warn!("dropping {} stray trailing bytes", chunk.len() - index);
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 2);
        out.extend_from_slice(&(data.len() as u16).to_be_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_split_single_frame() {
        let chunk = frame(b"query");
        assert_eq!(split_frames(&chunk), vec![&b"query"[..]]);
    }

    #[test]
    fn test_split_multiple_frames() {
        let mut chunk = frame(b"one");
        chunk.extend_from_slice(&frame(b"two"));
        assert_eq!(split_frames(&chunk), vec![&b"one"[..], &b"two"[..]]);
    }

    #[test]
    fn test_truncated_trailing_frame_dropped() {
        let mut chunk = frame(b"whole");
        chunk.extend_from_slice(&[0x00, 0x10, 0xaa]); // declares 16, carries 1
        assert_eq!(split_frames(&chunk), vec![&b"whole"[..]]);
    }

    #[test]
    fn test_empty_chunk_yields_nothing() {
        assert!(split_frames(&[]).is_empty());
        assert!(split_frames(&[0x00]).is_empty());
    }

    #[test]
    fn test_zero_length_frame() {
        let chunk = frame(b"");
        assert_eq!(split_frames(&chunk), vec![&b""[..]]);
    }

    #[test]
    fn test_resolver_construction() {
        let resolver = DohResolver::new("https://1.1.1.1/dns-query").unwrap();
        assert_eq!(resolver.url(), "https://1.1.1.1/dns-query");
    }

    // Integration test requires network access
    #[tokio::test]
    #[ignore]
    async fn test_doh_query_integration() {
        let resolver = DohResolver::new("https://1.1.1.1/dns-query").unwrap();

        // Minimal DNS query for example.com A record
        let query = [
            0x12, 0x34, // transaction id
            0x01, 0x00, // flags: recursion desired
            0x00, 0x01, // questions: 1
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // answer/authority/additional: 0
            0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x03, b'c', b'o', b'm',
            0x00, // qname
            0x00, 0x01, // qtype: A
            0x00, 0x01, // qclass: IN
        ];

        let answer = resolver.query(&query).await.unwrap();
        assert!(answer.len() > 12, "answer should carry a DNS header");
    }
}
