//! Upgrade-socket stream adapter
//!
//! Converts an upgraded WebSocket into a lazily pulled sequence of byte
//! chunks plus a serialized byte sink, and centralizes close/error
//! semantics behind an idempotent teardown guard. Optional early data
//! (base64url, negotiated out-of-band) is injected as the first chunk
//! before any live frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use crate::common::{PrefixedStream, Result, Stream};
use crate::error::Error;

/// An upgraded session socket
pub type UpgradedStream = WebSocketStream<PrefixedStream<Stream>>;

/// Idempotent teardown guard shared by both halves of a session.
///
/// The first caller of [`WsSink::close`] wins; every later call, from any
/// code path, is a no-op. Pumps park on [`Teardown::closed`] to observe
/// cancellation.
pub struct Teardown {
    closed: AtomicBool,
    notify: Notify,
}

impl Teardown {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns true only for the first caller.
    fn begin(&self) -> bool {
        let first = self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Wait until the session is torn down.
    pub async fn closed(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

/// Outbound half: sends one message per chunk, in call order.
#[derive(Clone)]
pub struct WsSink {
    inner: Arc<Mutex<SplitSink<UpgradedStream, Message>>>,
    guard: Arc<Teardown>,
}

impl WsSink {
    /// Send one chunk as a single binary message.
    pub async fn send(&self, data: Bytes) -> Result<()> {
        if self.guard.is_closed() {
            return Err(Error::StreamFault("send on closed upgrade socket".into()));
        }

        let mut sink = self.inner.lock().await;
        sink.send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| Error::StreamFault(e.to_string()))
    }

    /// Safe teardown: close the upgrade socket at most once.
    ///
    /// Callable from adapter close/error handlers, relay faults, and
    /// dispatch validation failures alike. Errors raised by a
    /// close-on-already-closed race are swallowed.
    pub async fn close(&self) {
        if !self.guard.begin() {
            return;
        }

        trace!("tearing down upgrade socket");
        let mut sink = self.inner.lock().await;
        if let Err(e) = sink.close().await {
            debug!("close on torn-down socket: {}", e);
        }
    }

    pub fn guard(&self) -> Arc<Teardown> {
        self.guard.clone()
    }
}

/// Inbound half: a lazily pulled sequence of received chunks.
pub struct WsSource {
    inner: SplitStream<UpgradedStream>,
    early: Option<Result<Bytes>>,
    sink: WsSink,
}

impl WsSource {
    /// Pull the next chunk.
    ///
    /// Returns `Ok(None)` at end-of-stream (remote close, already torn
    /// down). A remote-initiated close performs teardown before
    /// signalling the end. Frames arriving after cancellation are
    /// dropped.
    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        if let Some(early) = self.early.take() {
            return early.map(Some);
        }

        loop {
            if self.sink.guard.is_closed() {
                return Ok(None);
            }

            match self.inner.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(Bytes::from(data))),
                Some(Ok(Message::Text(text))) => return Ok(Some(Bytes::from(text.into_bytes()))),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!("received close frame: {:?}", frame);
                    self.sink.close().await;
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {
                    return Err(Error::StreamFault("unexpected raw frame".into()));
                }
                Some(Err(e)) => return Err(Error::StreamFault(e.to_string())),
                None => {
                    self.sink.close().await;
                    return Ok(None);
                }
            }
        }
    }

    /// Cancel the source: future frames are dropped and the socket is
    /// torn down. Idempotent with every other teardown path.
    pub async fn cancel(&mut self) {
        self.sink.close().await;
    }
}

/// Split an upgraded socket into its chunk source and sink.
///
/// An invalid early-data token is reported by the first [`WsSource::next`]
/// call, before any live frame is delivered.
pub fn channel(ws: UpgradedStream, early_data: Option<&str>) -> (WsSource, WsSink) {
    let early = match early_data {
        Some(token) if !token.is_empty() => Some(decode_early_data(token)),
        _ => None,
    };

    let (sink_half, stream_half) = ws.split();
    let sink = WsSink {
        inner: Arc::new(Mutex::new(sink_half)),
        guard: Teardown::new(),
    };
    let source = WsSource {
        inner: stream_half,
        early,
        sink: sink.clone(),
    };

    (source, sink)
}

fn decode_early_data(token: &str) -> Result<Bytes> {
    URL_SAFE_NO_PAD
        .decode(token.trim_end_matches('='))
        .map(Bytes::from)
        .map_err(|e| Error::Protocol(format!("invalid early data: {}", e)))
}
