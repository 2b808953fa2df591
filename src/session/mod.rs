//! Session layer
//!
//! Responsibilities:
//! - Gate the HTTP upgrade and complete the WebSocket handshake
//! - Adapt the upgraded socket into chunk source/sink halves
//! - Drive the per-connection state machine and dispatch to a relay
//!
//! A session owns one upgrade socket and at most one outbound connection:
//!
//! ```text
//! AwaitingHeader → TunnelingTcp | TunnelingUdp → Closed
//! ```
//!
//! `Closed` is terminal and reachable from every state; entering it runs
//! the idempotent teardown exactly once.

pub mod adapter;
pub mod upgrade;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::Credential;
use crate::common::{Address, Result};
use crate::error::Error;
use crate::protocol::{self, Command};
use crate::relay;
use crate::relay::dns::DohResolver;
use crate::transport::Transport;

use adapter::{WsSink, WsSource};
use upgrade::Upgraded;

/// DNS port, the only UDP target the tunnel forwards
const DNS_PORT: u16 = 53;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHeader,
    TunnelingTcp,
    TunnelingUdp,
    Closed,
}

/// Per-connection session state machine
pub struct Session {
    peer: Address,
    credential: Arc<Credential>,
    transport: Arc<dyn Transport>,
    resolver: Arc<DohResolver>,
    state: SessionState,
}

impl Session {
    pub fn new(
        peer: Address,
        credential: Arc<Credential>,
        transport: Arc<dyn Transport>,
        resolver: Arc<DohResolver>,
    ) -> Self {
        Self {
            peer,
            credential,
            transport,
            resolver,
            state: SessionState::AwaitingHeader,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion.
    ///
    /// Every exit path, success or failure, ends in `Closed` and runs the
    /// teardown; re-entry is a no-op by construction.
    pub async fn run(mut self, upgraded: Upgraded) {
        let Upgraded { ws, early_data } = upgraded;
        let (mut source, sink) = adapter::channel(ws, early_data.as_deref());

        match self.tunnel(&mut source, &sink).await {
            Ok(()) => debug!("[{}] session finished", self.peer),
            Err(Error::AuthFailed) => warn!("[{}] authentication failed", self.peer),
            Err(
                e @ (Error::Protocol(_)
                | Error::UnsupportedCommand(_)
                | Error::UnsupportedUdpTarget(_)),
            ) => warn!("[{}] {}", self.peer, e),
            Err(e) => debug!("[{}] session error: {}", self.peer, e),
        }

        self.state = SessionState::Closed;
        sink.close().await;
    }

    /// Parse the first chunk as the wire header, dial exactly once, and
    /// hand the remaining chunks to the selected relay.
    async fn tunnel(&mut self, source: &mut WsSource, sink: &WsSink) -> Result<()> {
        let first = match source.next().await? {
            Some(chunk) => chunk,
            None => return Ok(()), // peer closed before sending a header
        };

        let header = protocol::parse_header(&first, &self.credential)?;
        // The header buffer may already carry payload; forward it as the
        // first write, ahead of any later chunk.
        let payload = first.slice(header.payload_offset.min(first.len())..);

        match header.command {
            Command::Connect => {
                self.state = SessionState::TunnelingTcp;
                debug!("[{}] tcp tunnel -> {}", self.peer, header.address);

                let (up, down) = relay::tcp::run(
                    self.transport.as_ref(),
                    &header.address,
                    payload,
                    source,
                    sink,
                )
                .await?;

                info!(
                    "[{}] closed: {} (↑{} ↓{})",
                    self.peer,
                    header.address,
                    relay::format_bytes(up),
                    relay::format_bytes(down),
                );
                Ok(())
            }
            Command::UdpAssociate => {
                let port = header.address.port();
                if port != DNS_PORT {
                    return Err(Error::UnsupportedUdpTarget(port));
                }

                self.state = SessionState::TunnelingUdp;
                debug!("[{}] dns tunnel -> {}", self.peer, header.address);
                relay::dns::run(&self.resolver, payload, source, sink).await
            }
        }
    }
}
