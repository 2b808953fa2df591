//! Transport layer
//!
//! Responsibilities:
//! - Establish raw outbound connections
//! - NO protocol parsing, NO content inspection
//!
//! This layer ONLY deals with dialing; the relays own the bytes.

mod tcp;

pub use tcp::TcpTransport;

use async_trait::async_trait;

use crate::common::{Address, Result, Stream};

/// Transport trait for establishing raw outbound connections.
///
/// Each session dials exactly once, through this seam, immediately after
/// its header parses.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to a remote address
    async fn connect(&self, addr: &Address) -> Result<Stream>;
}
