//! Tunnelium - a Trojan-over-WebSocket tunneling proxy
//!
//! # Architecture (Layered Pipeline)
//!
//! ```text
//! Listener (TCP + HTTP upgrade gate)
//! → Stream Adapter (WebSocket frames ⇆ byte chunks)
//! → Wire Header (authenticate, parse target)
//! → Relay (TCP tunnel, or DNS-over-HTTPS for UDP port 53)
//! ```
//!
//! ## Core Principles
//!
//! - The header is authenticated before any outbound work happens
//! - One session per upgrade; sessions are mutually isolated
//! - Teardown is idempotent and reachable from every failure path
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Stream, Address
//! ├── auth.rs          # Process-wide credential digest
//! ├── protocol/        # Wire header parser
//! ├── session/         # Upgrade gate, stream adapter, state machine
//! ├── relay/           # TCP relay, UDP/DNS-over-HTTPS relay
//! ├── transport/       # Raw outbound dialing
//! └── app/             # Runtime: listener and lifecycle
//! ```

// Core types
pub mod auth;
pub mod common;
pub mod error;

// Layered architecture
pub mod app;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod transport;

// Supporting modules
pub mod config;

// Re-exports for convenience
pub use auth::Credential;
pub use common::{Address, Stream};
pub use config::Config;
pub use error::{Error, Result};

// Architecture re-exports
pub use app::Runtime;
pub use protocol::{Command, ProtocolHeader};
pub use session::Session;
pub use transport::Transport;
