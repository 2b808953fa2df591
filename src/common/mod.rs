//! Common types and abstractions
//!
//! This module defines the core types used throughout the application:
//! - Stream: unified async I/O abstraction
//! - PrefixedStream: replay already-consumed bytes ahead of a live stream
//! - Address: network address representation

mod address;
mod stream;

pub use address::Address;
pub use stream::{IntoStream, PrefixedStream, Stream};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
