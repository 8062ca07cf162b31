//! memdc - semantic memory service
//!
//! Stores short text memories in a Redis vector index, mirrors them into
//! Salesforce Data Cloud, and answers similarity search with tag filters.

pub mod auth;
pub mod config;
pub mod embedding;
pub mod error;
mod http;
pub mod index;
pub mod server;
pub mod service;
pub mod types;
pub mod warehouse;

pub use error::{MemdcError, Result};
pub use service::MemoryService;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
