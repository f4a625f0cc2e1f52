//! Core library for a caching, protocol-aware proxy in front of a Source
//! engine game server's UDP query port.
//!
//! This crate has no knowledge of configuration files, environment
//! variables, or command-line flags -- see the `sqproxy` binary crate for
//! that. Everything here operates on already-resolved values.

pub mod cache;
pub mod challenge;
pub mod codec;
pub mod error;
pub mod health;
pub mod listener;
pub mod proxy;
pub mod refresh;
pub mod transport;

pub use proxy::{ProxyConfig, QueryProxy};
pub use refresh::RefreshConfig;
