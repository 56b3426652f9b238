//! Client library for the Tessera daemon
//!
//! [`DaemonClient`] speaks the line-delimited JSON-RPC protocol over the
//! per-root socket; [`ensure_daemon`] starts a daemon on demand.

pub mod client;
pub mod error;
pub mod lifecycle;

pub use client::DaemonClient;
pub use error::{ClientError, Result};
pub use lifecycle::{ensure_daemon, is_daemon_running, spawn_daemon};
