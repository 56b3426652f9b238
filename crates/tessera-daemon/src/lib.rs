//! # Tessera daemon
//!
//! One long-lived runtime per project root, reachable over
//! `<root>/.tessera/daemon.sock` with line-delimited JSON-RPC.
//!
//! | Module | Role |
//! |--------|------|
//! | [`lifecycle`] | `daemon.json` / `client.json`, liveness probes, stale recovery |
//! | [`server`] | Accept loop and per-connection request handling |
//! | [`daemon`] | Startup, auto reload wiring, ordered teardown |

pub mod daemon;
pub mod error;
mod handlers;
pub mod lifecycle;
pub mod server;

pub use daemon::{runtime_options, Daemon};
pub use error::{DaemonError, Result};
pub use handlers::DaemonContext;
pub use lifecycle::{
    acquire_client_slot, claim, current_client, is_root_locked, probe, recover_stale,
    release_client_slot, ClientMetadata, DaemonMetadata, DaemonState, Probe, RootLock,
};
pub use server::{Connections, Server};
