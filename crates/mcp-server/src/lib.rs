//! MCP server for the vault ⇄ knowledge-graph bridge.
//!
//! One process exposes two tool families over stdio: memory tools that drive
//! the graph client, and vault tools that drive whichever editor backend this
//! process ended up with after election (local WebSocket hub or remote RPC
//! bridge, or the subprocess CLI).

pub mod backend;
pub mod cli_backend;
pub mod server;

pub use backend::{HubBackend, UpdateNoteRequest, VaultBackend};
pub use cli_backend::CliBackend;
pub use server::BridgeServer;
