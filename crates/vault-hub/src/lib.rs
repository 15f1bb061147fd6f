//! Multi-process coordination for the bridge.
//!
//! One process per machine binds the well-known loopback port and becomes the
//! host: it runs the HTTP+WebSocket hub that editor plugins connect to. Every
//! other process attaches as an RPC client and proxies vault operations to
//! the host over `POST /rpc`. Both sides expose the same [`VaultLink`]
//! surface so callers never care which role they got.

pub mod elector;
pub mod hub;
pub mod protocol;
pub mod rpc;
pub mod server;

pub use elector::{ElectError, ProbeOutcome, Role, elect, probe_health};
pub use hub::{VaultHub, VaultLink};
pub use protocol::OperationResponse;
pub use rpc::RemoteRpcBridge;
pub use server::start_server;
