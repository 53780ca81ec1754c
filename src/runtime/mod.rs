//! External runtime collaborator.
//!
//! The bridge talks to the runtime only through the traits in `traits.rs`:
//! a remote-call primitive and connection lifecycle hooks. `ws.rs` provides
//! both over a WebSocket; tests substitute scripted fakes.

pub mod traits;
pub mod types;
pub mod ws;

pub use traits::{Connector, RuntimeClient};
pub use types::{RemoteReply, RemoteRequest, TransportError};
pub use ws::{Frame, Inbound, WsRuntime};
