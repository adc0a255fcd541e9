//! AgentDeck stream core
//!
//! The realtime coordination layer between a remote agent gateway and the
//! local UI store. One persistent event channel is supervised with
//! exponential-backoff reconnect; inbound envelopes are demultiplexed per
//! session key; a per-session watchdog force-clears generations that go
//! silent; and an independent approval coordinator races countdown deadlines
//! against explicit user resolution.
//!
//! Each subsystem is a tokio actor: commands over mpsc, lock-free state
//! snapshots via `arc-swap`. Nothing in this crate propagates a panic or an
//! unhandled error across an async boundary — failures degrade to state.

pub mod approvals;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

pub use approvals::{
    ApprovalConfig, ApprovalCoordinator, ApprovalQueueSnapshot, ApprovalView, PendingApproval,
};
pub use error::{GatewayError, TransportError};
pub use gateway::{ApprovalApi, HttpGateway};
pub use store::{MemoryStore, SessionStore};
pub use supervisor::{ConnectionSnapshot, ConnectionSupervisor, StreamConfig};
pub use transport::{StreamTransport, TransportConn, TransportSignal, WsTransport};
