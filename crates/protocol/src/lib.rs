//! AgentDeck Protocol
//!
//! Wire types for the gateway's event channel and approval endpoints.
//! Events arrive as JSON envelopes tagged by `type`; approval shapes are
//! consumed from the gateway's REST surface.

pub mod approvals;
pub mod events;

pub use approvals::{ApprovalAction, ApprovalEntry, ApprovalPoll, ResolveOutcome};
pub use events::{ConnectionState, GatewayEvent, StreamEvent, ToolPhase};
