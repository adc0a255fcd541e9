//! Gateway event channel types
//!
//! The gateway emits one JSON envelope per event, tagged by `type` with
//! camelCase payload fields. `GatewayEvent` mirrors the wire exactly;
//! `StreamEvent` is the normalized form the rest of the system routes on
//! (`tool_use`/`tool_result` collapse into `tool` phases).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection state of the event channel, owned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

/// Phase of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Calling,
    Done,
    Error,
}

/// Raw event envelope as delivered by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    Connected,
    Disconnected,
    Heartbeat,
    Chunk {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        session_key: String,
    },
    Thinking {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        session_key: String,
    },
    Tool {
        phase: ToolPhase,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        session_key: String,
    },
    ToolUse {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        session_key: String,
    },
    ToolResult {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        session_key: String,
    },
    UserMessage {
        message: String,
        session_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    Message {
        message: String,
        session_key: String,
    },
    Done {
        state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        session_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Opaque approval record; interpreted by the approval coordinator,
    /// never by the stream layer.
    ApprovalRequest(Value),
}

/// Normalized event routed through the dispatcher and into the store.
///
/// Ephemeral — exists only for the duration of dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected,
    Disconnected,
    Heartbeat,
    Chunk {
        session_key: String,
        text: String,
        run_id: Option<String>,
    },
    Thinking {
        session_key: String,
        text: String,
        run_id: Option<String>,
    },
    Tool {
        session_key: String,
        phase: ToolPhase,
        name: String,
        tool_call_id: Option<String>,
        args: Option<Value>,
        run_id: Option<String>,
    },
    UserMessage {
        session_key: String,
        message: String,
        source: Option<String>,
    },
    Message {
        session_key: String,
        message: String,
    },
    Done {
        session_key: String,
        state: String,
        error_message: Option<String>,
        run_id: Option<String>,
        message: Option<String>,
    },
    ApprovalRequest(Value),
}

impl StreamEvent {
    /// Normalize a wire envelope. `tool_use` becomes a `calling` tool phase,
    /// `tool_result` becomes `done` (or `error` when the result is flagged).
    pub fn from_wire(event: GatewayEvent) -> StreamEvent {
        match event {
            GatewayEvent::Connected => StreamEvent::Connected,
            GatewayEvent::Disconnected => StreamEvent::Disconnected,
            GatewayEvent::Heartbeat => StreamEvent::Heartbeat,
            GatewayEvent::Chunk {
                text,
                run_id,
                session_key,
            } => StreamEvent::Chunk {
                session_key,
                text,
                run_id,
            },
            GatewayEvent::Thinking {
                text,
                run_id,
                session_key,
            } => StreamEvent::Thinking {
                session_key,
                text,
                run_id,
            },
            GatewayEvent::Tool {
                phase,
                name,
                tool_call_id,
                args,
                run_id,
                session_key,
            } => StreamEvent::Tool {
                session_key,
                phase,
                name,
                tool_call_id,
                args,
                run_id,
            },
            GatewayEvent::ToolUse {
                name,
                tool_call_id,
                args,
                run_id,
                session_key,
            } => StreamEvent::Tool {
                session_key,
                phase: ToolPhase::Calling,
                name,
                tool_call_id,
                args,
                run_id,
            },
            GatewayEvent::ToolResult {
                name,
                tool_call_id,
                output,
                is_error,
                run_id,
                session_key,
            } => StreamEvent::Tool {
                session_key,
                phase: if is_error == Some(true) {
                    ToolPhase::Error
                } else {
                    ToolPhase::Done
                },
                name,
                tool_call_id,
                args: output,
                run_id,
            },
            GatewayEvent::UserMessage {
                message,
                session_key,
                source,
            } => StreamEvent::UserMessage {
                session_key,
                message,
                source,
            },
            GatewayEvent::Message {
                message,
                session_key,
            } => StreamEvent::Message {
                session_key,
                message,
            },
            GatewayEvent::Done {
                state,
                error_message,
                run_id,
                session_key,
                message,
            } => StreamEvent::Done {
                session_key,
                state,
                error_message,
                run_id,
                message,
            },
            GatewayEvent::ApprovalRequest(record) => StreamEvent::ApprovalRequest(record),
        }
    }

    /// Session key carried by the event, if any. Global events
    /// (`connected`/`disconnected`/`heartbeat`) and approval records
    /// have none.
    pub fn session_key(&self) -> Option<&str> {
        match self {
            StreamEvent::Chunk { session_key, .. }
            | StreamEvent::Thinking { session_key, .. }
            | StreamEvent::Tool { session_key, .. }
            | StreamEvent::UserMessage { session_key, .. }
            | StreamEvent::Message { session_key, .. }
            | StreamEvent::Done { session_key, .. } => Some(session_key),
            _ => None,
        }
    }

    /// True for the event kinds that count as generation activity and
    /// therefore re-arm the session watchdog.
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            StreamEvent::Chunk { .. } | StreamEvent::Thinking { .. } | StreamEvent::Tool { .. }
        )
    }
}
