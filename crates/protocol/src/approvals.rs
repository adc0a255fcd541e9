//! Approval endpoint shapes
//!
//! The gateway exposes a poll endpoint returning pending human-approval
//! requests and a resolution endpoint accepting approve/deny. Field names
//! are the gateway's (camelCase); every field beyond `id` is optional and
//! parsed defensively.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response body of the approval poll endpoint. Older gateways report the
/// list under `approvals`, newer ones under `pending`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalPoll {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<Vec<ApprovalEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approvals: Option<Vec<ApprovalEntry>>,
}

impl ApprovalPoll {
    /// Entries that are still awaiting resolution.
    pub fn live_entries(self) -> Vec<ApprovalEntry> {
        self.pending
            .or(self.approvals)
            .unwrap_or_default()
            .into_iter()
            .filter(ApprovalEntry::is_live)
            .collect()
    }
}

/// One approval request as reported by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Epoch milliseconds; may drift between polls for the same id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<i64>,
}

impl ApprovalEntry {
    /// Only entries with `status` absent or equal to `pending` are live.
    pub fn is_live(&self) -> bool {
        matches!(self.status.as_deref(), None | Some("pending"))
    }

    /// Absolute deadline in epoch milliseconds, when the gateway supplies
    /// one. `deadline` wins over `timeoutAt` wins over `expiresAt`.
    pub fn absolute_deadline_ms(&self) -> Option<i64> {
        self.deadline.or(self.timeout_at).or(self.expires_at)
    }
}

/// Resolution action for an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Deny,
}

impl ApprovalAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::Deny => "deny",
        }
    }
}

/// Response body of the resolution endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub ok: bool,
}
