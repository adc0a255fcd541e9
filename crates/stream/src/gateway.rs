//! Gateway REST client
//!
//! The approval workflow runs over plain request/response HTTP, independent
//! of the event stream: a poll endpoint for the pending set and a resolution
//! endpoint for approve/deny. The trait seam exists so the coordinator can
//! be driven by a scripted API in tests.

use std::future::Future;

use agentdeck_protocol::{ApprovalAction, ApprovalPoll, ResolveOutcome};
use serde_json::json;

use crate::error::GatewayError;

/// Approval surface consumed by the coordinator.
pub trait ApprovalApi: Send + Sync + 'static {
    /// Current pending set. Failures are swallowed by the coordinator
    /// (stale data retained), so implementations just report them.
    fn fetch_pending(&self) -> impl Future<Output = Result<ApprovalPoll, GatewayError>> + Send;

    /// Resolve one request. At-least-once submission; exactly-once local
    /// effect is the coordinator's job.
    fn resolve(
        &self,
        id: &str,
        action: ApprovalAction,
    ) -> impl Future<Output = Result<ResolveOutcome, GatewayError>> + Send;
}

/// HTTP client against the gateway's approval endpoints.
pub struct HttpGateway {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            token,
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

impl ApprovalApi for HttpGateway {
    async fn fetch_pending(&self) -> Result<ApprovalPoll, GatewayError> {
        let url = format!("{}/approvals", self.base_url);
        let poll = self
            .request(self.http.get(&url))
            .send()
            .await?
            .error_for_status()?
            .json::<ApprovalPoll>()
            .await?;
        Ok(poll)
    }

    async fn resolve(
        &self,
        id: &str,
        action: ApprovalAction,
    ) -> Result<ResolveOutcome, GatewayError> {
        let url = format!("{}/approvals/{}/resolve", self.base_url, id);
        let outcome = self
            .request(self.http.post(&url))
            .json(&json!({ "action": action.as_str() }))
            .send()
            .await?
            .error_for_status()?
            .json::<ResolveOutcome>()
            .await?;
        Ok(outcome)
    }
}
