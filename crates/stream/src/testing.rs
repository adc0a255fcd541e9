//! Test doubles shared across the crate's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agentdeck_protocol::{
    ApprovalAction, ApprovalEntry, ApprovalPoll, ConnectionState, ResolveOutcome, StreamEvent,
};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::error::{GatewayError, TransportError};
use crate::gateway::ApprovalApi;
use crate::store::SessionStore;
use crate::transport::{StreamTransport, TransportConn, TransportSignal};

/// Store that records every call for later assertions.
#[derive(Default)]
pub(crate) struct RecordingStore {
    events: Mutex<Vec<StreamEvent>>,
    states: Mutex<Vec<ConnectionState>>,
    cleared: Mutex<Vec<String>>,
    clear_all_calls: AtomicUsize,
}

impl RecordingStore {
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().unwrap().clone()
    }

    pub fn cleared(&self) -> Vec<String> {
        self.cleared.lock().unwrap().clone()
    }

    pub fn clear_all_count(&self) -> usize {
        self.clear_all_calls.load(Ordering::SeqCst)
    }
}

impl SessionStore for RecordingStore {
    fn process_event(&self, event: StreamEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn set_connection_state(&self, state: ConnectionState) {
        self.states.lock().unwrap().push(state);
    }

    fn clear_streaming_session(&self, session_key: &str) {
        self.cleared.lock().unwrap().push(session_key.to_string());
    }

    fn clear_all_streaming(&self) {
        self.clear_all_calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) enum ScriptedOutcome {
    Fail(&'static str),
    Serve(mpsc::Receiver<TransportSignal>),
}

/// Transport whose `open` calls pop from a script. An exhausted script
/// fails every further open, which is convenient for backoff tests.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    opens: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful open; the returned sender drives its signals.
    pub fn push_serve(&self) -> mpsc::Sender<TransportSignal> {
        let (tx, rx) = mpsc::channel(64);
        self.outcomes
            .lock()
            .unwrap()
            .push_back(ScriptedOutcome::Serve(rx));
        tx
    }

    pub fn push_fail(&self, reason: &'static str) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(ScriptedOutcome::Fail(reason));
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }
}

impl StreamTransport for ScriptedTransport {
    async fn open(&self) -> Result<TransportConn, TransportError> {
        self.opens.lock().unwrap().push(Instant::now());
        match self.outcomes.lock().unwrap().pop_front() {
            Some(ScriptedOutcome::Serve(rx)) => Ok(TransportConn::new(rx)),
            Some(ScriptedOutcome::Fail(reason)) => Err(TransportError::Connect(reason.to_string())),
            None => Err(TransportError::Connect("script exhausted".to_string())),
        }
    }
}

/// Approval API double: serves a configurable pending set and records
/// resolution attempts.
#[derive(Default)]
pub(crate) struct MockApi {
    pending: Mutex<Vec<ApprovalEntry>>,
    resolutions: Mutex<Vec<(String, ApprovalAction)>>,
    fail_next_resolve: AtomicBool,
    fail_polls: AtomicBool,
    resolve_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_pending(&self, entries: Vec<ApprovalEntry>) {
        *self.pending.lock().unwrap() = entries;
    }

    pub fn resolutions(&self) -> Vec<(String, ApprovalAction)> {
        self.resolutions.lock().unwrap().clone()
    }

    pub fn fail_next_resolve(&self) {
        self.fail_next_resolve.store(true, Ordering::SeqCst);
    }

    pub fn set_fail_polls(&self, fail: bool) {
        self.fail_polls.store(fail, Ordering::SeqCst);
    }

    /// Make every resolution block until the returned handle is notified.
    pub fn gate_resolutions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.resolve_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

impl ApprovalApi for MockApi {
    async fn fetch_pending(&self) -> Result<ApprovalPoll, GatewayError> {
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("poll unavailable".to_string()));
        }
        Ok(ApprovalPoll {
            pending: Some(self.pending.lock().unwrap().clone()),
            approvals: None,
        })
    }

    async fn resolve(
        &self,
        id: &str,
        action: ApprovalAction,
    ) -> Result<ResolveOutcome, GatewayError> {
        let gate = self.resolve_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.resolutions
            .lock()
            .unwrap()
            .push((id.to_string(), action));
        if self.fail_next_resolve.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Rejected("scripted failure".to_string()));
        }
        Ok(ResolveOutcome { ok: true })
    }
}
