//! Approval coordinator
//!
//! Surfaces pending human-approval requests and resolves each exactly once
//! locally — by explicit user action or by automatic deny when the deadline
//! elapses. Runs as its own actor on two independent timers: a poll
//! interval refreshing the pending set and a 1-second tick driving the
//! countdown. Submission to the gateway is at-least-once; the exactly-once
//! guarantee is local, enforced by the `resolving` and `dismissed` markers.
//!
//! Deadlines are memoized per request id on first observation: an absolute
//! deadline supplied by the gateway wins, otherwise first-observed time
//! plus the request's `timeoutMs`, otherwise plus the default 30 s window.
//! Repeated polls never shift a deadline, even when the gateway's
//! `requestedAt` drifts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use agentdeck_protocol::{ApprovalAction, ApprovalEntry, ApprovalPoll};
use arc_swap::ArcSwap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::gateway::ApprovalApi;

const COMMAND_BUFFER: usize = 64;
const INTERNAL_BUFFER: usize = 64;

/// Tunables for the approval workflow. Defaults carry the reference
/// behavior.
#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    /// Cadence of pending-set refreshes.
    pub poll_interval: Duration,
    /// Cadence of the countdown/auto-deny tick.
    pub tick_interval: Duration,
    /// Deadline window when the gateway supplies no deadline of its own.
    pub default_timeout: Duration,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            tick_interval: Duration::from_secs(1),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// One pending request with its memoized deadline.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub id: String,
    pub action: Option<String>,
    pub tool: Option<String>,
    pub input: Option<Value>,
    pub agent_name: Option<String>,
    pub session_key: Option<String>,
    pub context: Option<String>,
    /// Epoch ms, pinned to the first observed value.
    pub requested_at: i64,
    pub deadline: Instant,
}

/// Queue entry with the remaining time at publish.
#[derive(Debug, Clone)]
pub struct ApprovalView {
    pub request: PendingApproval,
    pub remaining: Duration,
}

/// Published queue state: pending, non-dismissed requests oldest-first,
/// with the active index clamped to the visible set.
#[derive(Debug, Clone, Default)]
pub struct ApprovalQueueSnapshot {
    pub queue: Vec<ApprovalView>,
    pub active_index: usize,
}

enum Command {
    Resolve {
        id: String,
        action: ApprovalAction,
        reply: oneshot::Sender<Result<(), GatewayError>>,
    },
    Refresh,
    SetActive(usize),
    Shutdown,
}

enum Internal {
    PollDone(Result<ApprovalPoll, GatewayError>),
    ResolutionDone {
        id: String,
        result: Result<(), GatewayError>,
        reply: Option<oneshot::Sender<Result<(), GatewayError>>>,
    },
}

/// Handle to the running coordinator actor (cheap to Clone).
#[derive(Clone)]
pub struct ApprovalCoordinator {
    command_tx: mpsc::Sender<Command>,
    snapshot: Arc<ArcSwap<ApprovalQueueSnapshot>>,
}

impl ApprovalCoordinator {
    pub fn spawn<A: ApprovalApi>(api: Arc<A>, config: ApprovalConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_BUFFER);
        let snapshot = Arc::new(ArcSwap::from_pointee(ApprovalQueueSnapshot::default()));

        let actor = ApprovalActor {
            api,
            poll_interval: config.poll_interval,
            tick_interval: config.tick_interval,
            default_timeout: config.default_timeout,
            snapshot: snapshot.clone(),
            internal_tx,
            entries: Vec::new(),
            deadlines: HashMap::new(),
            dismissed: HashSet::new(),
            resolving: HashSet::new(),
            active_index: 0,
            poll_in_flight: false,
        };
        tokio::spawn(actor.run(command_rx, internal_rx));

        Self {
            command_tx,
            snapshot,
        }
    }

    /// Resolve one request. Errors surface to the caller; the deadline race
    /// for other requests continues regardless.
    pub async fn resolve(&self, id: &str, action: ApprovalAction) -> Result<(), GatewayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = Command::Resolve {
            id: id.to_string(),
            action,
            reply: reply_tx,
        };
        if self.command_tx.send(cmd).await.is_err() {
            return Err(GatewayError::Closed);
        }
        reply_rx.await.unwrap_or(Err(GatewayError::Closed))
    }

    /// Trigger an immediate re-poll (e.g. on an `approval_request` stream
    /// event).
    pub async fn refresh(&self) {
        let _ = self.command_tx.send(Command::Refresh).await;
    }

    /// Move the presented position within the queue; clamped to the
    /// visible set.
    pub async fn set_active(&self, index: usize) {
        let _ = self.command_tx.send(Command::SetActive(index)).await;
    }

    /// Lock-free queue read.
    pub fn snapshot(&self) -> Arc<ApprovalQueueSnapshot> {
        self.snapshot.load_full()
    }

    /// Stop the actor; cancels the poll interval and the deadline tick
    /// together.
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown).await;
    }
}

#[derive(Clone)]
struct DeadlineMemo {
    deadline: Instant,
    requested_at: i64,
}

struct ApprovalActor<A: ApprovalApi> {
    api: Arc<A>,
    poll_interval: Duration,
    tick_interval: Duration,
    default_timeout: Duration,
    snapshot: Arc<ArcSwap<ApprovalQueueSnapshot>>,
    internal_tx: mpsc::Sender<Internal>,
    /// Visible queue: live, non-dismissed, sorted oldest-first.
    entries: Vec<PendingApproval>,
    /// Per-id deadline memo; survives re-polls, dropped when the id
    /// disappears from the gateway's pending set.
    deadlines: HashMap<String, DeadlineMemo>,
    /// Ids resolved locally while the backend catches up.
    dismissed: HashSet<String>,
    /// Ids with a resolution call in flight.
    resolving: HashSet<String>,
    active_index: usize,
    poll_in_flight: bool,
}

impl<A: ApprovalApi> ApprovalActor<A> {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<Command>,
        mut internal_rx: mpsc::Receiver<Internal>,
    ) {
        let mut poll_timer = interval(self.poll_interval);
        let mut tick_timer = interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = poll_timer.tick() => self.request_poll(),
                _ = tick_timer.tick() => self.on_tick(),
                cmd = command_rx.recv() => match cmd {
                    Some(Command::Resolve { id, action, reply }) => {
                        self.on_resolve(id, action, reply);
                    }
                    Some(Command::Refresh) => self.request_poll(),
                    Some(Command::SetActive(index)) => {
                        self.active_index = index;
                        self.clamp_active();
                        self.publish();
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(msg) = internal_rx.recv() => match msg {
                    Internal::PollDone(result) => self.on_poll_done(result),
                    Internal::ResolutionDone { id, result, reply } => {
                        self.on_resolution_done(id, result, reply);
                    }
                },
            }
        }
    }

    fn request_poll(&mut self) {
        if self.poll_in_flight {
            return;
        }
        self.poll_in_flight = true;
        let api = self.api.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_pending().await;
            let _ = tx.send(Internal::PollDone(result)).await;
        });
    }

    fn on_poll_done(&mut self, result: Result<ApprovalPoll, GatewayError>) {
        self.poll_in_flight = false;
        match result {
            Ok(poll) => self.apply_poll(poll),
            // Availability of the queue is not worth reporting loudly;
            // keep the stale set.
            Err(err) => debug!(component = "approvals", error = %err, "poll failed, keeping stale data"),
        }
    }

    fn apply_poll(&mut self, poll: ApprovalPoll) {
        let now = Instant::now();
        let now_ms = epoch_ms();
        let live = poll.live_entries();
        let live_ids: HashSet<String> = live.iter().map(|e| e.id.clone()).collect();

        // A request that vanished from the poll is terminal; drop its
        // local markers.
        self.deadlines.retain(|id, _| live_ids.contains(id));
        self.dismissed.retain(|id| live_ids.contains(id));

        let mut next = Vec::with_capacity(live.len());
        for entry in live {
            let memo = match self.deadlines.get(&entry.id) {
                Some(memo) => memo.clone(),
                None => {
                    let memo = DeadlineMemo {
                        deadline: compute_deadline(&entry, now, now_ms, self.default_timeout),
                        requested_at: entry.requested_at.unwrap_or(now_ms),
                    };
                    self.deadlines.insert(entry.id.clone(), memo.clone());
                    memo
                }
            };
            if self.dismissed.contains(&entry.id) {
                continue;
            }
            next.push(PendingApproval {
                id: entry.id,
                action: entry.action,
                tool: entry.tool,
                input: entry.input,
                agent_name: entry.agent_name,
                session_key: entry.session_key,
                context: entry.context,
                requested_at: memo.requested_at,
                deadline: memo.deadline,
            });
        }
        next.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        self.entries = next;
        self.clamp_active();
        self.publish();
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        let overdue: Vec<String> = self
            .entries
            .iter()
            .filter(|p| p.deadline <= now && !self.resolving.contains(&p.id))
            .map(|p| p.id.clone())
            .collect();
        for id in overdue {
            info!(component = "approvals", id = %id, "deadline elapsed, auto-denying");
            self.start_resolution(id, ApprovalAction::Deny, None);
        }
        self.publish();
    }

    fn on_resolve(
        &mut self,
        id: String,
        action: ApprovalAction,
        reply: oneshot::Sender<Result<(), GatewayError>>,
    ) {
        if self.dismissed.contains(&id) {
            let _ = reply.send(Err(GatewayError::AlreadyResolved(id)));
            return;
        }
        if self.resolving.contains(&id) {
            let _ = reply.send(Err(GatewayError::Busy(id)));
            return;
        }
        self.start_resolution(id, action, Some(reply));
    }

    fn start_resolution(
        &mut self,
        id: String,
        action: ApprovalAction,
        reply: Option<oneshot::Sender<Result<(), GatewayError>>>,
    ) {
        self.resolving.insert(id.clone());
        if reply.is_none() {
            // Auto-deny: dismiss before the network call completes so the
            // next tick cannot issue a duplicate.
            self.dismiss(&id);
        }
        let api = self.api.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match api.resolve(&id, action).await {
                Ok(outcome) if outcome.ok => Ok(()),
                Ok(_) => Err(GatewayError::Rejected("gateway returned ok=false".to_string())),
                Err(err) => Err(err),
            };
            let _ = tx.send(Internal::ResolutionDone { id, result, reply }).await;
        });
    }

    fn on_resolution_done(
        &mut self,
        id: String,
        result: Result<(), GatewayError>,
        reply: Option<oneshot::Sender<Result<(), GatewayError>>>,
    ) {
        // Cleared on every exit path so a failed attempt never blocks a
        // future distinct action.
        self.resolving.remove(&id);
        match &result {
            Ok(()) => self.dismiss(&id),
            // An explicit failure leaves the request eligible for a later
            // auto-deny; a failed auto-deny stays dismissed so at most one
            // deny is ever issued per id.
            Err(err) => warn!(component = "approvals", id = %id, error = %err, "resolution failed"),
        }
        self.publish();
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
        self.request_poll();
    }

    fn dismiss(&mut self, id: &str) {
        self.dismissed.insert(id.to_string());
        self.entries.retain(|p| p.id != id);
        self.clamp_active();
    }

    fn clamp_active(&mut self) {
        if self.entries.is_empty() {
            self.active_index = 0;
        } else if self.active_index >= self.entries.len() {
            self.active_index = self.entries.len() - 1;
        }
    }

    fn publish(&self) {
        let now = Instant::now();
        let queue = self
            .entries
            .iter()
            .map(|p| ApprovalView {
                remaining: p.deadline.saturating_duration_since(now),
                request: p.clone(),
            })
            .collect();
        self.snapshot.store(Arc::new(ApprovalQueueSnapshot {
            queue,
            active_index: self.active_index,
        }));
    }
}

/// Deadline for a newly observed request. Absolute gateway fields win;
/// otherwise the window is anchored at first observation.
fn compute_deadline(
    entry: &ApprovalEntry,
    now: Instant,
    now_ms: i64,
    default_timeout: Duration,
) -> Instant {
    if let Some(abs) = entry.absolute_deadline_ms() {
        let delta = abs.saturating_sub(now_ms);
        if delta <= 0 {
            now
        } else {
            now + Duration::from_millis(delta as u64)
        }
    } else if let Some(ms) = entry.timeout_ms {
        now + Duration::from_millis(ms)
    } else {
        now + default_timeout
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
