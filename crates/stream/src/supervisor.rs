//! Connection supervisor
//!
//! Owns exactly one logical connection to the gateway's event channel and
//! runs as a single tokio actor: commands arrive over mpsc, transport
//! signals and timer expiries are funneled into the same loop, and the
//! externally observable `{connection_state, last_error}` is published
//! through an `ArcSwap` snapshot for lock-free reads.
//!
//! Failure policy: nothing here returns an error to the caller. Connection
//! loss degrades to `disconnected` plus a last-error string and an
//! exponential-backoff reconnect (`min(1s * 2^attempts, 30s)`). A transport
//! that is still auto-retrying costs no state transition at all, so the UI
//! never flickers through `disconnected` for errors the transport itself
//! recovers from.

use std::sync::Arc;
use std::time::Duration;

use agentdeck_protocol::ConnectionState;
use arc_swap::ArcSwap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::{dispatch_frame, ControlSignal};
use crate::error::TransportError;
use crate::store::SessionStore;
use crate::transport::{StreamTransport, TransportConn, TransportSignal};
use crate::watchdog::{WatchdogExpiry, WatchdogRegistry, DEFAULT_WATCHDOG_WINDOW};

const COMMAND_BUFFER: usize = 64;
const INTERNAL_BUFFER: usize = 256;

/// Tunables for the stream side. Defaults carry the reference behavior.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Inactivity window before a session's generation is force-cleared.
    pub watchdog_window: Duration,
    /// First reconnect delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Reconnect delay ceiling.
    pub backoff_cap: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            watchdog_window: DEFAULT_WATCHDOG_WINDOW,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Externally observable connection state.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub last_error: Option<String>,
}

enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Shutdown,
}

enum Internal {
    OpenFinished {
        epoch: u64,
        result: Result<TransportConn, TransportError>,
    },
    Signal {
        epoch: u64,
        signal: TransportSignal,
    },
    ReconnectFired {
        epoch: u64,
    },
}

/// Handle to the running supervisor actor (cheap to Clone).
#[derive(Clone)]
pub struct ConnectionSupervisor {
    command_tx: mpsc::Sender<Command>,
    snapshot: Arc<ArcSwap<ConnectionSnapshot>>,
}

impl ConnectionSupervisor {
    /// Spawn the actor. `approval_tx`, when present, receives the opaque
    /// records of `approval_request` events.
    pub fn spawn<T, S>(
        transport: Arc<T>,
        store: Arc<S>,
        config: StreamConfig,
        approval_tx: Option<mpsc::Sender<Value>>,
    ) -> Self
    where
        T: StreamTransport,
        S: SessionStore,
    {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_BUFFER);
        let (expiry_tx, expiry_rx) = mpsc::channel(INTERNAL_BUFFER);
        let snapshot = Arc::new(ArcSwap::from_pointee(ConnectionSnapshot::default()));

        let actor = SupervisorActor {
            transport,
            store,
            approval_tx,
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
            snapshot: snapshot.clone(),
            internal_tx,
            watchdogs: WatchdogRegistry::new(config.watchdog_window, expiry_tx),
            epoch: 0,
            attempts: 0,
            opening: false,
            conn_abort: None,
            reconnect_timer: None,
        };
        tokio::spawn(actor.run(command_rx, internal_rx, expiry_rx));

        Self {
            command_tx,
            snapshot,
        }
    }

    /// Open the event channel. No-op when already connecting/connected.
    pub async fn connect(&self) {
        self.send(Command::Connect).await;
    }

    /// Tear everything down; terminal until `connect`/`reconnect`.
    pub async fn disconnect(&self) {
        self.send(Command::Disconnect).await;
    }

    /// Disconnect followed by a fresh connect; manual reconnects do not
    /// inherit backoff.
    pub async fn reconnect(&self) {
        self.send(Command::Reconnect).await;
    }

    /// Stop the actor entirely.
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown).await;
    }

    /// Lock-free state read.
    pub fn state(&self) -> ConnectionState {
        self.snapshot.load().state
    }

    /// Lock-free `{state, last_error}` read.
    pub fn snapshot(&self) -> Arc<ConnectionSnapshot> {
        self.snapshot.load_full()
    }

    async fn send(&self, cmd: Command) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(component = "supervisor", "actor gone, command dropped");
        }
    }
}

struct SupervisorActor<T: StreamTransport, S: SessionStore> {
    transport: Arc<T>,
    store: Arc<S>,
    approval_tx: Option<mpsc::Sender<Value>>,
    backoff_base: Duration,
    backoff_cap: Duration,
    snapshot: Arc<ArcSwap<ConnectionSnapshot>>,
    internal_tx: mpsc::Sender<Internal>,
    watchdogs: WatchdogRegistry,
    /// Bumped on every teardown; async completions carrying an older epoch
    /// are stale and discarded on arrival.
    epoch: u64,
    attempts: u32,
    opening: bool,
    conn_abort: Option<AbortHandle>,
    reconnect_timer: Option<AbortHandle>,
}

impl<T: StreamTransport, S: SessionStore> SupervisorActor<T, S> {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<Command>,
        mut internal_rx: mpsc::Receiver<Internal>,
        mut expiry_rx: mpsc::Receiver<WatchdogExpiry>,
    ) {
        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(Command::Connect) => self.on_connect(),
                    Some(Command::Disconnect) => self.on_disconnect(),
                    Some(Command::Reconnect) => self.on_reconnect(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(msg) = internal_rx.recv() => self.on_internal(msg),
                Some(expiry) = expiry_rx.recv() => self.on_watchdog_expiry(expiry),
            }
        }
        self.cancel_reconnect_timer();
        self.teardown_transport();
        self.watchdogs.clear_all();
    }

    fn on_connect(&mut self) {
        if self.opening || self.conn_abort.is_some() {
            debug!(component = "supervisor", "connect ignored, already active");
            return;
        }
        self.begin_connect();
    }

    fn on_disconnect(&mut self) {
        self.cancel_reconnect_timer();
        self.teardown_transport();
        self.watchdogs.clear_all();
        self.store.clear_all_streaming();
        self.set_state(ConnectionState::Disconnected, None);
    }

    fn on_reconnect(&mut self) {
        self.on_disconnect();
        self.attempts = 0;
        self.begin_connect();
    }

    fn begin_connect(&mut self) {
        self.cancel_reconnect_timer();
        self.opening = true;
        let last_error = self.snapshot.load().last_error.clone();
        self.set_state(ConnectionState::Connecting, last_error);

        let transport = self.transport.clone();
        let tx = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = transport.open().await;
            let _ = tx.send(Internal::OpenFinished { epoch, result }).await;
        });
    }

    fn on_internal(&mut self, msg: Internal) {
        match msg {
            Internal::OpenFinished { epoch, result } if epoch == self.epoch => {
                self.opening = false;
                match result {
                    Ok(conn) => self.install_transport(conn),
                    Err(err) => {
                        warn!(component = "supervisor", error = %err, "transport open failed");
                        self.handle_connection_lost(err.to_string());
                    }
                }
            }
            // Stale open: dropping the connection tears it down.
            Internal::OpenFinished { .. } => {}
            Internal::Signal { epoch, signal } if epoch == self.epoch => self.on_signal(signal),
            Internal::Signal { .. } => {}
            Internal::ReconnectFired { epoch } if epoch == self.epoch => {
                self.reconnect_timer = None;
                if !self.opening && self.conn_abort.is_none() {
                    self.begin_connect();
                }
            }
            Internal::ReconnectFired { .. } => {}
        }
    }

    /// Forward the connection's signals into the actor loop, tagged with
    /// the epoch they belong to.
    fn install_transport(&mut self, mut conn: TransportConn) {
        let tx = self.internal_tx.clone();
        let epoch = self.epoch;
        let handle = tokio::spawn(async move {
            while let Some(signal) = conn.recv().await {
                if tx.send(Internal::Signal { epoch, signal }).await.is_err() {
                    break;
                }
            }
        });
        self.conn_abort = Some(handle.abort_handle());
    }

    fn on_signal(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Opened => {
                // Transport-level open is sufficient for "connected"; no
                // app-level handshake is required, which keeps transient
                // recoveries invisible.
                self.attempts = 0;
                self.set_state(ConnectionState::Connected, None);
            }
            TransportSignal::Frame(raw) => {
                let control = dispatch_frame(
                    &raw,
                    &mut self.watchdogs,
                    self.store.as_ref(),
                    self.approval_tx.as_ref(),
                );
                match control {
                    Some(ControlSignal::Disconnected) => {
                        self.teardown_transport();
                        self.handle_connection_lost("gateway reported disconnect".to_string());
                    }
                    Some(ControlSignal::Connected) => {
                        if self.snapshot.load().state != ConnectionState::Connected {
                            self.set_state(ConnectionState::Connected, None);
                        }
                    }
                    None => {}
                }
            }
            TransportSignal::Failed { closed: false, reason } => {
                debug!(
                    component = "supervisor",
                    reason = %reason,
                    "transient transport error, transport retrying"
                );
            }
            TransportSignal::Failed { closed: true, reason } => {
                self.teardown_transport();
                self.handle_connection_lost(reason);
            }
        }
    }

    /// Shared path for every way the connection can be lost: clear all
    /// per-session streaming state, surface `disconnected`, and schedule a
    /// backoff reconnect.
    fn handle_connection_lost(&mut self, reason: String) {
        self.watchdogs.clear_all();
        self.store.clear_all_streaming();
        self.set_state(ConnectionState::Disconnected, Some(reason));
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect_timer();
        let exponent = self.attempts.min(16);
        let delay = self
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_cap);
        self.attempts += 1;
        info!(
            component = "supervisor",
            delay_ms = delay.as_millis() as u64,
            attempt = self.attempts,
            "scheduling reconnect"
        );

        let tx = self.internal_tx.clone();
        let epoch = self.epoch;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::ReconnectFired { epoch }).await;
        });
        self.reconnect_timer = Some(handle.abort_handle());
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn teardown_transport(&mut self) {
        if let Some(handle) = self.conn_abort.take() {
            handle.abort();
        }
        self.opening = false;
        self.epoch += 1;
    }

    fn on_watchdog_expiry(&mut self, expiry: WatchdogExpiry) {
        if self.watchdogs.acknowledge(&expiry) {
            info!(
                component = "supervisor",
                session_key = %expiry.session_key,
                "session stream timed out, clearing"
            );
            self.store.clear_streaming_session(&expiry.session_key);
        }
    }

    fn set_state(&mut self, state: ConnectionState, last_error: Option<String>) {
        let prev = self.snapshot.load().state;
        if prev != state {
            info!(component = "supervisor", from = ?prev, to = ?state, "connection state");
        }
        self.snapshot
            .store(Arc::new(ConnectionSnapshot { state, last_error }));
        self.store.set_connection_state(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingStore, ScriptedTransport};

    async fn settle() {
        for _ in 0..12 {
            tokio::task::yield_now().await;
        }
    }

    fn spawn_with(
        transport: Arc<ScriptedTransport>,
        store: Arc<RecordingStore>,
    ) -> ConnectionSupervisor {
        ConnectionSupervisor::spawn(transport, store, StreamConfig::default(), None)
    }

    #[tokio::test(start_paused = true)]
    async fn transport_open_marks_connected() {
        let transport = ScriptedTransport::new();
        let conn_tx = transport.push_serve();
        let store = Arc::new(RecordingStore::default());
        let supervisor = spawn_with(transport.clone(), store.clone());

        supervisor.connect().await;
        settle().await;
        assert_eq!(supervisor.state(), ConnectionState::Connecting);

        conn_tx.send(TransportSignal::Opened).await.unwrap();
        settle().await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(
            store.states(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_a_noop_while_active() {
        let transport = ScriptedTransport::new();
        let conn_tx = transport.push_serve();
        let store = Arc::new(RecordingStore::default());
        let supervisor = spawn_with(transport.clone(), store);

        supervisor.connect().await;
        settle().await;
        supervisor.connect().await;
        settle().await;
        conn_tx.send(TransportSignal::Opened).await.unwrap();
        settle().await;
        supervisor.connect().await;
        settle().await;

        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn app_disconnect_clears_sessions_and_schedules_reconnect_at_one_second() {
        let transport = ScriptedTransport::new();
        let conn_tx = transport.push_serve();
        let store = Arc::new(RecordingStore::default());
        let supervisor = spawn_with(transport.clone(), store.clone());

        supervisor.connect().await;
        settle().await;
        conn_tx.send(TransportSignal::Opened).await.unwrap();
        settle().await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);

        conn_tx
            .send(TransportSignal::Frame(
                r#"{"type":"chunk","text":"x","sessionKey":"s1"}"#.to_string(),
            ))
            .await
            .unwrap();
        settle().await;

        tokio::time::advance(Duration::from_secs(5)).await;
        conn_tx
            .send(TransportSignal::Frame(r#"{"type":"disconnected"}"#.to_string()))
            .await
            .unwrap();
        settle().await;

        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(store.clear_all_count(), 1);
        assert_eq!(transport.open_count(), 1);

        let _next = transport.push_serve();
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(transport.open_count(), 2);
        assert_eq!(supervisor.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_follow_the_capped_doubling_sequence() {
        let transport = ScriptedTransport::new(); // every open fails
        let store = Arc::new(RecordingStore::default());
        let supervisor = spawn_with(transport.clone(), store);

        supervisor.connect().await;
        settle().await;
        assert_eq!(transport.open_count(), 1);

        for (i, delay) in [1u64, 2, 4, 8, 16, 30, 30].iter().enumerate() {
            tokio::time::advance(Duration::from_secs(*delay)).await;
            settle().await;
            assert_eq!(
                transport.open_count(),
                i + 2,
                "attempt {} expected after {}s",
                i + 2,
                delay
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_resets_backoff() {
        let transport = ScriptedTransport::new();
        let store = Arc::new(RecordingStore::default());
        let supervisor = spawn_with(transport.clone(), store);

        supervisor.connect().await;
        settle().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(transport.open_count(), 3);

        supervisor.reconnect().await;
        settle().await;
        assert_eq!(transport.open_count(), 4);

        // The post-reconnect failure schedules at the base delay again.
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(transport.open_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_is_cleared_exactly_once() {
        let transport = ScriptedTransport::new();
        let conn_tx = transport.push_serve();
        let store = Arc::new(RecordingStore::default());
        let supervisor = spawn_with(transport.clone(), store.clone());

        supervisor.connect().await;
        settle().await;
        conn_tx.send(TransportSignal::Opened).await.unwrap();
        settle().await;

        conn_tx
            .send(TransportSignal::Frame(
                r#"{"type":"chunk","text":"x","sessionKey":"s1"}"#.to_string(),
            ))
            .await
            .unwrap();
        settle().await;

        tokio::time::advance(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(store.cleared(), vec!["s1"]);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(store.cleared(), vec!["s1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn done_prevents_watchdog_expiry() {
        let transport = ScriptedTransport::new();
        let conn_tx = transport.push_serve();
        let store = Arc::new(RecordingStore::default());
        let supervisor = spawn_with(transport.clone(), store.clone());

        supervisor.connect().await;
        settle().await;
        conn_tx.send(TransportSignal::Opened).await.unwrap();
        settle().await;

        conn_tx
            .send(TransportSignal::Frame(
                r#"{"type":"chunk","text":"x","sessionKey":"s1"}"#.to_string(),
            ))
            .await
            .unwrap();
        conn_tx
            .send(TransportSignal::Frame(
                r#"{"type":"done","state":"completed","sessionKey":"s1"}"#.to_string(),
            ))
            .await
            .unwrap();
        settle().await;

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(store.cleared().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_transport_error_takes_no_state_action() {
        let transport = ScriptedTransport::new();
        let conn_tx = transport.push_serve();
        let store = Arc::new(RecordingStore::default());
        let supervisor = spawn_with(transport.clone(), store.clone());

        supervisor.connect().await;
        settle().await;
        conn_tx.send(TransportSignal::Opened).await.unwrap();
        settle().await;

        conn_tx
            .send(TransportSignal::Failed {
                closed: false,
                reason: "blip".to_string(),
            })
            .await
            .unwrap();
        settle().await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(store.clear_all_count(), 0);

        // The transport recovers on its own; open re-fires.
        conn_tx.send(TransportSignal::Opened).await.unwrap();
        settle().await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_transport_failure_triggers_backoff() {
        let transport = ScriptedTransport::new();
        let conn_tx = transport.push_serve();
        let store = Arc::new(RecordingStore::default());
        let supervisor = spawn_with(transport.clone(), store.clone());

        supervisor.connect().await;
        settle().await;
        conn_tx.send(TransportSignal::Opened).await.unwrap();
        settle().await;

        conn_tx
            .send(TransportSignal::Failed {
                closed: true,
                reason: "gone".to_string(),
            })
            .await
            .unwrap();
        settle().await;

        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(
            supervisor.snapshot().last_error.as_deref(),
            Some("gone")
        );
        assert_eq!(store.clear_all_count(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let transport = ScriptedTransport::new();
        let store = Arc::new(RecordingStore::default());
        let supervisor = spawn_with(transport.clone(), store);

        supervisor.connect().await;
        settle().await;
        assert_eq!(transport.open_count(), 1);

        supervisor.disconnect().await;
        settle().await;
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);

        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(transport.open_count(), 1);
    }
}
