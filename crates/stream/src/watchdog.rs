//! Session stream watchdogs
//!
//! One re-armable timer per session key. A session whose generation stops
//! producing activity events is force-cleared after the inactivity window
//! instead of staying "streaming" forever. Invariant: at most one active
//! timer per key — `touch` always cancels the prior timer before arming a
//! new one.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Default inactivity window before a silent generation is cleared.
pub const DEFAULT_WATCHDOG_WINDOW: Duration = Duration::from_secs(30);

/// Expiry notification delivered to the owning actor. The generation lets
/// the registry reject messages from timers that were already re-armed or
/// cancelled by the time the message is processed.
#[derive(Debug)]
pub struct WatchdogExpiry {
    pub session_key: String,
    pub generation: u64,
}

struct WatchdogEntry {
    generation: u64,
    timer: AbortHandle,
}

/// Timer map owned by the supervisor actor. All mutation happens on the
/// actor's event loop; timers are spawned sleeps that report back through
/// the expiry channel.
pub struct WatchdogRegistry {
    window: Duration,
    expiry_tx: mpsc::Sender<WatchdogExpiry>,
    next_generation: u64,
    entries: HashMap<String, WatchdogEntry>,
}

impl WatchdogRegistry {
    pub fn new(window: Duration, expiry_tx: mpsc::Sender<WatchdogExpiry>) -> Self {
        Self {
            window,
            expiry_tx,
            next_generation: 0,
            entries: HashMap::new(),
        }
    }

    /// Re-arm the timer for a key: cancel any existing timer, start a fresh
    /// one for the full window.
    pub fn touch(&mut self, session_key: &str) {
        if let Some(prev) = self.entries.remove(session_key) {
            prev.timer.abort();
        }
        let generation = self.next_generation;
        self.next_generation += 1;

        let tx = self.expiry_tx.clone();
        let key = session_key.to_string();
        let window = self.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = tx
                .send(WatchdogExpiry {
                    session_key: key,
                    generation,
                })
                .await;
        });

        self.entries.insert(
            session_key.to_string(),
            WatchdogEntry {
                generation,
                timer: handle.abort_handle(),
            },
        );
    }

    /// Cancel and remove the timer for a key. Idempotent.
    pub fn clear(&mut self, session_key: &str) {
        if let Some(entry) = self.entries.remove(session_key) {
            entry.timer.abort();
        }
    }

    /// Cancel and remove every timer. Used on disconnect.
    pub fn clear_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.timer.abort();
        }
    }

    /// Check an expiry against the live timer set. Returns true exactly when
    /// the expiry is current, in which case the entry is removed and the
    /// caller must clear the session's streaming state.
    pub fn acknowledge(&mut self, expiry: &WatchdogExpiry) -> bool {
        match self.entries.get(&expiry.session_key) {
            Some(entry) if entry.generation == expiry.generation => {
                self.entries.remove(&expiry.session_key);
                true
            }
            _ => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.entries.len()
    }
}
