//! Store collaborator
//!
//! The external state store observed by the UI. The dispatcher and the
//! watchdog registry both call into it, for different session keys, so an
//! implementation must behave as a key-partitioned map: interleaved calls
//! for different keys may not corrupt per-key state.

use agentdeck_protocol::{ConnectionState, StreamEvent};
use dashmap::DashMap;

/// Interface the stream core drives. Implementations render or buffer;
/// the core only routes.
pub trait SessionStore: Send + Sync + 'static {
    /// One normalized event, per-session ordering preserved.
    fn process_event(&self, event: StreamEvent);

    /// Connection state transition, owned by the supervisor.
    fn set_connection_state(&self, state: ConnectionState);

    /// Force-terminate the in-flight generation for one session
    /// (watchdog expiry path).
    fn clear_streaming_session(&self, session_key: &str);

    /// Drop all in-flight streaming state (disconnect path).
    fn clear_all_streaming(&self);
}

/// Streaming state buffered for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionBuffer {
    /// True while a generation is in flight (activity seen, no `done` yet).
    pub streaming: bool,
    /// Accumulated chunk text for the current generation.
    pub text: String,
    /// Accumulated thinking text for the current generation.
    pub thinking: String,
    /// Terminal state of the last completed generation.
    pub last_done_state: Option<String>,
}

/// Key-partitioned in-memory store. Suitable as the backing model for a
/// rendering layer and for exercising the core in tests.
#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<String, SessionBuffer>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, session_key: &str) -> Option<SessionBuffer> {
        self.sessions.get(session_key).map(|s| s.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn streaming_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.streaming).count()
    }
}

impl SessionStore for MemoryStore {
    fn process_event(&self, event: StreamEvent) {
        let Some(key) = event.session_key().map(str::to_string) else {
            return;
        };
        let mut buffer = self.sessions.entry(key).or_default();
        match event {
            StreamEvent::Chunk { text, .. } => {
                buffer.streaming = true;
                buffer.text.push_str(&text);
            }
            StreamEvent::Thinking { text, .. } => {
                buffer.streaming = true;
                buffer.thinking.push_str(&text);
            }
            StreamEvent::Tool { .. } => {
                buffer.streaming = true;
            }
            StreamEvent::Done { state, .. } => {
                buffer.streaming = false;
                buffer.text.clear();
                buffer.thinking.clear();
                buffer.last_done_state = Some(state);
            }
            // User/assistant messages do not open a generation.
            _ => {}
        }
    }

    fn set_connection_state(&self, _state: ConnectionState) {}

    fn clear_streaming_session(&self, session_key: &str) {
        if let Some(mut buffer) = self.sessions.get_mut(session_key) {
            buffer.streaming = false;
            buffer.text.clear();
            buffer.thinking.clear();
        }
    }

    fn clear_all_streaming(&self) {
        for mut buffer in self.sessions.iter_mut() {
            buffer.streaming = false;
            buffer.text.clear();
            buffer.thinking.clear();
        }
    }
}
