//! Event dispatcher
//!
//! Converts each raw frame into a normalized [`StreamEvent`] and routes it.
//! Parsing is defensive: a malformed or unknown envelope is dropped without
//! affecting the connection or other events. Activity events touch the
//! session watchdog before the store sees the content, so timeout
//! bookkeeping never lags behind delivered text; `done` clears the watchdog
//! before forwarding. Within one session key, events reach the store in
//! arrival order.

use agentdeck_protocol::{GatewayEvent, StreamEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::store::SessionStore;
use crate::watchdog::WatchdogRegistry;

/// App-level connection signals surfaced to the supervisor rather than the
/// store. `heartbeat` is deliberately absent — liveness is handled at the
/// transport layer and heartbeats mutate nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Connected,
    Disconnected,
}

/// Parse and route one raw frame. Returns a control signal when the frame
/// addresses the connection itself.
pub fn dispatch_frame<S: SessionStore>(
    raw: &str,
    watchdogs: &mut WatchdogRegistry,
    store: &S,
    approval_tx: Option<&mpsc::Sender<Value>>,
) -> Option<ControlSignal> {
    let wire: GatewayEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(err) => {
            debug!(component = "dispatcher", error = %err, "dropping unparsable event");
            return None;
        }
    };

    match StreamEvent::from_wire(wire) {
        StreamEvent::Connected => Some(ControlSignal::Connected),
        StreamEvent::Disconnected => Some(ControlSignal::Disconnected),
        StreamEvent::Heartbeat => None,
        StreamEvent::ApprovalRequest(record) => {
            // Approvals are a distinct concern from token streaming; this
            // path never touches the watchdog registry.
            if let Some(tx) = approval_tx {
                if tx.try_send(record).is_err() {
                    warn!(
                        component = "dispatcher",
                        "approval channel full or closed, notification dropped"
                    );
                }
            }
            None
        }
        event => {
            if let Some(key) = event.session_key() {
                if event.is_activity() {
                    watchdogs.touch(key);
                } else if matches!(event, StreamEvent::Done { .. }) {
                    watchdogs.clear(key);
                }
            }
            store.process_event(event);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agentdeck_protocol::ToolPhase;

    use super::*;
    use crate::testing::RecordingStore;

    fn registry() -> (WatchdogRegistry, mpsc::Receiver<crate::watchdog::WatchdogExpiry>) {
        let (tx, rx) = mpsc::channel(16);
        (WatchdogRegistry::new(Duration::from_secs(30), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped_silently() {
        let (mut watchdogs, _rx) = registry();
        let store = RecordingStore::default();

        assert_eq!(
            dispatch_frame("not json", &mut watchdogs, &store, None),
            None
        );
        assert_eq!(
            dispatch_frame(
                r#"{"type":"mystery","sessionKey":"s"}"#,
                &mut watchdogs,
                &store,
                None
            ),
            None
        );
        // A chunk with a missing required field is also dropped.
        assert_eq!(
            dispatch_frame(r#"{"type":"chunk","text":"x"}"#, &mut watchdogs, &store, None),
            None
        );

        assert!(store.events().is_empty());
        assert_eq!(watchdogs.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_touches_watchdog_before_store() {
        let (mut watchdogs, _rx) = registry();
        let store = RecordingStore::default();

        dispatch_frame(
            r#"{"type":"chunk","text":"a","sessionKey":"s1"}"#,
            &mut watchdogs,
            &store,
            None,
        );
        dispatch_frame(
            r#"{"type":"thinking","text":"b","sessionKey":"s2"}"#,
            &mut watchdogs,
            &store,
            None,
        );
        dispatch_frame(
            r#"{"type":"tool","phase":"calling","name":"bash","sessionKey":"s1"}"#,
            &mut watchdogs,
            &store,
            None,
        );

        assert_eq!(watchdogs.active_count(), 2);
        assert_eq!(store.events().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn done_clears_watchdog_and_forwards() {
        let (mut watchdogs, _rx) = registry();
        let store = RecordingStore::default();

        dispatch_frame(
            r#"{"type":"chunk","text":"a","sessionKey":"s1"}"#,
            &mut watchdogs,
            &store,
            None,
        );
        dispatch_frame(
            r#"{"type":"done","state":"completed","sessionKey":"s1"}"#,
            &mut watchdogs,
            &store,
            None,
        );

        assert_eq!(watchdogs.active_count(), 0);
        let events = store.events();
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_mutates_nothing() {
        let (mut watchdogs, _rx) = registry();
        let store = RecordingStore::default();

        assert_eq!(
            dispatch_frame(r#"{"type":"heartbeat"}"#, &mut watchdogs, &store, None),
            None
        );
        assert!(store.events().is_empty());
        assert_eq!(watchdogs.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn control_events_surface_to_caller() {
        let (mut watchdogs, _rx) = registry();
        let store = RecordingStore::default();

        assert_eq!(
            dispatch_frame(r#"{"type":"connected"}"#, &mut watchdogs, &store, None),
            Some(ControlSignal::Connected)
        );
        assert_eq!(
            dispatch_frame(r#"{"type":"disconnected"}"#, &mut watchdogs, &store, None),
            Some(ControlSignal::Disconnected)
        );
        assert!(store.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn approval_requests_route_to_the_approval_channel() {
        let (mut watchdogs, _rx) = registry();
        let store = RecordingStore::default();
        let (approval_tx, mut approval_rx) = mpsc::channel(8);

        dispatch_frame(
            r#"{"type":"approval_request","id":"a1","action":"rm -rf /tmp/x"}"#,
            &mut watchdogs,
            &store,
            Some(&approval_tx),
        );

        let record = approval_rx.try_recv().expect("approval forwarded");
        assert_eq!(record.get("id").and_then(|v| v.as_str()), Some("a1"));
        assert!(store.events().is_empty());
        assert_eq!(watchdogs.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn per_session_ordering_is_preserved() {
        let (mut watchdogs, _rx) = registry();
        let store = RecordingStore::default();

        for text in ["one", "two", "three"] {
            let frame = format!(r#"{{"type":"chunk","text":"{text}","sessionKey":"s1"}}"#);
            dispatch_frame(&frame, &mut watchdogs, &store, None);
        }

        let texts: Vec<String> = store
            .events()
            .into_iter()
            .map(|e| match e {
                StreamEvent::Chunk { text, .. } => text,
                other => panic!("unexpected event: {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test(start_paused = true)]
    async fn normalized_tool_use_touches_watchdog() {
        let (mut watchdogs, _rx) = registry();
        let store = RecordingStore::default();

        dispatch_frame(
            r#"{"type":"tool_use","name":"bash","sessionKey":"s1"}"#,
            &mut watchdogs,
            &store,
            None,
        );

        assert_eq!(watchdogs.active_count(), 1);
        match store.events().first() {
            Some(StreamEvent::Tool { phase, .. }) => assert_eq!(*phase, ToolPhase::Calling),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
