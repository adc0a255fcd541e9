//! Terminal rendering
//!
//! A [`SessionStore`] implementation that prints the normalized stream
//! line-by-line, plus the table renderer for the approval queue. Chunk and
//! thinking text is buffered per session and flushed on `done` (or on a
//! watchdog/disconnect clear) so interleaved sessions stay readable.

use std::collections::HashMap;
use std::sync::Mutex;

use agentdeck_protocol::{ApprovalEntry, ConnectionState, StreamEvent, ToolPhase};
use agentdeck_stream::PendingApproval;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use console::style;

#[derive(Default)]
struct LineBuffer {
    text: String,
    thinking: String,
}

/// Renders the event stream to stdout.
#[derive(Default)]
pub struct ConsoleStore {
    buffers: Mutex<HashMap<String, LineBuffer>>,
}

impl ConsoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush(&self, session_key: &str, label: &str) {
        let Some(buffer) = self.buffers.lock().unwrap().remove(session_key) else {
            return;
        };
        if !buffer.thinking.is_empty() {
            println!(
                "{} {}",
                style(format!("[{session_key}] thinking:")).dim(),
                style(buffer.thinking.trim()).dim().italic()
            );
        }
        if !buffer.text.is_empty() {
            println!(
                "{} {}",
                style(format!("[{session_key}]")).cyan(),
                buffer.text.trim()
            );
        }
        if !label.is_empty() {
            println!(
                "{} {}",
                style(format!("[{session_key}]")).cyan(),
                style(label).dim()
            );
        }
    }
}

impl agentdeck_stream::SessionStore for ConsoleStore {
    fn process_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::Chunk {
                session_key, text, ..
            } => {
                let mut buffers = self.buffers.lock().unwrap();
                buffers.entry(session_key).or_default().text.push_str(&text);
            }
            StreamEvent::Thinking {
                session_key, text, ..
            } => {
                let mut buffers = self.buffers.lock().unwrap();
                buffers
                    .entry(session_key)
                    .or_default()
                    .thinking
                    .push_str(&text);
            }
            StreamEvent::Tool {
                session_key,
                phase,
                name,
                ..
            } => {
                let phase = match phase {
                    ToolPhase::Calling => style("calling").yellow(),
                    ToolPhase::Done => style("done").green(),
                    ToolPhase::Error => style("error").red(),
                };
                println!(
                    "{} tool {} {}",
                    style(format!("[{session_key}]")).cyan(),
                    style(name).bold(),
                    phase
                );
            }
            StreamEvent::UserMessage {
                session_key,
                message,
                ..
            } => {
                println!(
                    "{} {} {}",
                    style(format!("[{session_key}]")).cyan(),
                    style("user:").bold(),
                    message
                );
            }
            StreamEvent::Message {
                session_key,
                message,
            } => {
                println!("{} {}", style(format!("[{session_key}]")).cyan(), message);
            }
            StreamEvent::Done {
                session_key,
                state,
                error_message,
                ..
            } => {
                let label = match error_message {
                    Some(err) => format!("{state}: {err}"),
                    None => state,
                };
                self.flush(&session_key, &label);
            }
            _ => {}
        }
    }

    fn set_connection_state(&self, state: ConnectionState) {
        let line = match state {
            ConnectionState::Connecting => style("connecting...").yellow(),
            ConnectionState::Connected => style("connected").green(),
            ConnectionState::Disconnected => style("disconnected").red(),
        };
        println!("{} {}", style("[gateway]").magenta(), line);
    }

    fn clear_streaming_session(&self, session_key: &str) {
        self.flush(session_key, "stream timed out");
    }

    fn clear_all_streaming(&self) {
        let keys: Vec<String> = self.buffers.lock().unwrap().keys().cloned().collect();
        for key in keys {
            self.flush(&key, "stream interrupted");
        }
    }
}

pub fn print_approval(approval: &PendingApproval, remaining_secs: u64) {
    let what = approval
        .action
        .as_deref()
        .or(approval.tool.as_deref())
        .unwrap_or("(unspecified)");
    println!(
        "{} {} {} {}",
        style("[approval]").yellow().bold(),
        style(&approval.id).bold(),
        what,
        style(format!("(auto-deny in {remaining_secs}s)")).dim()
    );
}

/// Table of the gateway's pending set as reported, without local
/// countdown state.
pub fn pending_table(entries: &[ApprovalEntry]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Agent", "Session", "Action", "Timeout"]);
    for entry in entries {
        let timeout = match entry.timeout_ms {
            Some(ms) => format!("{}s", ms / 1000),
            None => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(&entry.id),
            Cell::new(entry.agent_name.as_deref().unwrap_or("-")),
            Cell::new(entry.session_key.as_deref().unwrap_or("-")),
            Cell::new(entry.action.as_deref().or(entry.tool.as_deref()).unwrap_or("-")),
            Cell::new(timeout),
        ]);
    }
    table
}
