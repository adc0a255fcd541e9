//! AgentDeck CLI
//!
//! Terminal client for an agent gateway: follows the realtime event stream,
//! lists pending approval requests, and resolves them.

mod logging;
mod render;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use agentdeck_protocol::ApprovalAction;
use agentdeck_stream::{
    ApprovalApi, ApprovalConfig, ApprovalCoordinator, ConnectionSupervisor, HttpGateway,
    StreamConfig, WsTransport,
};
use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use tokio::sync::mpsc;

use crate::render::ConsoleStore;

#[derive(Parser)]
#[command(name = "agentdeck", version, about = "Watch agent event streams and resolve approvals")]
struct Cli {
    /// Gateway base URL.
    #[arg(
        long,
        global = true,
        env = "AGENTDECK_GATEWAY_URL",
        default_value = "http://127.0.0.1:4420"
    )]
    gateway_url: String,

    /// Bearer token for the gateway, if it requires one.
    #[arg(long, global = true, env = "AGENTDECK_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the event stream and surface approval requests live.
    Watch,
    /// List pending approval requests.
    Approvals,
    /// Approve or deny one request.
    Resolve {
        /// Approval request id.
        id: String,
        /// Action to take.
        #[arg(value_enum)]
        action: Action,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
    Approve,
    Deny,
}

impl From<Action> for ApprovalAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Approve => ApprovalAction::Approve,
            Action::Deny => ApprovalAction::Deny,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init_logging()?;

    match cli.command {
        Commands::Watch => watch(&cli.gateway_url, cli.token).await,
        Commands::Approvals => approvals(&cli.gateway_url, cli.token).await,
        Commands::Resolve { id, action } => {
            resolve(&cli.gateway_url, cli.token, &id, action.into()).await
        }
    }
}

async fn watch(gateway_url: &str, token: Option<String>) -> anyhow::Result<()> {
    let store = Arc::new(ConsoleStore::new());
    let transport = Arc::new(WsTransport::new(ws_url(gateway_url, token.as_deref())));
    let gateway = Arc::new(HttpGateway::new(gateway_url, token));
    let coordinator = ApprovalCoordinator::spawn(gateway, ApprovalConfig::default());

    let (approval_tx, mut approval_rx) = mpsc::channel(32);
    let supervisor =
        ConnectionSupervisor::spawn(transport, store, StreamConfig::default(), Some(approval_tx));

    // A pushed approval_request only means "poll now"; the coordinator's
    // queue is the source of truth.
    let refresher = coordinator.clone();
    tokio::spawn(async move {
        while approval_rx.recv().await.is_some() {
            refresher.refresh().await;
        }
    });

    // Announce approvals as they surface in the coordinator's queue.
    let announcer = coordinator.clone();
    tokio::spawn(async move {
        let mut seen: HashSet<String> = HashSet::new();
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let snapshot = announcer.snapshot();
            let current: HashSet<String> =
                snapshot.queue.iter().map(|v| v.request.id.clone()).collect();
            for view in &snapshot.queue {
                if !seen.contains(&view.request.id) {
                    render::print_approval(&view.request, view.remaining.as_secs());
                }
            }
            seen = current;
        }
    });

    supervisor.connect().await;
    tokio::signal::ctrl_c().await?;

    supervisor.shutdown().await;
    coordinator.shutdown().await;
    Ok(())
}

async fn approvals(gateway_url: &str, token: Option<String>) -> anyhow::Result<()> {
    let gateway = HttpGateway::new(gateway_url, token);
    let entries = gateway.fetch_pending().await?.live_entries();
    if entries.is_empty() {
        println!("No pending approvals.");
        return Ok(());
    }
    println!("{}", render::pending_table(&entries));
    Ok(())
}

async fn resolve(
    gateway_url: &str,
    token: Option<String>,
    id: &str,
    action: ApprovalAction,
) -> anyhow::Result<()> {
    let gateway = HttpGateway::new(gateway_url, token);
    let outcome = gateway.resolve(id, action).await?;
    if !outcome.ok {
        bail!("gateway refused to resolve {id}");
    }
    println!("{} {} {}", style("resolved").green(), id, action.as_str());
    Ok(())
}

/// Event-channel URL for a gateway base URL: scheme swapped to ws(s), the
/// `/events` path appended, and the token (when present) carried as a
/// query parameter.
fn ws_url(gateway_url: &str, token: Option<&str>) -> String {
    let mut base = gateway_url.trim_end_matches('/').to_string();
    if let Some(rest) = base.strip_prefix("https://") {
        base = format!("wss://{rest}");
    } else if let Some(rest) = base.strip_prefix("http://") {
        base = format!("ws://{rest}");
    }
    match token {
        Some(token) => format!("{base}/events?token={}", urlencoding::encode(token)),
        None => format!("{base}/events"),
    }
}
