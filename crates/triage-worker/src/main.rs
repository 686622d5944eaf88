//! Triage worker binary: wires the in-memory broker, lock store, and
//! notification sink to the intake loop and runs until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;

use dispatch::AgentRegistry;
use triage_worker::config::{load_roster, WorkerConfig};
use triage_worker::lock_bridge::InMemoryLockStore;
use triage_worker::notify::{NotificationSink, NullSink, WebhookSink};
use triage_worker::queue_bridge::{InMemoryQueue, TicketQueue};
use triage_worker::worker::TicketWorker;

/// Sample tickets covering all three categories.
const DEMO_TICKETS: &[&str] = &[
    "My invoice was charged twice!",
    "Server is completely down ASAP!",
    "Need legal advice on our contract",
    "Cannot login to my account",
    "Billing portal is broken",
    "Database keeps crashing",
    "Urgent legal review needed",
    "Payment failed three times",
    "Server unreachable since morning",
    "Need refund for duplicate charge",
    "App crashes on every login",
    "Contract terms need review",
    "Server down nothing works",
    "Invoice amount is wrong",
    "Legal help needed urgently",
];

/// Near-identical tickets that exercise storm consolidation.
const STORM_TICKETS: &[&str] = &[
    "Server is completely down",
    "Server is totally down",
    "The server is down and not working",
    "Server down nothing works",
    "Everything is down server unreachable",
    "Server is not responding at all",
    "Server has been down since an hour",
    "Our server is down please fix",
    "Server completely unreachable",
    "Nothing is working server is down",
    "Server down ASAP please help",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DemoMode {
    /// Start with an empty queue.
    None,
    /// Seed the mixed-category sample set.
    Tickets,
    /// Seed the near-identical storm set.
    Storm,
}

#[derive(Debug, Parser)]
#[command(name = "triage-worker", about = "Support ticket triage worker")]
struct Args {
    /// TOML agent roster; the built-in three-agent roster is used if omitted.
    #[arg(long)]
    roster: Option<PathBuf>,

    /// Seed the in-memory broker with a demo ticket set at startup.
    #[arg(long, value_enum, default_value = "none")]
    demo: DemoMode,
}

async fn seed_demo(queue: &dyn TicketQueue, texts: &[&str], id_prefix: Option<&str>) -> Result<()> {
    for (i, text) in texts.iter().enumerate() {
        let id = match id_prefix {
            Some(prefix) => format!("{prefix}-{i}"),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let payload = serde_json::json!({ "id": id, "text": text }).to_string();
        queue.push(payload).await?;
    }
    info!(count = texts.len(), "demo tickets queued");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = WorkerConfig::default();

    let roster = match &args.roster {
        Some(path) => load_roster(path)?,
        None => AgentRegistry::default_roster(),
    };

    let queue = Arc::new(InMemoryQueue::new());
    let locks = Arc::new(InMemoryLockStore::new());
    let sink: Arc<dyn NotificationSink> = match &config.webhook_url {
        Some(url) => {
            info!(url = %url, "webhook notifications enabled");
            Arc::new(WebhookSink::new(url))
        }
        None => Arc::new(NullSink),
    };

    match args.demo {
        DemoMode::None => {}
        DemoMode::Tickets => seed_demo(queue.as_ref(), DEMO_TICKETS, None).await?,
        DemoMode::Storm => seed_demo(queue.as_ref(), STORM_TICKETS, Some("storm")).await?,
    }

    info!(
        agents = roster.len(),
        queue = %config.queue_key,
        max_concurrency = config.max_concurrency,
        "starting triage worker"
    );

    let worker = Arc::new(TicketWorker::new(queue, locks, sink, roster, config));

    let shutdown = Arc::clone(&worker);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            shutdown.shutdown();
        }
    });

    worker.run().await
}
