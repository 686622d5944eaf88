//! Worker configuration.
//!
//! Every recognized option has a hardcoded default and a `TRIAGE_*`
//! environment override; the agent roster can additionally be loaded from a
//! TOML file. Components receive their slice of this config at construction —
//! nothing reads the environment after startup.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dispatch::{Agent, BreakerConfig, Category, StormConfig, DEFAULT_FEED_CAPACITY};
use serde::Deserialize;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Top-level worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name of the broker queue the worker consumes.
    pub queue_key: String,
    /// Blocking-pop timeout against the queue.
    pub pop_timeout: Duration,
    /// Backoff after a queue connectivity failure.
    pub connect_backoff: Duration,
    /// Backoff after any other intake-loop failure.
    pub error_backoff: Duration,
    /// TTL of the per-ticket idempotency lock.
    pub lock_ttl: Duration,
    /// Hard ceiling on one classification call.
    pub classify_timeout: Duration,
    /// Urgency above which a high-urgency notification fires.
    pub urgency_notify_threshold: f32,
    /// Maximum simultaneously in-flight ticket pipelines.
    pub max_concurrency: usize,
    /// Activity feed ring capacity.
    pub feed_capacity: usize,
    /// Webhook endpoint for notifications; `None` disables delivery.
    pub webhook_url: Option<String>,
    pub breaker: BreakerConfig,
    pub storm: StormConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_key: std::env::var("TRIAGE_QUEUE_KEY")
                .unwrap_or_else(|_| "tickets_queue".into()),
            pop_timeout: Duration::from_secs(env_parse("TRIAGE_POP_TIMEOUT_SECS", 5)),
            connect_backoff: Duration::from_secs(3),
            error_backoff: Duration::from_secs(1),
            lock_ttl: Duration::from_secs(env_parse("TRIAGE_LOCK_TTL_SECS", 30)),
            classify_timeout: Duration::from_millis(env_parse(
                "TRIAGE_CLASSIFY_TIMEOUT_MS",
                2000,
            )),
            urgency_notify_threshold: env_parse("TRIAGE_URGENCY_NOTIFY_THRESHOLD", 0.8),
            max_concurrency: env_parse("TRIAGE_MAX_CONCURRENCY", 64),
            feed_capacity: env_parse("TRIAGE_FEED_CAPACITY", DEFAULT_FEED_CAPACITY),
            webhook_url: std::env::var("TRIAGE_WEBHOOK_URL").ok(),
            breaker: BreakerConfig {
                high_threshold_ms: env_parse("TRIAGE_HIGH_LATENCY_MS", 500.0),
                low_threshold_ms: env_parse("TRIAGE_LOW_LATENCY_MS", 200.0),
                open_count: env_parse("TRIAGE_OPEN_COUNT", 3),
                close_count: env_parse("TRIAGE_CLOSE_COUNT", 5),
            },
            storm: StormConfig {
                window_secs: env_parse("TRIAGE_STORM_WINDOW_SECS", 300),
                window_cap: env_parse("TRIAGE_STORM_WINDOW_CAP", 200),
                volume_threshold: env_parse("TRIAGE_STORM_TICKET_THRESHOLD", 10),
                similarity_threshold: env_parse("TRIAGE_SIMILARITY_THRESHOLD", 0.9),
                pair_threshold: env_parse("TRIAGE_PAIR_THRESHOLD", 10),
                min_sample: env_parse("TRIAGE_MIN_SAMPLE", 10),
                coalesce_delay_ms: env_parse("TRIAGE_COALESCE_DELAY_MS", 100),
            },
        }
    }
}

/// One agent entry in a roster file.
#[derive(Debug, Clone, Deserialize)]
struct RosterEntry {
    id: String,
    capacity: u32,
    #[serde(default)]
    skills: HashMap<Category, f32>,
}

/// Roster file layout: `[[agents]]` tables.
#[derive(Debug, Clone, Deserialize)]
struct RosterFile {
    agents: Vec<RosterEntry>,
}

/// Load an agent roster from a TOML file. File order is roster order, which
/// is also the deterministic tie-break order for assignment.
pub fn load_roster(path: &Path) -> Result<Vec<Agent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read roster file {}", path.display()))?;
    let file: RosterFile =
        toml::from_str(&content).context("failed to parse roster TOML")?;

    anyhow::ensure!(!file.agents.is_empty(), "roster file declares no agents");
    for entry in &file.agents {
        anyhow::ensure!(
            entry.capacity > 0,
            "agent {} has zero capacity",
            entry.id
        );
    }

    Ok(file
        .agents
        .into_iter()
        .map(|e| Agent {
            id: e.id,
            skills: e.skills,
            capacity: e.capacity,
            load: 0,
        })
        .collect())
}
