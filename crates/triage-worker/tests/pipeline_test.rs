//! End-to-end pipeline tests over the in-memory broker and lock store.
//!
//! These exercise the worker's concurrency contracts: no ticket is lost
//! under concurrent intake, duplicate deliveries within the lock TTL are
//! no-ops, malformed payloads never kill the loop, the breaker switches the
//! classifier to its fallback path under sustained slowness, and resolution
//! releases agent capacity to waiting tickets.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatch::{Agent, AgentRegistry, BreakerConfig, Category, CircuitState, StormConfig};
use triage_worker::classifier::ClassifierModel;
use triage_worker::config::WorkerConfig;
use triage_worker::lock_bridge::InMemoryLockStore;
use triage_worker::notify::NotificationSink;
use triage_worker::queue_bridge::{InMemoryQueue, TicketQueue};
use triage_worker::worker::TicketWorker;

// ── Test doubles ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn messages(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, text: &str) {
        self.delivered.lock().unwrap().push(text.to_string());
    }
}

/// Primary that burns past the breaker's high threshold on every call.
struct SlowPrimary;

impl ClassifierModel for SlowPrimary {
    fn classify(&self, _text: &str) -> Category {
        std::thread::sleep(Duration::from_millis(80));
        Category::Billing
    }

    fn urgency(&self, _text: &str) -> f32 {
        0.1
    }

    fn name(&self) -> &str {
        "slow-primary"
    }
}

/// Fallback that answers instantly and distinguishably.
struct InstantFallback;

impl ClassifierModel for InstantFallback {
    fn classify(&self, _text: &str) -> Category {
        Category::Legal
    }

    fn urgency(&self, _text: &str) -> f32 {
        0.1
    }

    fn name(&self) -> &str {
        "instant-fallback"
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    queue: Arc<InMemoryQueue>,
    sink: Arc<RecordingSink>,
    worker: Arc<TicketWorker>,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

/// Storm gate effectively disabled — these tests target the normal path.
fn quiet_storm() -> StormConfig {
    StormConfig {
        volume_threshold: 1000,
        ..StormConfig::default()
    }
}

fn test_config() -> WorkerConfig {
    WorkerConfig {
        pop_timeout: Duration::from_millis(50),
        storm: quiet_storm(),
        ..WorkerConfig::default()
    }
}

fn start_worker(roster: Vec<Agent>, config: WorkerConfig) -> Harness {
    start_worker_with(roster, config, None)
}

fn start_worker_with(
    roster: Vec<Agent>,
    config: WorkerConfig,
    models: Option<(Box<dyn ClassifierModel>, Box<dyn ClassifierModel>)>,
) -> Harness {
    let queue = Arc::new(InMemoryQueue::new());
    let locks = Arc::new(InMemoryLockStore::new());
    let sink = Arc::new(RecordingSink::default());

    let mut worker = TicketWorker::new(
        Arc::clone(&queue) as Arc<dyn TicketQueue>,
        locks,
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        roster,
        config,
    );
    if let Some((primary, fallback)) = models {
        worker = worker.with_classifier_models(primary, fallback);
    }
    let worker = Arc::new(worker);
    let handle = tokio::spawn(Arc::clone(&worker).run());
    Harness {
        queue,
        sink,
        worker,
        handle,
    }
}

async fn push_ticket(queue: &InMemoryQueue, id: &str, text: &str) {
    queue
        .push(serde_json::json!({ "id": id, "text": text }).to_string())
        .await
        .unwrap();
}

async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_fifteen_concurrent_tickets_all_complete() {
    let h = start_worker(AgentRegistry::default_roster(), test_config());

    let ids: Vec<String> = (0..15).map(|_| uuid::Uuid::new_v4().to_string()).collect();
    let mut pushers = Vec::new();
    for id in &ids {
        let queue = Arc::clone(&h.queue);
        let id = id.clone();
        pushers.push(tokio::spawn(async move {
            push_ticket(&queue, &id, "please refund my broken invoice").await;
        }));
    }
    for p in pushers {
        p.await.unwrap();
    }

    let worker = Arc::clone(&h.worker);
    assert!(
        wait_for(|| worker.counters().processed == 15, Duration::from_secs(5)).await,
        "not all tickets completed: {:?}",
        h.worker.counters()
    );

    let counters = h.worker.counters();
    assert_eq!(counters.malformed, 0);
    assert_eq!(counters.duplicates_skipped, 0);
    assert_eq!(counters.storms, 0);

    // Every pushed id surfaced exactly once on the feed.
    let mut seen: Vec<String> = h.worker.feed_recent().into_iter().map(|s| s.id).collect();
    seen.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_delivery_within_ttl_is_noop() {
    let h = start_worker(AgentRegistry::default_roster(), test_config());

    push_ticket(&h.queue, "dup-1", "cannot login to my account").await;
    push_ticket(&h.queue, "dup-1", "cannot login to my account").await;

    let worker = Arc::clone(&h.worker);
    assert!(
        wait_for(
            || {
                let c = worker.counters();
                c.processed == 1 && c.duplicates_skipped == 1
            },
            Duration::from_secs(5)
        )
        .await,
        "expected one completed pipeline and one suppressed duplicate: {:?}",
        h.worker.counters()
    );

    // Give a would-be second pipeline time to show up; it must not.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.worker.counters().processed, 1);
    assert_eq!(h.worker.feed_recent().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_payload_does_not_kill_intake() {
    let h = start_worker(AgentRegistry::default_roster(), test_config());

    h.queue.push("this is not json".to_string()).await.unwrap();
    push_ticket(&h.queue, "ok-1", "server error after update").await;

    let worker = Arc::clone(&h.worker);
    assert!(
        wait_for(
            || {
                let c = worker.counters();
                c.processed == 1 && c.malformed == 1
            },
            Duration::from_secs(5)
        )
        .await
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_high_urgency_ticket_fires_notification() {
    let h = start_worker(AgentRegistry::default_roster(), test_config());

    push_ticket(&h.queue, "calm-1", "question about my subscription plan").await;
    push_ticket(
        &h.queue,
        "hot-1",
        "URGENT critical outage, server down and broken!!",
    )
    .await;

    let worker = Arc::clone(&h.worker);
    assert!(
        wait_for(|| worker.counters().processed == 2, Duration::from_secs(5)).await
    );
    assert!(
        wait_for(|| !h.sink.messages().is_empty(), Duration::from_secs(2)).await,
        "high-urgency notification never fired"
    );

    let messages = h.sink.messages();
    assert_eq!(messages.len(), 1, "calm ticket must not notify: {messages:?}");
    assert!(messages[0].contains("hot-1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resolution_releases_capacity_to_waiting_ticket() {
    let roster = vec![Agent::new("solo", 1).with_skill(Category::Billing, 0.9)];
    let h = start_worker(roster, test_config());

    push_ticket(&h.queue, "first", "refund my invoice please").await;
    let worker = Arc::clone(&h.worker);
    assert!(wait_for(|| worker.counters().processed == 1, Duration::from_secs(5)).await);
    assert_eq!(h.worker.assigned_agent("first").as_deref(), Some("solo"));

    // Capacity exhausted: the second ticket waits.
    push_ticket(&h.queue, "second", "billing charged twice").await;
    assert!(wait_for(|| worker.counters().processed == 2, Duration::from_secs(5)).await);
    assert_eq!(h.worker.assigned_agent("second"), None);

    // Resolving the first frees the slot and back-fills the waiter.
    assert!(h.worker.resolve("first"));
    assert_eq!(h.worker.assigned_agent("second").as_deref(), Some("solo"));

    // Resolve is idempotent.
    assert!(!h.worker.resolve("first"));
    assert!(!h.worker.resolve("never-seen"));

    let loads = h.worker.status().await.agents;
    assert_eq!(loads[0].load, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sustained_slowness_opens_breaker_and_engages_fallback() {
    let config = WorkerConfig {
        breaker: BreakerConfig {
            high_threshold_ms: 50.0,
            low_threshold_ms: 40.0,
            open_count: 3,
            close_count: 5,
        },
        ..test_config()
    };
    let h = start_worker_with(
        AgentRegistry::default_roster(),
        config,
        Some((Box::new(SlowPrimary), Box::new(InstantFallback))),
    );
    let worker = Arc::clone(&h.worker);

    // Three sequential slow classifications trip the breaker.
    for i in 0..3u64 {
        push_ticket(&h.queue, &format!("slow-{i}"), "ticket text").await;
        let want = i + 1;
        assert!(
            wait_for(|| worker.counters().processed == want, Duration::from_secs(5)).await
        );
    }
    assert_eq!(h.worker.circuit_state(), CircuitState::Open);

    // With the circuit open the fallback path serves, visibly.
    push_ticket(&h.queue, "fb-0", "ticket text").await;
    assert!(wait_for(|| worker.counters().processed == 4, Duration::from_secs(5)).await);
    let entry = h
        .worker
        .feed_recent()
        .into_iter()
        .find(|s| s.id == "fb-0")
        .unwrap();
    assert_eq!(entry.category, Some(Category::Legal));

    // Five consecutive fast fallback calls close the circuit again.
    for i in 1..5u64 {
        push_ticket(&h.queue, &format!("fb-{i}"), "ticket text").await;
        let want = 4 + i;
        assert!(
            wait_for(|| worker.counters().processed == want, Duration::from_secs(5)).await
        );
    }
    assert_eq!(h.worker.circuit_state(), CircuitState::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_terminates_loop_cleanly() {
    let h = start_worker(AgentRegistry::default_roster(), test_config());
    push_ticket(&h.queue, "t-1", "server is down").await;
    let worker = Arc::clone(&h.worker);
    assert!(wait_for(|| worker.counters().processed == 1, Duration::from_secs(5)).await);

    h.worker.shutdown();
    let result = h.handle.await.unwrap();
    assert!(result.is_ok());
}
