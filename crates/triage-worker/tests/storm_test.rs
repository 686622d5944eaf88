//! Storm consolidation integration tests.
//!
//! A burst of near-identical tickets must yield exactly one master incident
//! and one consolidated notification, with every batch member suppressed
//! from individual dispatch, no matter how many concurrent pipelines saw the
//! volume gate fire.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatch::{AgentRegistry, StormConfig};
use triage_worker::config::WorkerConfig;
use triage_worker::lock_bridge::InMemoryLockStore;
use triage_worker::notify::NotificationSink;
use triage_worker::queue_bridge::{InMemoryQueue, TicketQueue};
use triage_worker::worker::TicketWorker;

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

struct Harness {
    queue: Arc<InMemoryQueue>,
    sink: Arc<RecordingSink>,
    worker: Arc<TicketWorker>,
    _handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

fn start_worker(config: WorkerConfig) -> Harness {
    let queue = Arc::new(InMemoryQueue::new());
    let locks = Arc::new(InMemoryLockStore::new());
    let sink = Arc::new(RecordingSink::default());
    let worker = Arc::new(TicketWorker::new(
        Arc::clone(&queue) as Arc<dyn TicketQueue>,
        locks,
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        AgentRegistry::default_roster(),
        config,
    ));
    let handle = tokio::spawn(Arc::clone(&worker).run());
    Harness {
        queue,
        sink,
        worker,
        _handle: handle,
    }
}

fn storm_config() -> WorkerConfig {
    WorkerConfig {
        pop_timeout: Duration::from_millis(50),
        storm: StormConfig {
            // Generous coalescing window so every gate-firing pipeline in
            // the burst lands in the same batch.
            coalesce_delay_ms: 300,
            ..StormConfig::default()
        },
        ..WorkerConfig::default()
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

#[tokio::test(flavor = "multi_thread")]
async fn test_burst_yields_exactly_one_incident() {
    let h = start_worker(storm_config());

    // Default volume threshold 10: the first 10 arrivals route individually,
    // every later arrival in the window fires the gate.
    for i in 0..25 {
        push_ticket(&h.queue, &format!("burst-{i}"), "server is down nothing works").await;
    }

    let worker = Arc::clone(&h.worker);
    assert!(
        wait_for(
            || {
                let c = worker.counters();
                c.processed + c.storm_members == 25 && c.storms > 0
            },
            Duration::from_secs(10)
        )
        .await,
        "burst never fully drained: {:?}",
        h.worker.counters()
    );

    let counters = h.worker.counters();
    assert_eq!(counters.storms, 1, "expected exactly one consolidated incident");
    assert_eq!(counters.processed, 10);
    assert_eq!(counters.storm_members, 15);

    // Exactly one consolidated notification.
    assert!(
        wait_for(
            || h.sink.messages().iter().any(|m| m.contains("storm")),
            Duration::from_secs(2)
        )
        .await
    );
    let storm_messages: Vec<String> = h
        .sink
        .messages()
        .into_iter()
        .filter(|m| m.contains("storm"))
        .collect();
    assert_eq!(storm_messages.len(), 1, "{storm_messages:?}");
    assert!(storm_messages[0].contains("tickets suppressed: 15"));

    // Every suppressed member references the same incident and was never
    // assigned to an agent.
    let duplicates: Vec<_> = h
        .worker
        .feed_recent()
        .into_iter()
        .filter(|s| s.is_duplicate)
        .collect();
    assert_eq!(duplicates.len(), 15);
    let incident_ids: HashSet<_> = duplicates
        .iter()
        .map(|s| s.master_incident_id.clone().unwrap())
        .collect();
    assert_eq!(incident_ids.len(), 1);
    assert!(duplicates.iter().all(|s| s.assigned_agent.is_none()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_below_threshold_volume_never_storms() {
    let h = start_worker(storm_config());

    for i in 0..5 {
        push_ticket(&h.queue, &format!("calm-{i}"), "server is down nothing works").await;
    }

    let worker = Arc::clone(&h.worker);
    assert!(wait_for(|| worker.counters().processed == 5, Duration::from_secs(5)).await);
    // Let any pending coalescing window elapse before asserting.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.worker.counters().storms, 0);
    assert!(h.sink.messages().iter().all(|m| !m.contains("storm")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_near_identical_burst_is_similarity_confirmed() {
    let h = start_worker(storm_config());

    // Identical wording: bag-of-words embeddings match exactly, so the
    // leader's similarity confirmation must pass.
    for i in 0..25 {
        push_ticket(&h.queue, &format!("same-{i}"), "server is down").await;
    }

    let worker = Arc::clone(&h.worker);
    assert!(
        wait_for(|| worker.counters().storms == 1, Duration::from_secs(10)).await
    );

    // The consolidated notification carries the representative sample.
    assert!(
        wait_for(|| !h.sink.messages().is_empty(), Duration::from_secs(2)).await
    );
    let messages = h.sink.messages();
    let storm_message = messages.iter().find(|m| m.contains("storm")).unwrap();
    assert!(storm_message.contains("sample: server is down"));
}
