//! Ticket intake loop and per-ticket processing pipeline.
//!
//! One single-consumer loop pops raw records and hands each to an
//! independently scheduled task, so a slow ticket never blocks intake. Task
//! spawning is bounded by a semaphore: once `max_concurrency` pipelines are
//! in flight the loop blocks on a permit instead of spawning unboundedly.
//!
//! Failure isolation happens at the task boundary. The loop itself only ever
//! retries: connectivity-class queue failures back off 3 s, anything else
//! 1 s, and nothing short of cancellation terminates it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dispatch::{
    create_master_incident, ActivityFeed, Agent, AgentLoad, AgentRegistry, Assignment,
    CircuitBreaker, CircuitState, PriorityDispatchQueue, RawTicket, StormDetector, Ticket,
    TicketSummary,
};

use crate::classifier::{Classifier, ClassifierModel, ClassifierOutput};
use crate::config::WorkerConfig;
use crate::lock_bridge::{ticket_lock_key, LockStore};
use crate::notify::NotificationSink;
use crate::queue_bridge::{QueueError, TicketQueue};

/// Monotonic pipeline counters.
#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    duplicates_skipped: AtomicU64,
    malformed: AtomicU64,
    storms: AtomicU64,
    storm_members: AtomicU64,
    high_urgency: AtomicU64,
}

/// Serializable view of the pipeline counters.
#[derive(Debug, Clone, Serialize)]
pub struct CountersSnapshot {
    pub processed: u64,
    pub duplicates_skipped: u64,
    pub malformed: u64,
    pub storms: u64,
    pub storm_members: u64,
    pub high_urgency: u64,
}

impl Counters {
    fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            storms: self.storms.load(Ordering::Relaxed),
            storm_members: self.storm_members.load(Ordering::Relaxed),
            high_urgency: self.high_urgency.load(Ordering::Relaxed),
        }
    }
}

/// Status snapshot served to the health/dashboard boundary.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub status: &'static str,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// Records waiting in the broker queue; `None` if the broker errored.
    pub broker_depth: Option<usize>,
    /// Tickets held by the priority dispatch queue.
    pub dispatch_depth: usize,
    pub circuit_breaker: CircuitState,
    pub agents: Vec<AgentLoad>,
    pub in_flight: usize,
    pub counters: CountersSnapshot,
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// The orchestrator: owns the shared triage state and runs the intake loop.
pub struct TicketWorker {
    queue: Arc<dyn TicketQueue>,
    locks: Arc<dyn LockStore>,
    sink: Arc<dyn NotificationSink>,
    classifier: Arc<Classifier>,
    breaker: Mutex<CircuitBreaker>,
    storm: Mutex<StormDetector>,
    dispatch_queue: Mutex<PriorityDispatchQueue>,
    registry: Mutex<AgentRegistry>,
    feed: Mutex<ActivityFeed>,
    /// Ticket id → agent id while assigned, `None` once resolved. Retained
    /// for the process lifetime so stale dispatch-queue entries are never
    /// re-assigned.
    assignments: Mutex<HashMap<String, Option<String>>>,
    counters: Counters,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    config: WorkerConfig,
}

impl TicketWorker {
    pub fn new(
        queue: Arc<dyn TicketQueue>,
        locks: Arc<dyn LockStore>,
        sink: Arc<dyn NotificationSink>,
        roster: Vec<Agent>,
        config: WorkerConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.breaker.clone());
        let classifier = Arc::new(Classifier::new(breaker.fallback_flag()));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            queue,
            locks,
            sink,
            classifier,
            breaker: Mutex::new(breaker),
            storm: Mutex::new(StormDetector::new(config.storm.clone())),
            dispatch_queue: Mutex::new(PriorityDispatchQueue::new()),
            registry: Mutex::new(AgentRegistry::new(roster)),
            feed: Mutex::new(ActivityFeed::new(config.feed_capacity)),
            assignments: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            semaphore,
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Replace the classifier's model pair (tests simulate slow or broken
    /// primaries through this).
    pub fn with_classifier_models(
        self,
        primary: Box<dyn ClassifierModel>,
        fallback: Box<dyn ClassifierModel>,
    ) -> Self {
        let flag = self.breaker.lock().unwrap().fallback_flag();
        Self {
            classifier: Arc::new(Classifier::with_models(primary, fallback, flag)),
            ..self
        }
    }

    /// Run the intake loop until cancelled. Never returns on queue failures.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(queue = %self.config.queue_key, "worker started");
        // A prior run's feed entries must never surface on the dashboard.
        self.feed.lock().unwrap().clear();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("worker shutting down");
                    return Ok(());
                }
                popped = self.queue.pop(self.config.pop_timeout) => match popped {
                    Ok(None) => continue,
                    Ok(Some(raw)) => {
                        let permit = Arc::clone(&self.semaphore)
                            .acquire_owned()
                            .await
                            .context("worker semaphore closed")?;
                        let worker = Arc::clone(&self);
                        tokio::spawn(async move {
                            worker.process_raw(raw).await;
                            drop(permit);
                        });
                    }
                    Err(QueueError::Connection(e)) => {
                        warn!(error = %e, backoff_secs = self.config.connect_backoff.as_secs(), "queue connection lost, retrying");
                        tokio::time::sleep(self.config.connect_backoff).await;
                    }
                    Err(e) => {
                        error!(error = %e, "unexpected intake failure");
                        tokio::time::sleep(self.config.error_backoff).await;
                    }
                }
            }
        }
    }

    /// Full pipeline for one raw delivery. Infallible by contract: every
    /// failure mode is logged and absorbed here.
    async fn process_raw(&self, raw: String) {
        let record = match RawTicket::from_json(&raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed ticket payload dropped");
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let ticket = Ticket::from(record);

        // Idempotency lock: create-if-absent with TTL. The lock is never
        // released — it expires, bounding the reprocessing-suppression window.
        let key = ticket_lock_key(&ticket.id);
        match self
            .locks
            .create_if_absent(&key, "1", self.config.lock_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(ticket = %ticket.id, "duplicate delivery skipped");
                self.counters.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                error!(ticket = %ticket.id, error = %e, "lock store unavailable — dropping delivery");
                return;
            }
        }

        info!(ticket = %ticket.id, "processing ticket");

        if self.storm.lock().unwrap().observe_arrival() {
            self.handle_storm(ticket).await;
            return;
        }
        self.process_single(ticket).await;
    }

    /// Classify, update the breaker, dispatch, publish, notify.
    async fn process_single(&self, mut ticket: Ticket) {
        let ClassifierOutput {
            category,
            urgency,
            embedding,
            latency_ms,
            served_by,
        } = self.classify_guarded(&ticket.text).await;

        self.breaker.lock().unwrap().record_latency(latency_ms);

        ticket.category = Some(category);
        ticket.urgency = urgency;
        if !embedding.is_empty() {
            ticket.embedding = Some(embedding);
        }

        // Assignment is recorded before the ticket enters the dispatch queue
        // so a concurrent backfill can never pick up an already-taken ticket.
        let assignment = self.registry.lock().unwrap().assign(&ticket);
        if let Some(agent_id) = assignment.agent_id() {
            self.assignments
                .lock()
                .unwrap()
                .insert(ticket.id.clone(), Some(agent_id.to_string()));
        }
        self.dispatch_queue.lock().unwrap().enqueue(ticket.clone());

        info!(
            ticket = %ticket.id,
            category = %category,
            urgency = f64::from(ticket.urgency),
            agent = %assignment,
            latency_ms = latency_ms,
            served_by = %served_by,
            "ticket dispatched"
        );

        self.feed
            .lock()
            .unwrap()
            .push(TicketSummary::from_ticket(&ticket, assignment.agent_id()));
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        if ticket.urgency > self.config.urgency_notify_threshold {
            self.counters.high_urgency.fetch_add(1, Ordering::Relaxed);
            self.sink
                .deliver(&format!(
                    "High-urgency ticket {}\ncategory: {}\nurgency: {:.2}\nassigned to: {}\ntext: {}",
                    ticket.id,
                    category,
                    ticket.urgency,
                    assignment,
                    preview(&ticket.text, 200),
                ))
                .await;
        }
    }

    /// Storm path: join the shared batch, wait out the coalescing window,
    /// and — if this task is the one that drains a non-empty batch — create
    /// the single master incident and consolidated notification.
    async fn handle_storm(&self, ticket: Ticket) {
        debug!(ticket = %ticket.id, "volume gate fired — joining storm batch");
        let delay = {
            let mut storm = self.storm.lock().unwrap();
            storm.join_batch(ticket);
            storm.coalesce_delay()
        };
        tokio::time::sleep(delay).await;

        let mut batch = self.storm.lock().unwrap().take_batch();
        if batch.is_empty() {
            // Another concurrent task drained the batch and leads it.
            return;
        }

        for member in &mut batch {
            if member.embedding.is_none() {
                let embedding = self.classifier.embedding(&member.text);
                if !embedding.is_empty() {
                    member.embedding = Some(embedding);
                }
            }
        }
        let confirmed = self.storm.lock().unwrap().confirm_similarity(&batch);
        let incident = create_master_incident(&mut batch, confirmed);

        self.counters.storms.fetch_add(1, Ordering::Relaxed);
        self.counters
            .storm_members
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        warn!(
            incident = %incident.id,
            members = incident.member_count(),
            similarity_confirmed = confirmed,
            "storm consolidated — individual dispatch suppressed"
        );

        {
            let mut feed = self.feed.lock().unwrap();
            for member in &batch {
                feed.push(TicketSummary::from_ticket(member, None));
            }
        }

        self.sink
            .deliver(&format!(
                "Ticket storm detected\nmaster incident: {}\ntickets suppressed: {}\nsample: {}",
                incident.id,
                incident.member_count(),
                preview(&incident.sample_text, 150),
            ))
            .await;
    }

    /// Run one classification call with a hard timeout. A timeout or a
    /// failed call yields degraded defaults carrying an infinite latency
    /// sample, so the breaker still reacts to a wedged primary.
    async fn classify_guarded(&self, text: &str) -> ClassifierOutput {
        let classifier = Arc::clone(&self.classifier);
        let owned = text.to_string();
        let call = tokio::task::spawn_blocking(move || classifier.process(&owned));

        match tokio::time::timeout(self.config.classify_timeout, call).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(error = %e, "classifier task failed — using degraded defaults");
                ClassifierOutput::degraded_default()
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.classify_timeout.as_millis() as u64,
                    "classification timed out — using degraded defaults"
                );
                ClassifierOutput::degraded_default()
            }
        }
    }

    /// Mark a ticket resolved: release its agent's capacity and back-fill
    /// the freed slot with the highest-urgency still-waiting ticket.
    ///
    /// Returns false for unknown or already-resolved tickets, keeping the
    /// operation idempotent under retries.
    pub fn resolve(&self, ticket_id: &str) -> bool {
        let released = {
            let mut assignments = self.assignments.lock().unwrap();
            assignments.get_mut(ticket_id).and_then(Option::take)
        };
        let Some(agent_id) = released else {
            return false;
        };

        self.registry.lock().unwrap().release(&agent_id);
        info!(ticket = ticket_id, agent = %agent_id, "ticket resolved — capacity released");
        self.backfill();
        true
    }

    /// Assign freed capacity to the best waiting ticket, skipping dispatch
    /// queue entries that were already assigned directly.
    fn backfill(&self) {
        loop {
            let Some(next) = self.dispatch_queue.lock().unwrap().dequeue() else {
                return;
            };
            if self.assignments.lock().unwrap().contains_key(&next.id) {
                continue;
            }
            match self.registry.lock().unwrap().assign(&next) {
                Assignment::Agent(agent_id) => {
                    self.assignments
                        .lock()
                        .unwrap()
                        .insert(next.id.clone(), Some(agent_id.clone()));
                    info!(ticket = %next.id, agent = %agent_id, "waiting ticket assigned to freed capacity");
                    self.feed
                        .lock()
                        .unwrap()
                        .push(TicketSummary::from_ticket(&next, Some(&agent_id)));
                }
                Assignment::Queued => {
                    // Lost the race for the freed slot; keep waiting.
                    self.dispatch_queue.lock().unwrap().enqueue(next);
                }
            }
            return;
        }
    }

    /// Agent currently assigned to a ticket, if any.
    pub fn assigned_agent(&self, ticket_id: &str) -> Option<String> {
        self.assignments
            .lock()
            .unwrap()
            .get(ticket_id)
            .cloned()
            .flatten()
    }

    /// Health/dashboard snapshot.
    pub async fn status(&self) -> WorkerStatus {
        WorkerStatus {
            status: "ok",
            generated_at: chrono::Utc::now(),
            broker_depth: self.queue.depth().await.ok(),
            dispatch_depth: self.dispatch_queue.lock().unwrap().depth(),
            circuit_breaker: self.breaker.lock().unwrap().state(),
            agents: self.registry.lock().unwrap().snapshot(),
            in_flight: self.config.max_concurrency - self.semaphore.available_permits(),
            counters: self.counters.snapshot(),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.lock().unwrap().state()
    }

    /// Current pipeline counters.
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Feed entries, most recent first.
    pub fn feed_recent(&self) -> Vec<TicketSummary> {
        self.feed.lock().unwrap().recent()
    }

    /// Subscribe to live feed entries.
    pub fn subscribe_feed(&self) -> tokio::sync::broadcast::Receiver<TicketSummary> {
        self.feed.lock().unwrap().subscribe()
    }

    /// Request loop termination.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("hello", 200), "hello");
        assert_eq!(preview("héllo wörld", 5), "héllo");
    }

    #[test]
    fn test_counters_snapshot_roundtrip() {
        let counters = Counters::default();
        counters.processed.fetch_add(3, Ordering::Relaxed);
        counters.storms.fetch_add(1, Ordering::Relaxed);
        let snap = counters.snapshot();
        assert_eq!(snap.processed, 3);
        assert_eq!(snap.storms, 1);
        assert_eq!(snap.malformed, 0);
    }
}
