//! Storm detection — burst volume gating, similarity confirmation, and
//! at-most-once batch consolidation.
//!
//! Two cooperating mechanisms:
//! 1. A purely temporal volume gate: a bounded sliding window of arrival
//!    timestamps. Cheap (O(1) amortized) and content-blind.
//! 2. Similarity confirmation: pairwise cosine similarity over a candidate
//!    batch's embeddings. O(k²), bounded by the window cap.
//!
//! Tickets that fire the volume gate join a shared batch buffer and wait a
//! short coalescing delay so concurrently-arriving storm members land in the
//! same batch. The buffer is then swapped out atomically ([`mem::take`] under
//! the lock): exactly one concurrent caller observes a non-empty batch and
//! becomes the leader that creates the master incident; everyone else sees an
//! empty batch and stands down.

use std::collections::VecDeque;
use std::mem;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::ticket::{Incident, Ticket};

/// Storm detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StormConfig {
    /// Trailing window length for the volume gate (seconds).
    pub window_secs: u64,
    /// Hard cap on retained arrival timestamps.
    pub window_cap: usize,
    /// Window size that must be exceeded for the gate to fire.
    pub volume_threshold: usize,
    /// Cosine similarity above which a pair counts as near-identical.
    pub similarity_threshold: f32,
    /// Near-identical pairs required to confirm a storm.
    pub pair_threshold: usize,
    /// Minimum number of embedded tickets required to confirm.
    pub min_sample: usize,
    /// Delay letting concurrent storm tickets join the same batch (ms).
    pub coalesce_delay_ms: u64,
}

impl Default for StormConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            window_cap: 200,
            volume_threshold: 10,
            similarity_threshold: 0.9,
            pair_threshold: 10,
            min_sample: 10,
            coalesce_delay_ms: 100,
        }
    }
}

/// Cosine similarity of two vectors. Empty or zero-magnitude vectors
/// compare as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Windowed storm detector with a coalescing batch buffer.
pub struct StormDetector {
    config: StormConfig,
    window: VecDeque<Instant>,
    batch: Vec<Ticket>,
}

impl StormDetector {
    pub fn new(config: StormConfig) -> Self {
        let cap = config.window_cap;
        Self {
            config,
            window: VecDeque::with_capacity(cap),
            batch: Vec::new(),
        }
    }

    /// Record one ticket arrival and evaluate the volume gate.
    ///
    /// Returns true iff, after appending this arrival and evicting entries
    /// older than the trailing window, the window size exceeds the volume
    /// threshold.
    pub fn observe_arrival(&mut self) -> bool {
        self.observe_at(Instant::now())
    }

    fn observe_at(&mut self, now: Instant) -> bool {
        if self.window.len() == self.config.window_cap {
            self.window.pop_front();
        }
        self.window.push_back(now);

        let horizon = Duration::from_secs(self.config.window_secs);
        while self
            .window
            .front()
            .is_some_and(|t| now.duration_since(*t) > horizon)
        {
            self.window.pop_front();
        }

        self.window.len() > self.config.volume_threshold
    }

    /// Confirm whether a candidate batch is a genuine storm by embedding
    /// similarity: at least `min_sample` members must carry embeddings and at
    /// least `pair_threshold` pairs must exceed the similarity threshold.
    pub fn confirm_similarity(&self, tickets: &[Ticket]) -> bool {
        let embeddings: Vec<&[f32]> = tickets
            .iter()
            .filter_map(|t| t.embedding.as_deref())
            .filter(|e| !e.is_empty())
            .collect();

        if embeddings.len() < self.config.min_sample {
            return false;
        }

        let mut similar_pairs = 0usize;
        for i in 0..embeddings.len() {
            for j in (i + 1)..embeddings.len() {
                if cosine_similarity(embeddings[i], embeddings[j])
                    > self.config.similarity_threshold
                {
                    similar_pairs += 1;
                    if similar_pairs >= self.config.pair_threshold {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Add a gate-firing ticket to the shared batch buffer.
    pub fn join_batch(&mut self, ticket: Ticket) {
        self.batch.push(ticket);
    }

    /// Atomically take the accumulated batch, leaving an empty buffer.
    ///
    /// Among concurrent callers exactly one receives the non-empty batch and
    /// becomes the leader; the rest receive an empty vec.
    pub fn take_batch(&mut self) -> Vec<Ticket> {
        mem::take(&mut self.batch)
    }

    /// How long a gate-firing caller waits before taking the batch.
    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.config.coalesce_delay_ms)
    }

    pub fn config(&self) -> &StormConfig {
        &self.config
    }
}

impl Default for StormDetector {
    fn default() -> Self {
        Self::new(StormConfig::default())
    }
}

/// Consolidate a storm batch into one master incident, marking every member
/// as a duplicate of it. Members keep their ids; the incident records them.
pub fn create_master_incident(batch: &mut [Ticket], similarity_confirmed: bool) -> Incident {
    let sample = batch.first().map(|t| t.text.clone()).unwrap_or_default();
    let member_ids = batch.iter().map(|t| t.id.clone()).collect();
    let incident = Incident::new(member_ids, sample, similarity_confirmed);

    for ticket in batch.iter_mut() {
        ticket.is_duplicate = true;
        ticket.master_incident_id = Some(incident.id.clone());
    }
    incident
}
