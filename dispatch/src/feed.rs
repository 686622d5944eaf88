//! Recent-activity feed — the dashboard boundary.
//!
//! A bounded, most-recent-first ring of processed-ticket summaries plus a
//! broadcast channel for live subscribers. The ring is cleared at process
//! startup so a dashboard never renders entries from a prior run.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::ticket::{Category, Ticket};

/// Default ring capacity.
pub const DEFAULT_FEED_CAPACITY: usize = 24;

/// Maximum characters of ticket text carried in a summary.
const SUMMARY_TEXT_CHARS: usize = 120;

/// Broadcast capacity for live subscribers.
const CHANNEL_CAPACITY: usize = 64;

/// Summary of one processed ticket, as shown on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSummary {
    pub id: String,
    /// Ticket text truncated for display.
    pub text: String,
    pub category: Option<Category>,
    pub urgency: f32,
    pub is_duplicate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_incident_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
}

impl TicketSummary {
    pub fn from_ticket(ticket: &Ticket, assigned_agent: Option<&str>) -> Self {
        Self {
            id: ticket.id.clone(),
            text: truncate_chars(&ticket.text, SUMMARY_TEXT_CHARS),
            category: ticket.category,
            urgency: ticket.urgency,
            is_duplicate: ticket.is_duplicate,
            master_incident_id: ticket.master_incident_id.clone(),
            assigned_agent: assigned_agent.map(str::to_string),
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Bounded most-recent-first activity ring with live broadcast.
pub struct ActivityFeed {
    capacity: usize,
    entries: VecDeque<TicketSummary>,
    sender: broadcast::Sender<TicketSummary>,
}

impl ActivityFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            sender,
        }
    }

    /// Append a summary; the oldest entry falls off once at capacity.
    pub fn push(&mut self, summary: TicketSummary) {
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(summary.clone());

        // No receivers is fine — the ring is the source of truth.
        if self.sender.send(summary).is_err() {
            debug!("feed entry published (no live subscribers)");
        }
    }

    /// Entries, most recent first.
    pub fn recent(&self) -> Vec<TicketSummary> {
        self.entries.iter().cloned().collect()
    }

    /// Subscribe to live summaries as they are pushed.
    pub fn subscribe(&self) -> broadcast::Receiver<TicketSummary> {
        self.sender.subscribe()
    }

    /// Drop all retained entries (called at startup).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ActivityFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}
