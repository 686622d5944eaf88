//! Core ticket data model shared across the triage pipeline.
//!
//! A [`Ticket`] is created at ingestion with defaults, enriched by the
//! classifier (category, urgency, embedding), and possibly consolidated by
//! storm detection (`is_duplicate` + `master_incident_id`). Ownership moves
//! linearly along the pipeline — no two components mutate the same ticket
//! concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of ticket categories.
///
/// Classifier output outside this set is coerced to [`Category::Technical`]
/// at the boundary via [`Category::coerce`] — categories are never free
/// strings past ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Billing,
    Technical,
    Legal,
}

impl Category {
    /// All categories in a fixed order.
    pub fn all() -> &'static [Category] {
        &[Category::Billing, Category::Technical, Category::Legal]
    }

    /// Map arbitrary classifier output onto the closed set.
    ///
    /// Unrecognized labels fall back to `Technical`, the safe default for
    /// routing purposes.
    pub fn coerce(label: &str) -> Category {
        match label.trim().to_ascii_lowercase().as_str() {
            "billing" => Category::Billing,
            "technical" => Category::Technical,
            "legal" => Category::Legal,
            _ => Category::Technical,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Billing => write!(f, "Billing"),
            Self::Technical => write!(f, "Technical"),
            Self::Legal => write!(f, "Legal"),
        }
    }
}

/// The raw record popped from the ticket queue, serialized as JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTicket {
    pub id: String,
    pub text: String,
}

impl RawTicket {
    /// Parse a raw queue payload. Malformed payloads are a per-ticket error,
    /// handled (logged and dropped) by the worker.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// A unit of incoming support work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub text: String,
    /// Set by the classifier; `None` until classification (or for storm
    /// members, which skip classification entirely).
    pub category: Option<Category>,
    /// Urgency estimate in `[0, 1]`. Defaults to 0.
    pub urgency: f32,
    /// Text embedding, present once computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Whether this ticket was consolidated into a master incident.
    pub is_duplicate: bool,
    /// Id of the consolidating incident, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_incident_id: Option<String>,
}

impl Ticket {
    /// Construct a fresh ticket with ingestion defaults.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            category: None,
            urgency: 0.0,
            embedding: None,
            is_duplicate: false,
            master_incident_id: None,
        }
    }
}

impl From<RawTicket> for Ticket {
    fn from(raw: RawTicket) -> Self {
        Ticket::new(raw.id, raw.text)
    }
}

/// A master incident consolidating the members of one ticket storm.
///
/// Terminal once created — incidents are never merged or extended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub member_ticket_ids: Vec<String>,
    /// Representative text, taken from the first member of the batch.
    pub sample_text: String,
    /// Whether embedding similarity confirmed the batch as near-duplicates.
    pub similarity_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

impl Incident {
    pub(crate) fn new(member_ids: Vec<String>, sample_text: String, similarity_confirmed: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            member_ticket_ids: member_ids,
            sample_text,
            similarity_confirmed,
            created_at: Utc::now(),
        }
    }

    pub fn member_count(&self) -> usize {
        self.member_ticket_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_known_labels() {
        assert_eq!(Category::coerce("Billing"), Category::Billing);
        assert_eq!(Category::coerce("technical"), Category::Technical);
        assert_eq!(Category::coerce(" LEGAL "), Category::Legal);
    }

    #[test]
    fn test_coerce_unknown_defaults_to_technical() {
        assert_eq!(Category::coerce("Spam"), Category::Technical);
        assert_eq!(Category::coerce(""), Category::Technical);
    }

    #[test]
    fn test_raw_ticket_parses_wire_format() {
        let raw = RawTicket::from_json(r#"{"id":"t-1","text":"server is down"}"#).unwrap();
        assert_eq!(raw.id, "t-1");
        assert_eq!(raw.text, "server is down");
    }

    #[test]
    fn test_raw_ticket_rejects_malformed_payload() {
        assert!(RawTicket::from_json("not json").is_err());
        assert!(RawTicket::from_json(r#"{"id":"t-1"}"#).is_err());
    }

    #[test]
    fn test_ticket_ingestion_defaults() {
        let t = Ticket::new("t-1", "help");
        assert_eq!(t.urgency, 0.0);
        assert!(t.category.is_none());
        assert!(!t.is_duplicate);
        assert!(t.master_incident_id.is_none());
    }
}
