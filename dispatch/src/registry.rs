//! Skill-aware agent registry with capacity-bounded assignment.
//!
//! The roster is an ordered list fixed at startup. Assignment scores each
//! eligible agent by `skill × availability` and picks the strictly greatest
//! score; ties resolve to the earliest-registered eligible agent, which makes
//! assignment fully deterministic for a given roster state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ticket::{Category, Ticket};

/// A routing target with per-category skill scores and a load budget.
///
/// Invariant: `0 <= load <= capacity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    /// Skill score per category, each in `[0, 1]`. Missing categories score 0.
    pub skills: HashMap<Category, f32>,
    pub capacity: u32,
    #[serde(default)]
    pub load: u32,
}

impl Agent {
    pub fn new(id: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            skills: HashMap::new(),
            capacity,
            load: 0,
        }
    }

    pub fn with_skill(mut self, category: Category, score: f32) -> Self {
        self.skills.insert(category, score);
        self
    }

    /// Fraction of capacity still free, in `[0, 1]`.
    fn availability(&self) -> f32 {
        1.0 - self.load as f32 / self.capacity as f32
    }
}

/// Outcome of an assignment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    /// Assigned to the named agent; its load was incremented.
    Agent(String),
    /// No agent had free capacity; all loads unchanged.
    Queued,
}

impl Assignment {
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Agent(id) => Some(id),
            Self::Queued => None,
        }
    }
}

impl std::fmt::Display for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "{id}"),
            Self::Queued => write!(f, "queued"),
        }
    }
}

/// Per-agent load snapshot for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoad {
    pub id: String,
    pub load: u32,
    pub capacity: u32,
}

/// Fixed roster of agents, registered once at startup.
pub struct AgentRegistry {
    agents: Vec<Agent>,
}

impl AgentRegistry {
    /// Build a registry from an ordered roster. Roster order is the
    /// tie-break order for assignment.
    pub fn new(roster: Vec<Agent>) -> Self {
        Self { agents: roster }
    }

    /// The stock three-agent roster used when no roster file is configured.
    pub fn default_roster() -> Vec<Agent> {
        vec![
            Agent::new("agent-1", 5)
                .with_skill(Category::Billing, 0.9)
                .with_skill(Category::Technical, 0.2)
                .with_skill(Category::Legal, 0.1),
            Agent::new("agent-2", 5)
                .with_skill(Category::Billing, 0.3)
                .with_skill(Category::Technical, 0.9)
                .with_skill(Category::Legal, 0.2),
            Agent::new("agent-3", 3)
                .with_skill(Category::Billing, 0.4)
                .with_skill(Category::Technical, 0.4)
                .with_skill(Category::Legal, 0.9),
        ]
    }

    /// Assign a ticket to the best-scoring agent with free capacity.
    ///
    /// Score is `skill[category] × (1 − load/capacity)`; an agent without the
    /// ticket's category (or an uncategorized ticket) scores 0 but can still
    /// win when every eligible score is 0 — the first agent with free
    /// capacity takes it. Returns [`Assignment::Queued`] and leaves all loads
    /// untouched when nobody is eligible.
    pub fn assign(&mut self, ticket: &Ticket) -> Assignment {
        let mut best: Option<(usize, f32)> = None;

        for (idx, agent) in self.agents.iter().enumerate() {
            if agent.load >= agent.capacity {
                continue;
            }
            let skill = ticket
                .category
                .and_then(|c| agent.skills.get(&c).copied())
                .unwrap_or(0.0);
            let score = skill * agent.availability();

            // Strictly greater keeps ties on the earliest-registered agent.
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }

        match best {
            Some((idx, _)) => {
                let agent = &mut self.agents[idx];
                agent.load += 1;
                Assignment::Agent(agent.id.clone())
            }
            None => Assignment::Queued,
        }
    }

    /// Release one unit of load from an agent.
    ///
    /// Idempotent under retries: load is clamped at 0 and an unknown id is a
    /// no-op rather than an error.
    pub fn release(&mut self, agent_id: &str) {
        match self.agents.iter_mut().find(|a| a.id == agent_id) {
            Some(agent) => agent.load = agent.load.saturating_sub(1),
            None => debug!(agent = agent_id, "release for unknown agent ignored"),
        }
    }

    /// Snapshot of current loads, in roster order.
    pub fn snapshot(&self) -> Vec<AgentLoad> {
        self.agents
            .iter()
            .map(|a| AgentLoad {
                id: a.id.clone(),
                load: a.load,
                capacity: a.capacity,
            })
            .collect()
    }

    /// Total free capacity across the roster.
    pub fn free_capacity(&self) -> u32 {
        self.agents
            .iter()
            .map(|a| a.capacity.saturating_sub(a.load))
            .sum()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(Self::default_roster())
    }
}
