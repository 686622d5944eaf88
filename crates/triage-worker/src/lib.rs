//! Ticket triage worker — the orchestrating half of the triage engine.
//!
//! Consumes raw tickets from an at-least-once queue, suppresses duplicate
//! deliveries with a TTL idempotency lock, short-circuits ticket storms into
//! consolidated incidents, classifies everything else behind a latency
//! circuit breaker, and dispatches to skill-constrained agents.
//!
//! External collaborators (queue, lock store, notification transport) sit
//! behind traits in the `*_bridge` and [`notify`] modules; in-memory
//! implementations back tests and single-node deployments.

pub mod classifier;
pub mod config;
pub mod lock_bridge;
pub mod notify;
pub mod queue_bridge;
pub mod worker;
