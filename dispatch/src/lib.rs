//! Deterministic core of the ticket triage engine.
//!
//! This crate holds the components with no I/O of their own:
//! - [`queue::PriorityDispatchQueue`]: urgency-ordered dispatch with FIFO
//!   tie-breaks.
//! - [`registry::AgentRegistry`]: skill- and capacity-aware assignment over a
//!   fixed roster.
//! - [`breaker::CircuitBreaker`]: latency-driven primary/fallback switching
//!   for the classification path.
//! - [`storm::StormDetector`]: burst detection and at-most-once incident
//!   consolidation.
//! - [`feed::ActivityFeed`]: the bounded recent-activity ring behind the
//!   dashboard boundary.
//!
//! Everything here is plain owned state; the worker crate wraps these in the
//! synchronization its concurrency model needs.

pub mod breaker;
pub mod feed;
pub mod queue;
pub mod registry;
pub mod storm;
pub mod ticket;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState, FallbackFlag};
pub use feed::{ActivityFeed, TicketSummary, DEFAULT_FEED_CAPACITY};
pub use queue::PriorityDispatchQueue;
pub use registry::{Agent, AgentLoad, AgentRegistry, Assignment};
pub use storm::{cosine_similarity, create_master_incident, StormConfig, StormDetector};
pub use ticket::{Category, Incident, RawTicket, Ticket};
