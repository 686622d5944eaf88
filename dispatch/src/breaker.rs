//! Latency-driven circuit breaker for the classification path.
//!
//! The breaker tracks consecutive slow and fast classification calls. Three
//! consecutive samples above the high threshold *open* the circuit; five
//! consecutive samples below the low threshold *close* it again. Samples in
//! the mid-band reset both counters without changing state, so stale counts
//! can never combine with a later extreme sample to flip state prematurely.
//!
//! While the circuit is open the classifier must take its lower-latency
//! fallback path. That decision is read lock-free through a [`FallbackFlag`]
//! handle cloned from the breaker and passed to the classifier at
//! construction — never through ambient process state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy — classifier uses its primary path.
    Closed,
    /// Degraded — classifier must use its fallback path.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Samples above this are "slow" (ms).
    pub high_threshold_ms: f64,
    /// Samples below this are "fast" (ms).
    pub low_threshold_ms: f64,
    /// Consecutive slow samples before Closed → Open.
    pub open_count: u32,
    /// Consecutive fast samples before Open → Closed.
    pub close_count: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            high_threshold_ms: 500.0,
            low_threshold_ms: 200.0,
            open_count: 3,
            close_count: 5,
        }
    }
}

/// Cloneable read handle on the breaker's open/closed flag.
///
/// Held by the classifier to select primary vs fallback per call.
#[derive(Debug, Clone)]
pub struct FallbackFlag(Arc<AtomicBool>);

impl FallbackFlag {
    /// Whether the circuit is currently open (fallback required).
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Latency-sample circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    open: Arc<AtomicBool>,
    consecutive_slow: u32,
    consecutive_fast: u32,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            open: Arc::new(AtomicBool::new(false)),
            consecutive_slow: 0,
            consecutive_fast: 0,
        }
    }

    /// Handle for components that only need to read the flag.
    pub fn fallback_flag(&self) -> FallbackFlag {
        FallbackFlag(Arc::clone(&self.open))
    }

    /// Feed one latency sample (ms). Call after every classification call;
    /// a timed-out call should be reported as [`CircuitBreaker::record_timeout`].
    pub fn record_latency(&mut self, latency_ms: f64) {
        if latency_ms > self.config.high_threshold_ms {
            self.consecutive_slow = self.consecutive_slow.saturating_add(1);
            self.consecutive_fast = 0;
            if self.consecutive_slow >= self.config.open_count
                && !self.open.swap(true, Ordering::Relaxed)
            {
                info!(
                    consecutive_slow = self.consecutive_slow,
                    threshold_ms = self.config.high_threshold_ms,
                    "circuit open — switching classification to fallback path"
                );
            }
        } else if latency_ms < self.config.low_threshold_ms {
            self.consecutive_fast = self.consecutive_fast.saturating_add(1);
            self.consecutive_slow = 0;
            if self.consecutive_fast >= self.config.close_count
                && self.open.swap(false, Ordering::Relaxed)
            {
                self.consecutive_fast = 0;
                info!(
                    threshold_ms = self.config.low_threshold_ms,
                    "circuit closed — classification back on primary path"
                );
            }
        } else {
            // Inconclusive mid-band sample: reset both counters, keep state.
            self.consecutive_slow = 0;
            self.consecutive_fast = 0;
        }
    }

    /// Record a classification call that never produced a latency sample
    /// (hang, timeout, panic). Counted as a maximally slow sample so the
    /// breaker can still react to a wedged primary path.
    pub fn record_timeout(&mut self) {
        self.record_latency(f64::INFINITY);
    }

    pub fn state(&self) -> CircuitState {
        if self.open.load(Ordering::Relaxed) {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
