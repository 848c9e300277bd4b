//! Circuit breaking for external collaborators.
//!
//! The ledger and the remote vector index are wrapped in a circuit breaker so
//! that an unhealthy upstream fails fast instead of stalling every request.
//! There are no retries: ledger writes must never be replayed blindly, and a
//! vector search is cheap to fail and re-issue from the caller.
//!
//! # Circuit Breaker States
//!
//! ```text
//! +--------+     failures >= threshold     +------+
//! | Closed | --------------------------->  | Open |
//! +--------+                               +------+
//!     ^                                        |
//!     |  success                               | timeout elapsed
//!     |                                        v
//!     +--------------------------------  +-----------+
//!                                        | Half-Open |
//!                                        +-----------+
//! ```

use super::traits::VectorIndex;
use crate::config::parse_override;
use crate::models::{ChunkFilter, ChunkMatch, ChunkPayload};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Resilience configuration for external backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageResilienceConfig {
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout_ms: u64,
    /// Maximum trial calls while half-open.
    pub breaker_half_open_max_calls: u32,
}

impl Default for StorageResilienceConfig {
    fn default() -> Self {
        Self {
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_max_calls: 1,
        }
    }
}

impl StorageResilienceConfig {
    /// Applies `MEMLEASE_BREAKER_*` overrides read through `lookup`.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: &impl Fn(&str) -> Option<String>) -> Self {
        if let Some(parsed) = parse_override::<u32>(lookup, "MEMLEASE_BREAKER_FAILURE_THRESHOLD") {
            self.breaker_failure_threshold = parsed.max(1);
        }
        if let Some(parsed) = parse_override::<u64>(lookup, "MEMLEASE_BREAKER_RESET_MS") {
            self.breaker_reset_timeout_ms = parsed;
        }
        if let Some(parsed) = parse_override::<u32>(lookup, "MEMLEASE_BREAKER_HALF_OPEN_MAX_CALLS")
        {
            self.breaker_half_open_max_calls = parsed.max(1);
        }
        self
    }

    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker_failure_threshold = threshold;
        self
    }

    /// Sets the reset timeout in milliseconds.
    #[must_use]
    pub const fn with_reset_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.breaker_reset_timeout_ms = timeout_ms;
        self
    }

    /// Sets the half-open max calls.
    #[must_use]
    pub const fn with_half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.breaker_half_open_max_calls = max_calls;
        self
    }
}

#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { attempts: u32 },
}

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without reaching the backend.
    Open,
    /// A limited number of trial calls are allowed.
    HalfOpen,
}

/// Circuit breaker for a single backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
    backend_name: &'static str,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: &StorageResilienceConfig, backend_name: &'static str) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
            half_open_max_calls: config.breaker_half_open_max_calls.max(1),
            backend_name,
        }
    }

    /// Checks if a request is allowed through the circuit breaker.
    pub fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    tracing::info!(
                        backend = self.backend_name,
                        "Circuit breaker transitioning to half-open"
                    );
                    self.state = BreakerState::HalfOpen { attempts: 1 };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen { ref mut attempts } => {
                if *attempts >= self.half_open_max_calls {
                    false
                } else {
                    *attempts += 1;
                    true
                }
            },
        }
    }

    /// Records a successful operation, closing the circuit.
    pub fn on_success(&mut self) {
        if !matches!(self.state, BreakerState::Closed { failures: 0 }) {
            tracing::info!(
                backend = self.backend_name,
                "Circuit breaker closing after success"
            );
        }
        self.state = BreakerState::Closed { failures: 0 };
    }

    /// Records a failed operation.
    ///
    /// Returns `true` if the circuit just opened.
    pub fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    tracing::warn!(
                        backend = self.backend_name,
                        failures = *failures,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened after consecutive failures"
                    );
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            BreakerState::HalfOpen { .. } => {
                tracing::warn!(
                    backend = self.backend_name,
                    "Circuit breaker re-opened after half-open failure"
                );
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            BreakerState::Open { .. } => {},
        }
        false
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> CircuitState {
        match self.state {
            BreakerState::Closed { .. } => CircuitState::Closed,
            BreakerState::Open { .. } => CircuitState::Open,
            BreakerState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Returns the current state as a gauge value (0 closed, 1 open, 2 half-open).
    #[must_use]
    pub const fn state_value(&self) -> u8 {
        match self.state() {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    /// Returns the backend name.
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        self.backend_name
    }
}

/// Metric families a guarded backend reports into.
#[derive(Debug, Clone, Copy)]
pub struct BreakerMetrics {
    /// Counter of guarded calls by status.
    pub requests: &'static str,
    /// Gauge of the breaker state.
    pub state: &'static str,
    /// Prefix for the operation name in `OperationFailed` errors.
    pub operation_prefix: &'static str,
}

/// Metric families for vector index calls.
pub const STORAGE_BREAKER_METRICS: BreakerMetrics = BreakerMetrics {
    requests: "storage_requests_total",
    state: "storage_circuit_breaker_state",
    operation_prefix: "vector",
};

/// A circuit breaker plus the bookkeeping around each guarded call.
#[derive(Debug)]
pub struct GuardedCalls {
    breaker: Mutex<CircuitBreaker>,
    backend_name: &'static str,
    metrics: BreakerMetrics,
}

impl GuardedCalls {
    /// Creates a guard for one backend.
    #[must_use]
    pub fn new(
        config: &StorageResilienceConfig,
        backend_name: &'static str,
        metrics: BreakerMetrics,
    ) -> Self {
        Self {
            breaker: Mutex::new(CircuitBreaker::new(config, backend_name)),
            backend_name,
            metrics,
        }
    }

    /// Returns the current breaker state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.breaker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    /// Runs `call` if the breaker allows it and records the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] without invoking `call` when the
    /// circuit is open, otherwise whatever `call` returns.
    pub fn execute<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);

        if !breaker.allow() {
            let state = breaker.state_value();
            drop(breaker);
            self.record(operation, "circuit_open", state);
            return Err(Error::OperationFailed {
                operation: format!("{}_{operation}", self.metrics.operation_prefix),
                cause: format!("circuit breaker open for backend '{}'", self.backend_name),
            });
        }
        drop(breaker);

        let result = call();

        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        // Only upstream failures count against the backend; a well-formed
        // rejection (not found, invalid input) means it answered.
        let status = match &result {
            Ok(_) => {
                breaker.on_success();
                "success"
            },
            Err(Error::OperationFailed { .. }) => {
                breaker.on_failure();
                "error"
            },
            Err(_) => {
                breaker.on_success();
                "rejected"
            },
        };
        let state = breaker.state_value();
        drop(breaker);
        self.record(operation, status, state);

        result
    }

    fn record(&self, operation: &'static str, status: &'static str, state: u8) {
        metrics::counter!(
            self.metrics.requests,
            "backend" => self.backend_name,
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        metrics::gauge!(self.metrics.state, "backend" => self.backend_name)
            .set(f64::from(state));
    }
}

/// Vector index wrapper with circuit breaker protection.
pub struct ResilientVectorIndex<V: VectorIndex> {
    inner: V,
    guard: GuardedCalls,
}

impl<V: VectorIndex> ResilientVectorIndex<V> {
    /// Wraps a vector index.
    #[must_use]
    pub fn new(inner: V, config: &StorageResilienceConfig) -> Self {
        let guard = GuardedCalls::new(config, inner.backend_name(), STORAGE_BREAKER_METRICS);
        Self { inner, guard }
    }

    /// Returns the current breaker state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.guard.state()
    }
}

impl<V: VectorIndex> VectorIndex for ResilientVectorIndex<V> {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn upsert(&self, id: u64, vector: &[f32], payload: &ChunkPayload) -> Result<()> {
        self.guard
            .execute("upsert", || self.inner.upsert(id, vector, payload))
    }

    fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
        filter: &ChunkFilter,
    ) -> Result<Vec<ChunkMatch>> {
        self.guard.execute("search", || {
            self.inner.search(vector, limit, score_threshold, filter)
        })
    }

    fn count(&self) -> Result<usize> {
        self.guard.execute("count", || self.inner.count())
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
