//! Circuit breaker around calls to an unreliable dependency.
//!
//! The circuit breaker stops hammering a failing broker by tracking
//! consecutive failures and rejecting calls for a cool-down period once a
//! threshold is reached.
//!
//! # States
//!
//! - **Closed**: Normal operation. Calls pass through, tracked failures are counted.
//! - **Open**: After threshold failures, calls are rejected without running.
//! - **Half-Open**: After the cool-down, exactly one trial call runs. Its
//!   outcome closes or re-opens the circuit.
//!
//! Only failures whose [`FailureKind`] is listed in `tracked_errors` count.
//! Any other failure is handed back to the caller and leaves the state alone.
//!
//! # Usage
//!
//! ```rust,ignore
//! let breaker = CircuitBreaker::new("broker", &config.dispatch.circuit_breaker);
//!
//! match breaker.call_async(|| broker.submit("celery", &task)).await {
//!     Ok(()) => {}
//!     Err(DispatchError::CircuitOpen { retry_after, .. }) => { /* fail fast */ }
//!     Err(DispatchError::Operation(e)) => return Err(e.into()),
//! }
//! ```

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{DispatchError, FailureKind};
use crate::{config::CircuitBreakerConfig, observability::metrics};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls pass through.
    Closed,
    /// Circuit tripped - calls are rejected.
    Open,
    /// Testing recovery - a single trial call is allowed.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

struct BreakerState {
    circuit: CircuitState,
    /// Consecutive tracked failures while closed.
    failures: u32,
    opened_at: Option<Instant>,
    cool_down: Duration,
    /// Times the circuit has opened without a successful recovery.
    consecutive_opens: u32,
    trial_in_flight: bool,
}

enum Outcome {
    Success,
    TrackedFailure,
    UntrackedFailure,
}

/// Admission to run one call. A trial permit dropped before it is settled
/// (e.g. a cancelled future) gives the trial slot back.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.state.lock().trial_in_flight = false;
            debug!(breaker = %self.breaker.name, "Circuit breaker: trial abandoned");
        }
    }
}

/// Thread-safe circuit breaker.
///
/// Every transition is a single update under one lock, and the cool-down is
/// measured with the monotonic clock.
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    transitions: watch::Sender<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<Arc<str>>, config: &CircuitBreakerConfig) -> Self {
        let (transitions, _) = watch::channel(CircuitState::Closed);
        Self {
            name: name.into(),
            config: config.clone(),
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                cool_down: config.cool_down_for(0),
                consecutive_opens: 0,
                trial_in_flight: false,
            }),
            transitions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An open circuit whose cool-down has elapsed reports
    /// `Open` until the next call turns it half-open.
    pub fn state(&self) -> CircuitState {
        self.state.lock().circuit
    }

    /// Consecutive tracked failures while closed (for metrics/debugging).
    pub fn failure_count(&self) -> u32 {
        let state = self.state.lock();
        if state.circuit == CircuitState::Closed {
            state.failures
        } else {
            0
        }
    }

    /// Number of consecutive opens (for metrics/debugging).
    pub fn consecutive_opens(&self) -> u32 {
        self.state.lock().consecutive_opens
    }

    /// Cool-down applied the last time the circuit opened.
    pub fn current_cool_down(&self) -> Duration {
        self.state.lock().cool_down
    }

    /// Receive every state transition.
    pub fn subscribe(&self) -> watch::Receiver<CircuitState> {
        self.transitions.subscribe()
    }

    /// Run `op` through the breaker.
    pub fn call<T, E, F>(&self, op: F) -> Result<T, DispatchError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: FailureKind,
    {
        let mut permit = self.admit()?;
        let result = op();
        self.settle(&mut permit, self.classify(&result));
        result.map_err(DispatchError::Operation)
    }

    /// Run the future produced by `op` through the breaker. `op` is not
    /// invoked when the call is rejected.
    pub async fn call_async<T, E, F, Fut>(&self, op: F) -> Result<T, DispatchError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureKind,
    {
        let mut permit = self.admit()?;
        let result = op().await;
        self.settle(&mut permit, self.classify(&result));
        result.map_err(DispatchError::Operation)
    }

    fn classify<T, E: FailureKind>(&self, result: &Result<T, E>) -> Outcome {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) if self.config.tracks(e.failure_kind()) => Outcome::TrackedFailure,
            Err(_) => Outcome::UntrackedFailure,
        }
    }

    fn admit<E>(&self) -> Result<Permit<'_>, DispatchError<E>> {
        let permit = |trial| Permit {
            breaker: self,
            trial,
            settled: false,
        };

        if !self.config.enabled {
            return Ok(permit(false));
        }

        let mut state = self.state.lock();
        match state.circuit {
            CircuitState::Closed => Ok(permit(false)),
            CircuitState::Open => {
                let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= state.cool_down {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    state.trial_in_flight = true;
                    info!(breaker = %self.name, "Circuit breaker HALF-OPEN - testing recovery");
                    Ok(permit(true))
                } else {
                    Err(self.rejected(state.cool_down - elapsed))
                }
            }
            CircuitState::HalfOpen if !state.trial_in_flight => {
                state.trial_in_flight = true;
                Ok(permit(true))
            }
            CircuitState::HalfOpen => Err(self.rejected(Duration::ZERO)),
        }
    }

    fn rejected<E>(&self, retry_after: Duration) -> DispatchError<E> {
        debug!(
            breaker = %self.name,
            retry_after_ms = retry_after.as_millis() as u64,
            "Circuit breaker: call rejected"
        );
        metrics::record_circuit_breaker_rejection(&self.name);
        DispatchError::CircuitOpen {
            name: Arc::clone(&self.name),
            retry_after,
        }
    }

    fn settle(&self, permit: &mut Permit<'_>, outcome: Outcome) {
        permit.settled = true;
        if !self.config.enabled {
            return;
        }

        let mut state = self.state.lock();
        match (outcome, permit.trial) {
            (Outcome::Success, true) => self.close(&mut state),
            (Outcome::Success, false) => {
                if state.circuit == CircuitState::Closed && state.failures > 0 {
                    state.failures = 0;
                    debug!(breaker = %self.name, "Circuit breaker: failure counter reset after success");
                    metrics::record_circuit_breaker_failures(
                        &self.name,
                        0,
                        self.config.failure_threshold,
                    );
                }
            }
            (Outcome::TrackedFailure, true) => self.open(&mut state),
            (Outcome::TrackedFailure, false) => {
                // Calls admitted before the circuit opened don't count twice
                if state.circuit != CircuitState::Closed {
                    return;
                }
                state.failures += 1;
                debug!(
                    breaker = %self.name,
                    failures = state.failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker: failure recorded"
                );
                metrics::record_circuit_breaker_failures(
                    &self.name,
                    state.failures,
                    self.config.failure_threshold,
                );
                if state.failures >= self.config.failure_threshold {
                    self.open(&mut state);
                }
            }
            (Outcome::UntrackedFailure, true) => state.trial_in_flight = false,
            (Outcome::UntrackedFailure, false) => {}
        }
    }

    fn open(&self, state: &mut BreakerState) {
        state.cool_down = self.config.cool_down_for(state.consecutive_opens);
        state.consecutive_opens += 1;
        state.opened_at = Some(Instant::now());
        state.failures = 0;
        state.trial_in_flight = false;
        self.transition(state, CircuitState::Open);

        warn!(
            breaker = %self.name,
            cool_down_ms = state.cool_down.as_millis() as u64,
            consecutive_opens = state.consecutive_opens,
            "Circuit breaker OPENED - broker marked unhealthy"
        );
    }

    fn close(&self, state: &mut BreakerState) {
        let previous_consecutive = state.consecutive_opens;
        state.failures = 0;
        state.opened_at = None;
        state.consecutive_opens = 0;
        state.cool_down = self.config.cool_down_for(0);
        state.trial_in_flight = false;
        self.transition(state, CircuitState::Closed);

        info!(
            breaker = %self.name,
            previous_consecutive_opens = previous_consecutive,
            "Circuit breaker CLOSED - broker recovered"
        );
        metrics::record_circuit_breaker_failures(&self.name, 0, self.config.failure_threshold);
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        state.circuit = to;
        metrics::record_circuit_breaker_state(&self.name, to.as_str());
        self.transitions.send_replace(to);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
