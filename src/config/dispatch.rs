use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Task dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Queue used when no route matches.
    #[serde(default = "default_queue")]
    pub default_queue: String,

    /// Task-name routes, checked in order.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_queue: default_queue(),
            routes: Vec::new(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Dotted task-name pattern, `*` matches one segment.
    pub pattern: String,
    pub queue: String,
}

/// Circuit breaker configuration for the broker connection.
///
/// The circuit breaker has three states:
/// - **Closed**: Normal operation, calls pass through
/// - **Open**: Broker is failing, calls are rejected immediately
/// - **Half-Open**: Testing recovery, exactly one trial call is allowed
///
/// Only failures whose kind is listed in `tracked_errors` count toward the
/// threshold. Other failures pass through without touching the state.
///
/// # Example
///
/// ```toml
/// [dispatch.circuit_breaker]
/// enabled = true
/// failure_threshold = 3
/// cool_down_ms = 30000
/// tracked_errors = ["connection", "timeout"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaker. Disabled breakers pass every call through.
    #[serde(default = "default_cb_enabled")]
    pub enabled: bool,

    /// Consecutive tracked failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time to wait before admitting a trial call (milliseconds).
    #[serde(default = "default_cool_down_ms")]
    pub cool_down_ms: u64,

    /// Multiplier applied to the cool-down each time a trial fails.
    /// `1.0` keeps a fixed cool-down.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for the backed-off cool-down (milliseconds).
    #[serde(default = "default_max_cool_down_ms")]
    pub max_cool_down_ms: u64,

    /// Failure kinds that count toward opening the circuit.
    #[serde(default = "default_tracked_errors")]
    pub tracked_errors: Vec<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_cb_enabled(),
            failure_threshold: default_failure_threshold(),
            cool_down_ms: default_cool_down_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_cool_down_ms: default_max_cool_down_ms(),
            tracked_errors: default_tracked_errors(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn tracks(&self, kind: &str) -> bool {
        self.tracked_errors.iter().any(|k| k == kind)
    }

    /// Cool-down after `consecutive_opens` failed recoveries.
    ///
    /// Uses exponential backoff: `min(base * multiplier^consecutive_opens, max)`
    pub fn cool_down_for(&self, consecutive_opens: u32) -> Duration {
        if consecutive_opens == 0 || self.backoff_multiplier <= 1.0 {
            return Duration::from_millis(self.cool_down_ms);
        }

        let multiplied =
            (self.cool_down_ms as f64) * self.backoff_multiplier.powi(consecutive_opens as i32);
        Duration::from_millis((multiplied as u64).min(self.max_cool_down_ms.max(self.cool_down_ms)))
    }
}


fn default_queue() -> String {
    "celery".to_string()
}

fn default_cb_enabled() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cool_down_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_cool_down_ms() -> u64 {
    300_000
}

fn default_tracked_errors() -> Vec<String> {
    vec!["connection".to_string(), "timeout".to_string()]
}
