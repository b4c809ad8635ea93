//! Metric recording functions.
//!
//! Every function compiles to a no-op without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use metrics::{counter, gauge};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Install the Prometheus recorder and scrape endpoint.
///
/// Must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let addr: std::net::SocketAddr = config
        .listen
        .parse()
        .map_err(|e| MetricsError::Setup(format!("invalid listen address '{}': {e}", config.listen)))?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(MetricsError::Install)?;
    metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Setup(e.to_string()))?;
    tokio::spawn(exporter);

    tracing::info!(%addr, "Prometheus metrics endpoint listening");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Record an authorization decision (`allow`, `deny` or `indeterminate`).
pub fn record_authz_decision(decision: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("authz_decisions_total", "decision" => decision.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = decision;
    }
}

/// Record a cache operation.
pub fn record_cache_operation(cache_type: &str, operation: &str, result: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "cache_operations_total",
            "cache_type" => cache_type.to_string(),
            "operation" => operation.to_string(),
            "result" => result.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (cache_type, operation, result);
    }
}

/// Record a circuit breaker state transition.
pub fn record_circuit_breaker_state(breaker: &str, state: &str) {
    #[cfg(feature = "prometheus")]
    {
        let state_value = match state {
            "closed" => 0.0,
            "open" => 1.0,
            "half_open" => 2.0,
            _ => 0.0,
        };

        gauge!("dispatch_circuit_breaker_state", "breaker" => breaker.to_string()).set(state_value);

        counter!("dispatch_circuit_breaker_transitions_total", "breaker" => breaker.to_string(), "state" => state.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (breaker, state);
    }
}

/// Record the consecutive failure count (for monitoring approach to threshold).
pub fn record_circuit_breaker_failures(breaker: &str, failure_count: u32, threshold: u32) {
    #[cfg(feature = "prometheus")]
    {
        gauge!("dispatch_circuit_breaker_failure_count", "breaker" => breaker.to_string())
            .set(failure_count as f64);

        let ratio = if threshold > 0 {
            failure_count as f64 / threshold as f64
        } else {
            0.0
        };
        gauge!("dispatch_circuit_breaker_failure_ratio", "breaker" => breaker.to_string())
            .set(ratio);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (breaker, failure_count, threshold);
    }
}

/// Record a call rejected by an open circuit.
pub fn record_circuit_breaker_rejection(breaker: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("dispatch_circuit_breaker_rejections_total", "breaker" => breaker.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = breaker;
    }
}

/// Record a dispatched task by queue and outcome (`submitted`, `rejected`, `failed`, `dropped`).
pub fn record_task_dispatch(queue: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("dispatch_tasks_total", "queue" => queue.to_string(), "outcome" => outcome.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (queue, outcome);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
