//! Observability: structured logging and optional Prometheus metrics.
//!
//! Library code only emits `tracing` events and calls the `metrics`
//! recording functions. Installing a subscriber or recorder is left to the
//! binary (`init_tracing`, `metrics::init_metrics`).

pub mod metrics;
#[cfg(feature = "cli")]
mod tracing_init;

#[cfg(feature = "cli")]
pub use tracing_init::*;
