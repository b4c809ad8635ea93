use std::{io, sync::Arc, time::Duration};

use thiserror::Error;

/// Classifies a failure so the breaker and [`suppress`](super::suppress) can
/// decide whether it counts.
///
/// Kinds are short snake_case names matched against
/// `dispatch.circuit_breaker.tracked_errors` (e.g. `connection`, `timeout`).
pub trait FailureKind {
    fn failure_kind(&self) -> &str;
}

impl FailureKind for io::Error {
    fn failure_kind(&self) -> &str {
        match self.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe => "connection",
            io::ErrorKind::TimedOut => "timeout",
            _ => "io",
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError<E> {
    #[error("Circuit breaker '{name}' is open - rejecting call (retry after {retry_after:?})")]
    CircuitOpen {
        name: Arc<str>,
        retry_after: Duration,
    },

    #[error("{0}")]
    Operation(E),
}

impl<E> DispatchError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// The operation's own error, if the operation ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }
}

impl<E: FailureKind> FailureKind for DispatchError<E> {
    fn failure_kind(&self) -> &str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Operation(e) => e.failure_kind(),
        }
    }
}
