//! Turning selected failures into a fallback value.
//!
//! ```rust,ignore
//! // A dead broker should not fail the request that queued the task.
//! let queued = suppress(&["connection", "circuit_open"], || false, || {
//!     breaker.call(|| broker.submit_blocking(&task)).map(|_| true)
//! })?;
//! ```

use super::FailureKind;

/// Run `op`; errors whose kind is in `kinds` become `fallback()`, others propagate.
pub fn suppress<T, E, F, D>(kinds: &[&str], fallback: D, op: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    D: FnOnce() -> T,
    E: FailureKind + std::fmt::Display,
{
    recover(op(), kinds, fallback)
}

/// Apply the suppression rule to a result that was already produced, e.g.
/// by an awaited future.
pub fn recover<T, E, D>(result: Result<T, E>, kinds: &[&str], fallback: D) -> Result<T, E>
where
    D: FnOnce() -> T,
    E: FailureKind + std::fmt::Display,
{
    match result {
        Err(e) if kinds.contains(&e.failure_kind()) => {
            tracing::warn!(kind = e.failure_kind(), error = %e, "Suppressed failure");
            Ok(fallback())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum Fault {
        #[error("timed out")]
        Timeout,
        #[error("rejected")]
        Rejected,
    }

    impl FailureKind for Fault {
        fn failure_kind(&self) -> &str {
            match self {
                Fault::Timeout => "timeout",
                Fault::Rejected => "rejected",
            }
        }
    }

    #[test]
    fn test_listed_kind_becomes_fallback() {
        let result = suppress(&["timeout"], || 0, || Err::<u32, _>(Fault::Timeout));
        assert_eq!(result.unwrap(), 0);
    }

    #[test]
    fn test_other_kinds_propagate() {
        let result = suppress(&["timeout"], || 0, || Err::<u32, _>(Fault::Rejected));
        assert!(matches!(result, Err(Fault::Rejected)));
    }

    #[test]
    fn test_success_untouched() {
        let mut fallback_called = false;
        let result = suppress(
            &["timeout"],
            || {
                fallback_called = true;
                0
            },
            || Ok::<u32, Fault>(5),
        );
        assert_eq!(result.unwrap(), 5);
        assert!(!fallback_called);
    }

    #[test]
    fn test_recover_io_error() {
        let err = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let result = recover(Err::<bool, _>(err), &["connection"], || false);
        assert!(!result.unwrap());
    }
}
