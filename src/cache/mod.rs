//! In-process caches.
//!
//! Caches here memoize derived data only. Every entry can be recomputed from
//! the registry, so a cache may be dropped or disabled without changing any
//! authorization outcome.

mod resolved;

pub use resolved::{Generation, ResolvedPolicyCache};
