//! Path-scoped attribute-based access control.
//!
//! Policies grant or deny dotted actions (`project.update`) on
//! slash-delimited object paths (`organization/acme/project/survey-1`).
//! Subjects receive policies directly or through roles; every subject also
//! sees the policies of the `default` pseudo-subject. Decisions are
//! fail-closed and report the path captures of the deciding clause so
//! callers can scope list queries.
//!
//! The [`dispatch`] module holds the circuit-broken task gateway used to hand
//! background work to a broker.

pub mod authz;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod observability;

#[cfg(test)]
mod tests;
