//! Path-scoped attribute-based access control.
//!
//! This module implements authorization using:
//! - Policies: named, ordered lists of allow/deny clauses over dotted
//!   action patterns and slash-delimited object-path patterns
//! - Roles: named bundles of policies granted to subjects
//! - A `default` pseudo-subject whose policies apply to everyone
//!
//! The authorization flow:
//! 1. Resolve the subject's policies (default policies first, then the
//!    subject's own grants in order)
//! 2. Evaluate each policy: the last matching clause decides for that policy
//! 3. Combine: the last decisive policy decides overall
//! 4. Nothing decisive means deny

mod engine;
mod entity;
mod error;
mod pattern;
mod policy;
mod registry;
mod service;

pub use engine::{Decision, Evaluation, evaluate, evaluate_with};
pub use entity::{PermissionSpec, PermissionedEntity};
pub use error::{AuthzError, EntityError, PolicyError, RegistryError};
pub use pattern::{ActionPattern, Bindings, PathPattern};
pub use policy::{Clause, Effect, Policy};
pub use registry::{Grant, PolicyInstance, PolicyRegistry, Role, Subject};
pub use service::{AuthorizationService, AuthzResult, DecisionLog, DecisionRecord};
