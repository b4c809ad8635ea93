//! Authorization decisions.
//!
//! [`AuthorizationService`] is the single entry point request handlers use
//! to gate an operation. It combines the policies returned by the registry
//! with last-decisive-wins semantics:
//!
//! 1. Resolve `policies_for(subject)` (default policies first)
//! 2. Evaluate each policy independently
//! 3. Remember every decisive (allow/deny) result, later ones overwriting
//!    earlier ones together with their bindings
//! 4. Allow only if the last decisive result was an allow; no decisive
//!    result at all is a deny
//!
//! Deciding never mutates state. Decision logging is fire-and-forget.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    AuthzError, Bindings, Decision, EntityError, PermissionedEntity, PolicyRegistry,
    RegistryError, Subject, engine,
};
use crate::{config::AuthzAuditConfig, observability::metrics};

/// Result of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthzResult {
    /// Whether access is allowed
    pub allowed: bool,
    /// Combined decision before fail-closed resolution
    pub decision: Decision,
    /// Captures of the deciding clause, for scoping list queries
    pub bindings: Bindings,
    /// The policy that made this decision (if any)
    pub policy_name: Option<String>,
}

impl AuthzResult {
    fn indeterminate() -> Self {
        Self {
            allowed: false,
            decision: Decision::Indeterminate,
            bindings: Bindings::new(),
            policy_name: None,
        }
    }
}

/// A logged decision, as delivered to a [`DecisionLog`] consumer.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub subject: Subject,
    pub action: String,
    pub path: String,
    pub result: AuthzResult,
}

/// Non-blocking sink for decision records.
///
/// Records are offered with `try_send`; when the consumer falls behind they
/// are dropped rather than delaying the decision.
#[derive(Debug, Clone)]
pub struct DecisionLog {
    sender: mpsc::Sender<DecisionRecord>,
}

impl DecisionLog {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DecisionRecord>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    fn offer(&self, record: DecisionRecord) {
        if let Err(e) = self.sender.try_send(record) {
            debug!(error = %e, "Dropped authorization decision record");
        }
    }
}

/// Decides whether a subject may perform an action on an object path.
#[derive(Clone)]
pub struct AuthorizationService {
    registry: Arc<PolicyRegistry>,
    audit: AuthzAuditConfig,
    decision_log: Option<DecisionLog>,
}

impl AuthorizationService {
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self {
            registry,
            audit: AuthzAuditConfig::default(),
            decision_log: None,
        }
    }

    pub fn with_audit(mut self, audit: AuthzAuditConfig) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_decision_log(mut self, log: DecisionLog) -> Self {
        self.decision_log = Some(log);
        self
    }

    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    /// `(allowed, bindings)` for `subject` performing `action` on `path`.
    pub fn is_allowed(&self, subject: &Subject, action: &str, path: &str) -> (bool, Bindings) {
        let result = self.authorize(subject, action, path);
        (result.allowed, result.bindings)
    }

    /// Full decision, including the deciding policy.
    pub fn authorize(&self, subject: &Subject, action: &str, path: &str) -> AuthzResult {
        let result = self.decide(subject, action, path);
        self.record(subject, action, path, &result);
        result
    }

    /// Check authorization and return an error if denied.
    pub fn require(
        &self,
        subject: &Subject,
        action: &str,
        path: &str,
    ) -> Result<Bindings, AuthzError> {
        let result = self.authorize(subject, action, path);
        if result.allowed {
            Ok(result.bindings)
        } else {
            Err(AuthzError::access_denied(subject, action, path))
        }
    }

    /// Authorize a verb on a permissioned entity (`update` on a project
    /// becomes `project.update` on the project's object path).
    pub fn authorize_entity<E: PermissionedEntity + ?Sized>(
        &self,
        subject: &Subject,
        verb: &str,
        entity: &E,
    ) -> Result<AuthzResult, EntityError> {
        let spec = entity.permission_spec();
        let action = spec.action(verb)?;
        let path = entity.object_path()?;
        Ok(self.authorize(subject, &action, &path))
    }

    /// Keep only the paths on which `action` is allowed, with their bindings.
    pub fn filter_allowed<'a, I>(
        &self,
        subject: &Subject,
        action: &str,
        paths: I,
    ) -> Vec<(&'a str, Bindings)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths
            .into_iter()
            .filter_map(|path| {
                let (allowed, bindings) = self.is_allowed(subject, action, path);
                allowed.then_some((path, bindings))
            })
            .collect()
    }

    /// Administrative grant; see [`PolicyRegistry::assign`].
    pub fn assign(&self, subject: &Subject, policy: &str) -> Result<bool, RegistryError> {
        self.registry.assign(subject, policy)
    }

    /// Administrative revoke; see [`PolicyRegistry::unassign`].
    pub fn unassign(&self, subject: &Subject, policy: &str) -> bool {
        self.registry.unassign(subject, policy)
    }

    fn decide(&self, subject: &Subject, action: &str, path: &str) -> AuthzResult {
        let mut result = AuthzResult::indeterminate();

        for instance in self.registry.policies_for(subject).iter() {
            let evaluation = engine::evaluate_with(&instance.policy, action, path, &instance.variables);
            debug!(
                subject = %subject,
                policy = %instance.name(),
                decision = evaluation.decision.as_str(),
                action,
                path,
                "Evaluated policy"
            );

            if evaluation.decision.is_decisive() {
                result = AuthzResult {
                    allowed: evaluation.decision.is_allowed(),
                    decision: evaluation.decision,
                    bindings: evaluation.bindings,
                    policy_name: Some(instance.name().to_string()),
                };
            }
        }

        result
    }

    fn record(&self, subject: &Subject, action: &str, path: &str, result: &AuthzResult) {
        metrics::record_authz_decision(result.decision.as_str());

        let audited = if result.allowed {
            self.audit.log_allowed
        } else {
            self.audit.log_denied
        };
        if audited {
            info!(
                target: "tutelary::audit",
                subject = %subject,
                action,
                path,
                decision = result.decision.as_str(),
                allowed = result.allowed,
                policy = ?result.policy_name,
                "Authorization decision"
            );
        }

        if let Some(log) = &self.decision_log {
            log.offer(DecisionRecord {
                subject: subject.clone(),
                action: action.to_string(),
                path: path.to_string(),
                result: result.clone(),
            });
        }
    }
}
