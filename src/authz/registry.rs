//! Policy store, role definitions and per-subject assignments.
//!
//! # Resolution order
//!
//! [`PolicyRegistry::policies_for`] returns, in order:
//!
//! 1. Everything granted to the [`Subject::Default`] pseudo-subject
//! 2. Everything granted to the subject itself, in grant order, with role
//!    grants expanded to the role's policies in role order
//!
//! Evaluation order matters: later decisive policies override earlier ones,
//! so reordering grants can change authorization outcomes.
//!
//! # Concurrency
//!
//! Policies are stored as `Arc<Policy>` and replaced wholesale on update.
//! Each subject's grants are an immutable `Arc<[Grant]>` snapshot; writers
//! hold the subject's map entry while building the replacement, so writes to
//! one subject are serialized and readers always see a complete list.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Bindings, Policy, RegistryError};
use crate::cache::ResolvedPolicyCache;

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    /// Pseudo-subject whose policies apply to everyone.
    Default,
    /// Unauthenticated requests.
    Anonymous,
    /// An authenticated user.
    User(String),
}

impl Subject {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Anonymous => f.write_str("anonymous"),
            Self::User(id) => f.write_str(id),
        }
    }
}

impl From<&str> for Subject {
    /// `default` and `anonymous` name the pseudo-subjects; anything else is a user.
    fn from(s: &str) -> Self {
        match s {
            "default" => Self::Default,
            "anonymous" => Self::Anonymous,
            other => Self::User(other.to_string()),
        }
    }
}

impl FromStr for Subject {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// A named bundle of policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Role {
    pub name: String,
    pub policies: Vec<String>,
}

impl Role {
    pub fn new<I, S>(name: impl Into<String>, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            policies: policies.into_iter().map(Into::into).collect(),
        }
    }
}

/// One entry in a subject's ordered grant list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grant {
    Policy { name: String, variables: Bindings },
    Role { name: String, variables: Bindings },
}

/// A policy ready for evaluation, with the variables of the grant that
/// brought it in.
#[derive(Debug, Clone)]
pub struct PolicyInstance {
    pub policy: Arc<Policy>,
    pub variables: Bindings,
    /// Role the policy came through, if any.
    pub via_role: Option<String>,
}

impl PolicyInstance {
    pub fn name(&self) -> &str {
        self.policy.name()
    }
}

/// Registry of policies, roles and subject grants.
pub struct PolicyRegistry {
    policies: RwLock<HashMap<String, Arc<Policy>>>,
    roles: RwLock<HashMap<String, Arc<Role>>>,
    grants: DashMap<Subject, Arc<[Grant]>>,
    cache: Option<ResolvedPolicyCache>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("policies", &self.policy_names())
            .field("roles", &self.roles.read().len())
            .field("subjects", &self.grants.len())
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            roles: RwLock::new(HashMap::new()),
            grants: DashMap::new(),
            cache: None,
        }
    }

    /// Memoize `policies_for` results, invalidated on every mutation.
    pub fn with_cache(mut self, cache: ResolvedPolicyCache) -> Self {
        self.cache = Some(cache);
        self
    }

    // ------------------------------------------------------------------
    // Policies and roles
    // ------------------------------------------------------------------

    /// Install or replace a policy.
    ///
    /// Subjects reference policies by name, so a replacement takes effect for
    /// every existing grant without re-assignment.
    pub fn install_policy(&self, policy: Policy) -> Arc<Policy> {
        let policy = Arc::new(policy);
        let previous = self
            .policies
            .write()
            .insert(policy.name().to_string(), Arc::clone(&policy));

        info!(
            policy = %policy.name(),
            clauses = policy.clauses().len(),
            replaced = previous.is_some(),
            "Installed policy"
        );
        self.invalidate_all();
        policy
    }

    pub fn policy(&self, name: &str) -> Option<Arc<Policy>> {
        self.policies.read().get(name).cloned()
    }

    pub fn policy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policies.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Define or redefine a role. Every policy it names must already be installed.
    pub fn define_role(&self, role: Role) -> Result<(), RegistryError> {
        if role.name.trim().is_empty() {
            return Err(RegistryError::EmptyRoleName);
        }
        {
            let policies = self.policies.read();
            if let Some(missing) = role.policies.iter().find(|p| !policies.contains_key(*p)) {
                return Err(RegistryError::RoleReferencesUnknownPolicy {
                    role: role.name.clone(),
                    policy: missing.clone(),
                });
            }
        }

        info!(role = %role.name, policies = ?role.policies, "Defined role");
        self.roles.write().insert(role.name.clone(), Arc::new(role));
        self.invalidate_all();
        Ok(())
    }

    pub fn role(&self, name: &str) -> Option<Arc<Role>> {
        self.roles.read().get(name).cloned()
    }

    // ------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------

    /// Assign a policy to a subject. Returns `false` if it was already assigned.
    pub fn assign(&self, subject: &Subject, policy: &str) -> Result<bool, RegistryError> {
        self.assign_with(subject, policy, Bindings::new())
    }

    /// Assign a policy with variables that pre-bind its path captures.
    pub fn assign_with(
        &self,
        subject: &Subject,
        policy: &str,
        variables: Bindings,
    ) -> Result<bool, RegistryError> {
        if !self.policies.read().contains_key(policy) {
            return Err(RegistryError::UnknownPolicy(policy.to_string()));
        }
        Ok(self.push_grant(
            subject,
            Grant::Policy {
                name: policy.to_string(),
                variables,
            },
        ))
    }

    /// Remove every grant of `policy` from the subject. Absent grants are not an error.
    pub fn unassign(&self, subject: &Subject, policy: &str) -> bool {
        self.remove_grants(subject, |grant| {
            matches!(grant, Grant::Policy { name, .. } if name == policy)
        })
    }

    /// Grant a role to a subject. Returns `false` if it was already granted.
    pub fn grant_role(
        &self,
        subject: &Subject,
        role: &str,
        variables: Bindings,
    ) -> Result<bool, RegistryError> {
        if !self.roles.read().contains_key(role) {
            return Err(RegistryError::UnknownRole(role.to_string()));
        }
        Ok(self.push_grant(
            subject,
            Grant::Role {
                name: role.to_string(),
                variables,
            },
        ))
    }

    pub fn revoke_role(&self, subject: &Subject, role: &str) -> bool {
        self.remove_grants(subject, |grant| {
            matches!(grant, Grant::Role { name, .. } if name == role)
        })
    }

    /// Snapshot of the subject's own grants (not including default grants).
    pub fn grants(&self, subject: &Subject) -> Arc<[Grant]> {
        self.grants
            .get(subject)
            .map(|g| Arc::clone(g.value()))
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    fn push_grant(&self, subject: &Subject, grant: Grant) -> bool {
        let added = {
            let mut entry = self
                .grants
                .entry(subject.clone())
                .or_insert_with(|| Arc::from(Vec::new()));
            if entry.contains(&grant) {
                false
            } else {
                let mut next = entry.to_vec();
                next.push(grant.clone());
                *entry = Arc::from(next);
                true
            }
        };

        if added {
            debug!(subject = %subject, grant = ?grant, "Granted");
            self.invalidate_subject(subject);
        }
        added
    }

    fn remove_grants(&self, subject: &Subject, predicate: impl Fn(&Grant) -> bool) -> bool {
        let removed = match self.grants.get_mut(subject) {
            Some(mut entry) => {
                let next: Vec<Grant> = entry.iter().filter(|g| !predicate(*g)).cloned().collect();
                let removed = next.len() != entry.len();
                if removed {
                    *entry = Arc::from(next);
                }
                removed
            }
            None => false,
        };

        if removed {
            debug!(subject = %subject, "Revoked grant");
            self.invalidate_subject(subject);
        }
        removed
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Ordered policies that apply to `subject`: default grants first.
    pub fn policies_for(&self, subject: &Subject) -> Arc<[PolicyInstance]> {
        let Some(cache) = &self.cache else {
            return self.resolve(subject);
        };

        if let Some(hit) = cache.get(subject) {
            return hit;
        }
        let generation = cache.generation(subject);
        let resolved = self.resolve(subject);
        cache.insert(subject.clone(), generation, Arc::clone(&resolved));
        resolved
    }

    fn resolve(&self, subject: &Subject) -> Arc<[PolicyInstance]> {
        let mut resolved = Vec::new();
        self.expand_grants(&self.grants(&Subject::Default), &mut resolved);
        if !subject.is_default() {
            self.expand_grants(&self.grants(subject), &mut resolved);
        }
        Arc::from(resolved)
    }

    fn expand_grants(&self, grants: &[Grant], out: &mut Vec<PolicyInstance>) {
        let policies = self.policies.read();
        let roles = self.roles.read();

        for grant in grants {
            match grant {
                Grant::Policy { name, variables } => match policies.get(name) {
                    Some(policy) => out.push(PolicyInstance {
                        policy: Arc::clone(policy),
                        variables: variables.clone(),
                        via_role: None,
                    }),
                    None => warn!(policy = %name, "Granted policy is not installed"),
                },
                Grant::Role { name, variables } => {
                    let Some(role) = roles.get(name) else {
                        warn!(role = %name, "Granted role is not defined");
                        continue;
                    };
                    for policy_name in &role.policies {
                        match policies.get(policy_name) {
                            Some(policy) => out.push(PolicyInstance {
                                policy: Arc::clone(policy),
                                variables: variables.clone(),
                                via_role: Some(role.name.clone()),
                            }),
                            None => warn!(
                                role = %name,
                                policy = %policy_name,
                                "Role policy is not installed"
                            ),
                        }
                    }
                }
            }
        }
    }

    fn invalidate_subject(&self, subject: &Subject) {
        if let Some(cache) = &self.cache {
            if subject.is_default() {
                cache.invalidate_all();
            } else {
                cache.invalidate(subject);
            }
        }
    }

    fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::authz::Clause;

    fn policy(name: &str) -> Policy {
        Policy::new(
            name,
            vec![Clause::allow(["project.view"], ["organization/*"]).unwrap()],
        )
        .unwrap()
    }

    fn registry() -> PolicyRegistry {
        let registry = PolicyRegistry::new();
        for name in ["default", "org-admin", "org-member", "surveyor"] {
            registry.install_policy(policy(name));
        }
        registry
    }

    fn names(instances: &[PolicyInstance]) -> Vec<&str> {
        instances.iter().map(PolicyInstance::name).collect()
    }

    #[test]
    fn test_debug_summarizes_contents() {
        let registry = registry();
        registry.assign(&Subject::user("alice"), "surveyor").unwrap();

        let rendered = format!("{registry:?}");
        assert!(rendered.starts_with("PolicyRegistry"), "{rendered}");
        assert!(rendered.contains("\"org-admin\""), "{rendered}");
        assert!(rendered.contains("subjects: 1"), "{rendered}");
    }

    #[test]
    fn test_subject_parsing() {
        assert_eq!("default".parse::<Subject>().unwrap(), Subject::Default);
        assert_eq!("anonymous".parse::<Subject>().unwrap(), Subject::Anonymous);
        assert_eq!("alice".parse::<Subject>().unwrap(), Subject::user("alice"));
        assert_eq!(Subject::user("alice").to_string(), "alice");
    }

    #[test]
    fn test_default_policies_come_first() {
        let registry = registry();
        let alice = Subject::user("alice");

        registry.assign(&alice, "org-admin").unwrap();
        registry.assign(&Subject::Default, "default").unwrap();
        registry.assign(&alice, "surveyor").unwrap();

        assert_eq!(
            names(&registry.policies_for(&alice)),
            vec!["default", "org-admin", "surveyor"]
        );
    }

    #[test]
    fn test_unknown_subject_gets_default_only() {
        let registry = registry();
        registry.assign(&Subject::Default, "default").unwrap();

        assert_eq!(names(&registry.policies_for(&Subject::user("nobody"))), vec!["default"]);
        assert_eq!(names(&registry.policies_for(&Subject::Anonymous)), vec!["default"]);
        assert_eq!(names(&registry.policies_for(&Subject::Default)), vec!["default"]);
    }

    #[test]
    fn test_assign_is_idempotent() {
        let registry = registry();
        let alice = Subject::user("alice");

        assert!(registry.assign(&alice, "org-admin").unwrap());
        assert!(!registry.assign(&alice, "org-admin").unwrap());

        assert_eq!(names(&registry.policies_for(&alice)), vec!["org-admin"]);
    }

    #[test]
    fn test_same_policy_with_different_variables_is_distinct() {
        let registry = registry();
        let alice = Subject::user("alice");

        let acme = Bindings::from([("org".to_string(), "acme".to_string())]);
        let other = Bindings::from([("org".to_string(), "other".to_string())]);
        assert!(registry.assign_with(&alice, "org-admin", acme.clone()).unwrap());
        assert!(registry.assign_with(&alice, "org-admin", other).unwrap());
        assert!(!registry.assign_with(&alice, "org-admin", acme).unwrap());

        assert_eq!(registry.policies_for(&alice).len(), 2);
    }

    #[test]
    fn test_assign_unknown_policy_fails() {
        let registry = registry();
        let err = registry
            .assign(&Subject::user("alice"), "missing")
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownPolicy(name) if name == "missing"));
    }

    #[test]
    fn test_unassign_absent_is_not_an_error() {
        let registry = registry();
        let alice = Subject::user("alice");

        assert!(!registry.unassign(&alice, "org-admin"));
        registry.assign(&alice, "org-admin").unwrap();
        registry.assign(&alice, "surveyor").unwrap();
        assert!(registry.unassign(&alice, "org-admin"));
        assert!(!registry.unassign(&alice, "org-admin"));

        assert_eq!(names(&registry.policies_for(&alice)), vec!["surveyor"]);
    }

    #[test]
    fn test_roles_expand_in_grant_order() {
        let registry = registry();
        registry
            .define_role(Role::new("org-admin", ["org-member", "org-admin"]))
            .unwrap();
        let alice = Subject::user("alice");
        let acme = Bindings::from([("org".to_string(), "acme".to_string())]);

        registry.assign(&alice, "surveyor").unwrap();
        registry.grant_role(&alice, "org-admin", acme.clone()).unwrap();

        let resolved = registry.policies_for(&alice);
        assert_eq!(names(&resolved), vec!["surveyor", "org-member", "org-admin"]);
        assert_eq!(resolved[1].variables, acme);
        assert_eq!(resolved[1].via_role.as_deref(), Some("org-admin"));
        assert!(resolved[0].via_role.is_none());

        assert!(registry.revoke_role(&alice, "org-admin"));
        assert_eq!(names(&registry.policies_for(&alice)), vec!["surveyor"]);
    }

    #[test]
    fn test_role_with_unknown_policy_rejected() {
        let registry = registry();
        let err = registry
            .define_role(Role::new("broken", ["default", "missing"]))
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::RoleReferencesUnknownPolicy { policy, .. } if policy == "missing"
        ));
        assert!(registry.role("broken").is_none());
    }

    #[test]
    fn test_grant_unknown_role_fails() {
        let registry = registry();
        let err = registry
            .grant_role(&Subject::user("alice"), "ghost", Bindings::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownRole(_)));
    }

    #[test]
    fn test_policy_replacement_is_shared() {
        let registry = registry();
        let alice = Subject::user("alice");
        let bob = Subject::user("bob");
        registry.assign(&alice, "surveyor").unwrap();
        registry.assign(&bob, "surveyor").unwrap();

        let before = registry.policies_for(&alice);
        assert_eq!(before[0].policy.clauses().len(), 1);

        registry.install_policy(
            Policy::new(
                "surveyor",
                vec![
                    Clause::allow(["party.*"], ["**"]).unwrap(),
                    Clause::deny(["party.delete"], ["**"]).unwrap(),
                ],
            )
            .unwrap(),
        );

        // Old snapshots keep the old policy; new lookups see the replacement.
        assert_eq!(before[0].policy.clauses().len(), 1);
        assert_eq!(registry.policies_for(&alice)[0].policy.clauses().len(), 2);
        assert!(Arc::ptr_eq(
            &registry.policies_for(&alice)[0].policy,
            &registry.policies_for(&bob)[0].policy
        ));
    }

    #[test]
    fn test_cached_resolution_is_invalidated_by_mutation() {
        let registry = registry().with_cache(ResolvedPolicyCache::new(16));
        let alice = Subject::user("alice");

        registry.assign(&alice, "surveyor").unwrap();
        assert_eq!(names(&registry.policies_for(&alice)), vec!["surveyor"]);
        assert_eq!(names(&registry.policies_for(&alice)), vec!["surveyor"]);

        registry.assign(&Subject::Default, "default").unwrap();
        assert_eq!(names(&registry.policies_for(&alice)), vec!["default", "surveyor"]);

        registry.unassign(&alice, "surveyor");
        assert_eq!(names(&registry.policies_for(&alice)), vec!["default"]);
    }

    #[test]
    fn test_concurrent_assignments_are_not_lost() {
        let registry = Arc::new(PolicyRegistry::new());
        for i in 0..16 {
            registry.install_policy(policy(&format!("p{i}")));
        }
        let alice = Subject::user("alice");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let alice = alice.clone();
                thread::spawn(move || {
                    registry.assign(&alice, &format!("p{i}")).unwrap();
                    // Readers always see a complete list.
                    let snapshot = registry.policies_for(&alice);
                    assert!(snapshot.iter().any(|p| p.name() == format!("p{i}")));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.grants(&alice).len(), 16);
    }
}
