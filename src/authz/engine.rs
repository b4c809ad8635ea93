//! Single-policy evaluation.
//!
//! Clauses are scanned in authored order and the last matching clause wins.
//! A clause matches when at least one of its action patterns matches the
//! action and at least one of its object patterns matches the path. When
//! several object patterns match, a capture name they share must bind the
//! same value in each of them or the clause does not match.

use serde::Serialize;

use super::{Bindings, Clause, Effect, Policy};

/// Outcome of evaluating one or more policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    /// No clause matched.
    Indeterminate,
}

impl Decision {
    pub fn is_decisive(&self) -> bool {
        !matches!(self, Self::Indeterminate)
    }

    /// Fail-closed: only an explicit allow permits the action.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Indeterminate => "indeterminate",
        }
    }
}

impl From<Effect> for Decision {
    fn from(effect: Effect) -> Self {
        match effect {
            Effect::Allow => Self::Allow,
            Effect::Deny => Self::Deny,
        }
    }
}

/// Result of evaluating a single policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: Decision,
    /// Bindings from the last matching clause (empty when indeterminate).
    pub bindings: Bindings,
    /// Index of the last matching clause.
    pub clause: Option<usize>,
}

impl Evaluation {
    fn indeterminate() -> Self {
        Self {
            decision: Decision::Indeterminate,
            bindings: Bindings::new(),
            clause: None,
        }
    }
}

/// Evaluate a policy with no pre-bound variables.
pub fn evaluate(policy: &Policy, action: &str, path: &str) -> Evaluation {
    evaluate_with(policy, action, path, &Bindings::new())
}

/// Evaluate a policy whose captures may be pre-bound by its assignment.
pub fn evaluate_with(policy: &Policy, action: &str, path: &str, prebound: &Bindings) -> Evaluation {
    let mut result = Evaluation::indeterminate();

    for (index, clause) in policy.clauses().iter().enumerate() {
        if !clause.actions().iter().any(|p| p.matches(action)) {
            continue;
        }

        let Some(bindings) = object_bindings(clause, path, prebound) else {
            continue;
        };

        tracing::trace!(
            policy = %policy.name(),
            clause = index,
            effect = clause.effect().as_str(),
            action,
            path,
            "Clause matched"
        );

        result = Evaluation {
            decision: clause.effect().into(),
            bindings,
            clause: Some(index),
        };
    }

    result
}

/// Merge the bindings of every object pattern in `clause` that matches `path`.
fn object_bindings(clause: &Clause, path: &str, prebound: &Bindings) -> Option<Bindings> {
    let mut merged: Option<Bindings> = None;

    for bindings in clause
        .objects()
        .iter()
        .filter_map(|p| p.matches_with(path, prebound))
    {
        let acc = merged.get_or_insert_with(Bindings::new);
        for (name, value) in bindings {
            match acc.get(&name) {
                Some(bound) if *bound != value => return None,
                Some(_) => {}
                None => {
                    acc.insert(name, value);
                }
            }
        }
    }

    merged
}
