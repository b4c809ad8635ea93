//! Policy documents.
//!
//! A policy is a named, ordered list of clauses. It is parsed and validated
//! in one step and never changes afterwards; loading a new version of a
//! policy produces a new [`Policy`] value that replaces the old one.
//!
//! # Document format
//!
//! ```json
//! {
//!   "name": "org-admin",
//!   "clauses": [
//!     { "effect": "allow", "action": "project.*", "object": "organization/{org}/**" },
//!     { "effect": "deny", "action": ["project.delete"], "object": ["organization/{org}/project/archive"] }
//!   ]
//! }
//! ```
//!
//! `action` and `object` accept either a single pattern or a list.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ActionPattern, PathPattern, PolicyError};

/// Effect of a matching clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// A single allow/deny rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clause {
    effect: Effect,
    #[serde(rename = "action")]
    actions: Vec<ActionPattern>,
    #[serde(rename = "object")]
    objects: Vec<PathPattern>,
}

impl Clause {
    /// Parse a clause from raw pattern strings.
    pub fn new<A, O>(effect: Effect, actions: A, objects: O) -> Result<Self, PolicyError>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        O: IntoIterator,
        O::Item: AsRef<str>,
    {
        let actions = actions
            .into_iter()
            .map(|a| ActionPattern::parse(a.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let objects = objects
            .into_iter()
            .map(|o| PathPattern::parse(o.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            effect,
            actions,
            objects,
        })
    }

    pub fn allow<A, O>(actions: A, objects: O) -> Result<Self, PolicyError>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        O: IntoIterator,
        O::Item: AsRef<str>,
    {
        Self::new(Effect::Allow, actions, objects)
    }

    pub fn deny<A, O>(actions: A, objects: O) -> Result<Self, PolicyError>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        O: IntoIterator,
        O::Item: AsRef<str>,
    {
        Self::new(Effect::Deny, actions, objects)
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn actions(&self) -> &[ActionPattern] {
        &self.actions
    }

    pub fn objects(&self) -> &[PathPattern] {
        &self.objects
    }
}

/// An immutable, named, ordered set of clauses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    name: String,
    clauses: Vec<Clause>,
}

impl Policy {
    /// Build a policy, validating that every clause is usable.
    pub fn new(name: impl Into<String>, clauses: Vec<Clause>) -> Result<Self, PolicyError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PolicyError::MissingName);
        }

        for (i, clause) in clauses.iter().enumerate() {
            if clause.actions.is_empty() {
                return Err(PolicyError::InvalidClause {
                    policy: name,
                    clause: i,
                    reason: "no action patterns".into(),
                });
            }
            if clause.objects.is_empty() {
                return Err(PolicyError::InvalidClause {
                    policy: name,
                    clause: i,
                    reason: "no object patterns".into(),
                });
            }
        }

        Ok(Self { name, clauses })
    }

    /// Parse a policy from its JSON document.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let document: PolicyDocument = serde_json::from_str(json)?;
        let name = document.name.ok_or(PolicyError::MissingName)?;
        Self::from_document(name, document.clauses)
    }

    /// Load a policy from a JSON file.
    ///
    /// When the document has no `name`, the file stem is used.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PolicyError::Io(e, path.to_path_buf()))?;
        let document: PolicyDocument = serde_json::from_str(&contents)?;

        let name = match document.name {
            Some(name) => name,
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .ok_or(PolicyError::MissingName)?,
        };
        Self::from_document(name, document.clauses)
    }

    fn from_document(name: String, clauses: Vec<ClauseDocument>) -> Result<Self, PolicyError> {
        let clauses = clauses
            .into_iter()
            .map(|c| Clause::new(c.effect, c.action.into_vec(), c.object.into_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(name, clauses)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Serialize back to the document format.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyDocument {
    #[serde(default)]
    name: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    version: Option<String>,
    #[serde(alias = "clause")]
    clauses: Vec<ClauseDocument>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ClauseDocument {
    effect: Effect,
    #[serde(alias = "actions")]
    action: OneOrMany,
    #[serde(alias = "objects")]
    object: OneOrMany,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_parse_document() {
        let policy = Policy::from_json(
            r#"{
                "name": "org-admin",
                "clauses": [
                    { "effect": "allow", "action": "project.*", "object": "organization/{org}/**" },
                    { "effect": "deny", "action": ["project.delete", "project.archive"], "object": ["organization/{org}/project/locked"] }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(policy.name(), "org-admin");
        assert_eq!(policy.clauses().len(), 2);
        assert_eq!(policy.clauses()[0].effect(), Effect::Allow);
        assert_eq!(policy.clauses()[1].effect(), Effect::Deny);
        assert_eq!(policy.clauses()[1].actions().len(), 2);
        assert_eq!(policy.clauses()[1].objects()[0].as_str(), "organization/{org}/project/locked");
    }

    #[test]
    fn test_clause_order_is_preserved() {
        let policy = Policy::from_json(
            r#"{"name": "p", "clause": [
                {"effect": "deny", "action": "a.b", "object": "x"},
                {"effect": "allow", "action": "a.c", "object": "y"},
                {"effect": "deny", "action": "a.d", "object": "z"}
            ]}"#,
        )
        .unwrap();

        let actions: Vec<&str> = policy
            .clauses()
            .iter()
            .map(|c| c.actions()[0].as_str())
            .collect();
        assert_eq!(actions, vec!["a.b", "a.c", "a.d"]);
    }

    #[test]
    fn test_malformed_pattern_rejects_whole_policy() {
        let err = Policy::from_json(
            r#"{"name": "bad", "clauses": [
                {"effect": "allow", "action": "project.view", "object": "organization/*"},
                {"effect": "allow", "action": "project.view", "object": "organization/**/project"}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPathPattern { .. }));
        assert!(err.to_string().contains("last segment"), "{err}");
    }

    #[test]
    fn test_unknown_effect_rejected() {
        let err = Policy::from_json(
            r#"{"name": "bad", "clauses": [{"effect": "maybe", "action": "a", "object": "b"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::Parse(_)));
    }

    #[test]
    fn test_empty_action_list_rejected() {
        let err = Policy::from_json(
            r#"{"name": "bad", "clauses": [{"effect": "allow", "action": [], "object": "b"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PolicyError::InvalidClause { clause: 0, .. }
        ));
    }

    #[test]
    fn test_missing_name_rejected() {
        let err = Policy::from_json(r#"{"clauses": []}"#).unwrap_err();
        assert!(matches!(err, PolicyError::MissingName));
    }

    #[test]
    fn test_from_file_uses_stem_when_unnamed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surveyor.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"version": "2015-12-10", "clauses": [{{"effect": "allow", "action": "party.view", "object": "organization/*/project/*/party/*"}}]}}"#
        )
        .unwrap();

        let policy = Policy::from_file(&path).unwrap();
        assert_eq!(policy.name(), "surveyor");
    }

    #[test]
    fn test_round_trips_through_json() {
        let policy = Policy::new(
            "default",
            vec![Clause::allow(["project.view"], ["organization/*/project/*"]).unwrap()],
        )
        .unwrap();
        let reparsed = Policy::from_json(&policy.to_json()).unwrap();
        assert_eq!(reparsed, policy);
    }
}
