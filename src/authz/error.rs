//! Authorization errors.
//!
//! Every error here is raised while loading or administering policies. The
//! decision path itself has no error type: loaded policies are always
//! well-formed.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid object pattern `{pattern}`: {reason}")]
    InvalidPathPattern { pattern: String, reason: String },

    #[error("Invalid action pattern `{pattern}`: {reason}")]
    InvalidActionPattern { pattern: String, reason: String },

    #[error("Policy '{policy}' clause {clause}: {reason}")]
    InvalidClause {
        policy: String,
        clause: usize,
        reason: String,
    },

    #[error("Policy name must not be empty")]
    MissingName,

    #[error("Failed to parse policy document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read policy file {1}: {0}")]
    Io(std::io::Error, PathBuf),
}

impl PolicyError {
    pub(crate) fn invalid_path(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPathPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_action(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidActionPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown policy '{0}'")]
    UnknownPolicy(String),

    #[error("Unknown role '{0}'")]
    UnknownRole(String),

    #[error("Role '{role}' references unknown policy '{policy}'")]
    RoleReferencesUnknownPolicy { role: String, policy: String },

    #[error("Role name must not be empty")]
    EmptyRoleName,
}

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("Access denied: {subject} may not {action} on {path}")]
    AccessDenied {
        subject: String,
        action: String,
        path: String,
    },
}

impl AuthzError {
    pub fn access_denied(
        subject: impl ToString,
        action: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self::AccessDenied {
            subject: subject.to_string(),
            action: action.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EntityError {
    #[error("Invalid path template `{template}`: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Entity '{kind}' has no value for path field '{field}'")]
    MissingField { kind: String, field: String },

    #[error("Entity '{kind}' field '{field}' value `{value}` is not a valid path segment")]
    InvalidFieldValue {
        kind: String,
        field: String,
        value: String,
    },

    #[error("Action '{verb}' does not apply to '{kind}'")]
    UnknownAction { kind: String, verb: String },
}
