use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Authorization configuration.
///
/// Policies are loaded from `policy_files` first, then from every `*.json`
/// file in `policy_dir` in file-name order. A later file with the same
/// policy name replaces the earlier one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthzConfig {
    #[serde(default)]
    pub policy_files: Vec<PathBuf>,

    #[serde(default)]
    pub policy_dir: Option<PathBuf>,

    /// Memoize resolved per-subject policy lists.
    #[serde(default = "default_true")]
    pub cache_resolved_policies: bool,

    /// Maximum number of subjects kept in the resolved-policy cache (0 = unlimited).
    #[serde(default = "default_cache_max_subjects")]
    pub cache_max_subjects: usize,

    #[serde(default)]
    pub audit: AuthzAuditConfig,

    #[serde(default)]
    pub roles: Vec<RoleConfig>,

    #[serde(default)]
    pub assignments: Vec<AssignmentConfig>,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            policy_files: Vec::new(),
            policy_dir: None,
            cache_resolved_policies: true,
            cache_max_subjects: default_cache_max_subjects(),
            audit: AuthzAuditConfig::default(),
            roles: Vec::new(),
            assignments: Vec::new(),
        }
    }
}

/// Which decisions are written to the `tutelary::audit` log target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthzAuditConfig {
    #[serde(default)]
    pub log_allowed: bool,

    #[serde(default = "default_true")]
    pub log_denied: bool,
}

impl Default for AuthzAuditConfig {
    fn default() -> Self {
        Self {
            log_allowed: false,
            log_denied: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleConfig {
    pub name: String,
    pub policies: Vec<String>,
}

/// Static grants applied at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignmentConfig {
    /// User id, or `default` / `anonymous`.
    pub subject: String,

    #[serde(default)]
    pub policies: Vec<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Pre-bound path captures applied to every grant in this entry.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

fn default_cache_max_subjects() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}
