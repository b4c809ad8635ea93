//! Building a ready decision service from configuration.
//!
//! Startup is all-or-nothing: a malformed policy file, a role naming an
//! unknown policy or an assignment naming an unknown role aborts the build.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tracing::info;

use crate::{
    authz::{
        AuthorizationService, Bindings, Policy, PolicyError, PolicyRegistry, RegistryError, Role,
        Subject,
    },
    cache::ResolvedPolicyCache,
    config::{AuthzConfig, TutelaryConfig},
};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to read policy directory {1}: {0}")]
    PolicyDir(std::io::Error, PathBuf),
}

/// Build the decision service described by `config.authz`.
pub fn build_service(config: &TutelaryConfig) -> Result<AuthorizationService, BootstrapError> {
    let registry = build_registry(&config.authz)?;
    Ok(AuthorizationService::new(Arc::new(registry)).with_audit(config.authz.audit.clone()))
}

/// Load policies, define roles and apply static assignments.
pub fn build_registry(config: &AuthzConfig) -> Result<PolicyRegistry, BootstrapError> {
    let registry = if config.cache_resolved_policies {
        PolicyRegistry::new().with_cache(ResolvedPolicyCache::new(config.cache_max_subjects))
    } else {
        PolicyRegistry::new()
    };

    let paths = policy_paths(config)?;
    for path in &paths {
        registry.install_policy(Policy::from_file(path)?);
    }

    for role in &config.roles {
        registry.define_role(Role::new(&role.name, &role.policies))?;
    }

    for assignment in &config.assignments {
        let subject = Subject::from(assignment.subject.as_str());
        let variables: Bindings = assignment.variables.clone();
        for policy in &assignment.policies {
            registry.assign_with(&subject, policy, variables.clone())?;
        }
        for role in &assignment.roles {
            registry.grant_role(&subject, role, variables.clone())?;
        }
    }

    info!(
        policies = registry.policy_names().len(),
        roles = config.roles.len(),
        assignments = config.assignments.len(),
        cache = config.cache_resolved_policies,
        "Authorization registry ready"
    );
    Ok(registry)
}

/// Policy files in load order: `policy_files` as listed, then `policy_dir`
/// sorted by file name.
pub fn policy_paths(config: &AuthzConfig) -> Result<Vec<PathBuf>, BootstrapError> {
    let mut paths = config.policy_files.clone();
    if let Some(dir) = &config.policy_dir {
        paths.extend(json_files_in(dir)?);
    }
    Ok(paths)
}

fn json_files_in(dir: &Path) -> Result<Vec<PathBuf>, BootstrapError> {
    let read_err = |e| BootstrapError::PolicyDir(e, dir.to_path_buf());

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
