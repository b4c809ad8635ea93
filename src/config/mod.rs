//! Configuration module for tutelary.
//!
//! Configured via a TOML file, with support for environment variable
//! interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [authz]
//! policy_dir = "${TUTELARY_POLICY_DIR}"
//!
//! [[authz.assignments]]
//! subject = "default"
//! policies = ["default"]
//!
//! [dispatch]
//! default_queue = "celery"
//! ```

mod authz;
mod dispatch;
mod observability;

use std::path::Path;

pub use authz::{AssignmentConfig, AuthzAuditConfig, AuthzConfig, RoleConfig};
pub use dispatch::{CircuitBreakerConfig, DispatchConfig, RouteConfig};
pub use observability::{LogFormat, LogLevel, LoggingConfig, MetricsConfig, ObservabilityConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authz::ActionPattern;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TutelaryConfig {
    #[serde(default)]
    pub authz: AuthzConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl TutelaryConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: TutelaryConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for role in &self.authz.roles {
            if role.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "authz.roles: role name must not be empty".into(),
                ));
            }
        }

        for assignment in &self.authz.assignments {
            if assignment.subject.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "authz.assignments: subject must not be empty".into(),
                ));
            }
        }

        let breaker = &self.dispatch.circuit_breaker;
        if breaker.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "dispatch.circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if breaker.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "dispatch.circuit_breaker.backoff_multiplier must be at least 1.0".into(),
            ));
        }

        if self.dispatch.default_queue.is_empty() {
            return Err(ConfigError::Validation(
                "dispatch.default_queue must not be empty".into(),
            ));
        }
        for route in &self.dispatch.routes {
            ActionPattern::parse(&route.pattern).map_err(|e| {
                ConfigError::Validation(format!("dispatch.routes: {e}"))
            })?;
            if route.queue.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "dispatch.routes: route '{}' has an empty queue",
                    route.pattern
                )));
            }
        }

        #[cfg(not(feature = "prometheus"))]
        if self.observability.metrics.enabled {
            return Err(ConfigError::Validation(
                "observability.metrics.enabled requires the 'prometheus' feature".into(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Variables after a `#` on the same line are left alone.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };
            if comment_pos.is_some_and(|pos| whole.start() >= pos) {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);
            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);
            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
