//! Engine configuration
//!
//! Tunes how a pipeline run fans out and reacts to per-identifier failures.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// What the sequencer does when a fan-out phase reports failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the pipeline before the next phase
    #[default]
    Abort,
    /// Drop the failed identifiers and keep going with the others
    Continue,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "continue" => Ok(Self::Continue),
            other => anyhow::bail!("unknown failure policy '{}' (expected abort or continue)", other),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => f.write_str("abort"),
            Self::Continue => f.write_str("continue"),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on concurrently running workers of one fan-out (None = unbounded)
    pub max_parallel: Option<usize>,

    pub failure_policy: FailurePolicy,

    /// Prefix of allocated identifiers (e.g. "user" for user1, user2, ...)
    pub identifier_prefix: String,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            max_parallel: None,
            failure_policy: FailurePolicy::Abort,
            identifier_prefix: "user".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - MULTIPRESS_MAX_PARALLEL (optional, default: unbounded)
    /// - MULTIPRESS_ON_FAILURE (optional, abort|continue, default: abort)
    /// - MULTIPRESS_IDENTIFIER_PREFIX (optional, default: user)
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::new();

        if let Ok(value) = std::env::var("MULTIPRESS_MAX_PARALLEL") {
            let bound = value
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("MULTIPRESS_MAX_PARALLEL must be a number, got '{}'", value))?;
            config.max_parallel = Some(bound);
        }

        if let Ok(value) = std::env::var("MULTIPRESS_ON_FAILURE") {
            config.failure_policy = value.parse()?;
        }

        if let Ok(value) = std::env::var("MULTIPRESS_IDENTIFIER_PREFIX") {
            config.identifier_prefix = value;
        }

        Ok(config)
    }

    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_parallel == Some(0) {
            anyhow::bail!("max_parallel must be greater than 0");
        }

        if self.identifier_prefix.is_empty() {
            anyhow::bail!("identifier_prefix cannot be empty");
        }

        if !self
            .identifier_prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            anyhow::bail!("identifier_prefix must be lowercase alphanumeric");
        }

        // A trailing digit would make "user1" + 2 indistinguishable from "user" + 12
        if self
            .identifier_prefix
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_digit())
        {
            anyhow::bail!("identifier_prefix cannot end with a digit");
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_parallel, None);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.identifier_prefix, "user");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.max_parallel = Some(0);
        assert!(config.validate().is_err());

        config.max_parallel = Some(4);
        assert!(config.validate().is_ok());

        config.identifier_prefix = String::new();
        assert!(config.validate().is_err());

        config.identifier_prefix = "site-".to_string();
        assert!(config.validate().is_err());

        config.identifier_prefix = "site2".to_string();
        assert!(config.validate().is_err());

        config.identifier_prefix = "Site".to_string();
        assert!(config.validate().is_err());

        config.identifier_prefix = "site".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("abort".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert_eq!(" Continue ".parse::<FailurePolicy>().unwrap(), FailurePolicy::Continue);
        assert!("retry".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_max_parallel(Some(3))
            .with_failure_policy(FailurePolicy::Continue);

        assert_eq!(config.max_parallel, Some(3));
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
    }
}
