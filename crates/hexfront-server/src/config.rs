//! Server configuration

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hexfront_core::StarterMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Matching validations needed to commit (K)
    pub quorum: usize,
    /// Validator ids allowed to report (N = len)
    pub validators: Vec<String>,
    /// How long a proposal may collect validations
    #[serde(rename = "proposal_timeout_secs", with = "duration_secs")]
    pub proposal_timeout: Duration,
    /// Where committed snapshots are written
    pub snapshot_dir: PathBuf,
    /// Rules directory; the embedded ruleset when unset
    pub rules_path: Option<String>,
    /// Seed for a fresh game; random when unset
    pub seed: Option<u64>,
    /// Opening position when no snapshot exists yet
    pub starter: StarterMap,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            quorum: 2,
            validators: vec![
                "validator-a".to_string(),
                "validator-b".to_string(),
                "validator-c".to_string(),
            ],
            proposal_timeout: Duration::from_secs(30),
            snapshot_dir: PathBuf::from("snapshots"),
            rules_path: None,
            seed: None,
            starter: StarterMap::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Rejects quorums that can never or always trivially be met, and ambiguous validator sets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.validators.len();
        if self.quorum == 0 {
            return Err(ConfigError::Invalid("quorum must be at least 1".to_string()));
        }
        if self.quorum > n {
            return Err(ConfigError::Invalid(format!(
                "quorum {} exceeds the {n} configured validators",
                self.quorum
            )));
        }
        let mut seen = BTreeSet::new();
        for id in &self.validators {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid("empty validator id".to_string()));
            }
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate validator `{id}`")));
            }
        }
        if self.proposal_timeout.is_zero() {
            return Err(ConfigError::Invalid("proposal timeout must be positive".to_string()));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.quorum, 2);
        assert_eq!(config.validators.len(), 3);
    }

    #[test]
    fn yaml_fills_missing_fields_from_defaults() {
        let config = ServerConfig::from_yaml(
            "quorum: 1\nvalidators: [solo]\nproposal_timeout_secs: 5\nseed: 42\n",
        )
        .unwrap();
        assert_eq!(config.validators, vec!["solo".to_string()]);
        assert_eq!(config.proposal_timeout, Duration::from_secs(5));
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.starter, StarterMap::default());
        assert_eq!(config.snapshot_dir, PathBuf::from("snapshots"));
    }

    #[test]
    fn yaml_round_trips_through_seconds() {
        let config = ServerConfig::default();
        let text = serde_yaml::to_string(&config).unwrap();
        assert!(text.contains("proposal_timeout_secs: 30"));
        assert_eq!(ServerConfig::from_yaml(&text).unwrap(), config);
    }

    #[test]
    fn impossible_quorums_are_rejected() {
        let cases = [
            "quorum: 0\nvalidators: [a]\n",
            "quorum: 3\nvalidators: [a, b]\n",
            "quorum: 1\nvalidators: [a, a]\n",
            "quorum: 1\nvalidators: [a]\nproposal_timeout_secs: 0\n",
        ];
        for yaml in cases {
            assert!(
                matches!(ServerConfig::from_yaml(yaml), Err(ConfigError::Invalid(_))),
                "{yaml}"
            );
        }
    }
}
