//! Configuration for a churn process.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ChurnError, ChurnResult};

/// What to do when `rate × epoch` exceeds 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialPolicy {
    /// Refuse to construct the process (default)
    #[default]
    Reject,

    /// Cap the per-epoch probability at 1
    Clamp,
}

/// Configuration for one churn process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnConfig {
    /// Group size, anchor included
    pub nodes: usize,

    /// Target failures per minute across the whole group
    pub system_failure_rate_per_min: f64,

    /// Target mean time a failed node stays offline (minutes)
    pub avg_reconnection_time_min: f64,

    /// Epoch length in seconds (default: 1.0)
    #[serde(default = "default_epoch_duration")]
    pub epoch_duration_secs: f64,

    /// Nodes online at start, anchor included. `None` uses the
    /// calibrated steady-state expectation.
    #[serde(default)]
    pub initial_online: Option<usize>,

    /// Handling of per-epoch probabilities above 1
    #[serde(default)]
    pub trial_policy: TrialPolicy,

    /// Seed for the trial RNG (0 = unseeded)
    #[serde(default)]
    pub seed: u64,
}

fn default_epoch_duration() -> f64 {
    1.0
}

impl ChurnConfig {
    /// Creates a configuration with default epoch, policy and seed.
    pub fn new(nodes: usize, system_failure_rate_per_min: f64, avg_reconnection_time_min: f64) -> Self {
        Self {
            nodes,
            system_failure_rate_per_min,
            avg_reconnection_time_min,
            epoch_duration_secs: default_epoch_duration(),
            initial_online: None,
            trial_policy: TrialPolicy::default(),
            seed: 0,
        }
    }

    /// Sets the epoch duration.
    pub fn with_epoch_duration(mut self, secs: f64) -> Self {
        self.epoch_duration_secs = secs;
        self
    }

    /// Sets the initial online count.
    pub fn with_initial_online(mut self, count: usize) -> Self {
        self.initial_online = Some(count);
        self
    }

    /// Sets the trial policy.
    pub fn with_trial_policy(mut self, policy: TrialPolicy) -> Self {
        self.trial_policy = policy;
        self
    }

    /// Sets the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> ChurnResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> ChurnResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ChurnError::invalid(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Checks the fields the calibrator does not.
    pub fn validate(&self) -> ChurnResult<()> {
        if !self.epoch_duration_secs.is_finite() || self.epoch_duration_secs <= 0.0 {
            return Err(ChurnError::invalid(format!(
                "epoch duration must be positive, got {}",
                self.epoch_duration_secs
            )));
        }
        if let Some(initial) = self.initial_online {
            if initial > self.nodes {
                return Err(ChurnError::invalid(format!(
                    "initial online count {initial} exceeds group size {}",
                    self.nodes
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json_defaults() {
        let config = ChurnConfig::from_json(
            r#"{"nodes": 7, "system_failure_rate_per_min": 5.0, "avg_reconnection_time_min": 0.333333}"#,
        )
        .unwrap();

        assert_eq!(config.nodes, 7);
        assert_eq!(config.epoch_duration_secs, 1.0);
        assert_eq!(config.initial_online, None);
        assert_eq!(config.trial_policy, TrialPolicy::Reject);
        assert_eq!(config.seed, 0);
    }

    #[test]
    fn test_config_from_json_full() {
        let config = ChurnConfig::from_json(
            r#"{
                "nodes": 30,
                "system_failure_rate_per_min": 0.0,
                "avg_reconnection_time_min": 99999.0,
                "epoch_duration_secs": 0.5,
                "initial_online": 10,
                "trial_policy": "clamp",
                "seed": 42
            }"#,
        )
        .unwrap();

        assert_eq!(
            config,
            ChurnConfig::new(30, 0.0, 99999.0)
                .with_epoch_duration(0.5)
                .with_initial_online(10)
                .with_trial_policy(TrialPolicy::Clamp)
                .with_seed(42)
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(ChurnConfig::new(5, 1.0, 1.0).validate().is_ok());
        assert!(ChurnConfig::new(5, 1.0, 1.0).with_epoch_duration(0.0).validate().is_err());
        assert!(ChurnConfig::new(5, 1.0, 1.0).with_initial_online(6).validate().is_err());
        assert!(matches!(ChurnConfig::from_json("{"), Err(ChurnError::Parse(_))));
    }
}
