//! Configuration for the risk engine

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Risk engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Frequency estimator sizing and decay
    pub estimator: EstimatorConfig,

    /// Anti-bot heuristics
    pub antibot: AntiBotConfig,

    /// Fusion weights and amount tiers
    pub scoring: ScoringConfig,

    /// Optional remote risk collaborator
    pub remote: RemoteConfig,

    /// Per-request evaluation budget
    pub evaluation: EvaluationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "fraud-risk-engine".to_string(),
            estimator: EstimatorConfig::default(),
            antibot: AntiBotConfig::default(),
            scoring: ScoringConfig::default(),
            remote: RemoteConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

/// Count-Min Sketch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Number of hash rows (d)
    pub depth: usize,

    /// Buckets per row (w)
    pub width: usize,

    /// Multiplier applied to every counter on decay, in (0,1]
    pub decay_factor: f64,

    /// Decay period (seconds)
    pub decay_interval_secs: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            depth: 4,
            width: 2048,
            decay_factor: 0.5,
            decay_interval_secs: 60,
        }
    }
}

impl EstimatorConfig {
    pub fn decay_interval(&self) -> Duration {
        Duration::from_secs(self.decay_interval_secs)
    }
}

/// Anti-bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiBotConfig {
    /// Requests per IP (within the decay window) that start to look automated
    pub soft_rate_limit: u64,

    /// Requests per IP that are classified as bot outright
    pub hard_rate_limit: u64,

    /// Minimum human interval between two actions of one actor (milliseconds)
    pub min_action_interval_ms: i64,

    /// Reputation at or above which an IP is classified as bot
    pub reputation_block_threshold: f64,

    /// Upper bound on actors with cadence history
    pub max_tracked_actors: usize,
}

impl Default for AntiBotConfig {
    fn default() -> Self {
        Self {
            soft_rate_limit: 30,
            hard_rate_limit: 120,
            min_action_interval_ms: 500,
            reputation_block_threshold: 0.9,
            max_tracked_actors: 100_000,
        }
    }
}

/// Amount tier: amounts up to `up_to` map to `factor`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountTier {
    pub up_to: f64,
    pub factor: f64,
}

/// Fusion weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub bot_weight: f64,
    pub financial_weight: f64,
    pub location_weight: f64,
    pub amount_weight: f64,

    /// Ascending amount tiers; amounts above the last tier use `max_amount_factor`
    pub amount_tiers: Vec<AmountTier>,

    pub max_amount_factor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            bot_weight: 0.4,
            financial_weight: 0.3,
            location_weight: 0.2,
            amount_weight: 0.1,
            amount_tiers: vec![
                AmountTier { up_to: 10_000.0, factor: 0.05 },
                AmountTier { up_to: 50_000.0, factor: 0.15 },
                AmountTier { up_to: 100_000.0, factor: 0.30 },
                AmountTier { up_to: 500_000.0, factor: 0.50 },
                AmountTier { up_to: 1_000_000.0, factor: 0.70 },
            ],
            max_amount_factor: 0.90,
        }
    }
}

/// Remote collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Call the remote service at all
    pub enabled: bool,

    /// Assessment endpoint (HTTP POST, JSON)
    pub endpoint: String,

    /// Per-call timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:8090/v1/risk/assess".to_string(),
            timeout_ms: 200,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Evaluation budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Default deadline applied when the caller does not supply one (milliseconds)
    pub default_deadline_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            default_deadline_ms: 1_000,
        }
    }
}

impl EvaluationConfig {
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then apply environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(endpoint) = std::env::var("RISK_ENGINE_REMOTE_ENDPOINT") {
            config.remote.endpoint = endpoint;
            config.remote.enabled = true;
        }

        if let Ok(timeout) = std::env::var("RISK_ENGINE_REMOTE_TIMEOUT_MS") {
            config.remote.timeout_ms = parse_env("RISK_ENGINE_REMOTE_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(interval) = std::env::var("RISK_ENGINE_DECAY_INTERVAL_SECS") {
            config.estimator.decay_interval_secs =
                parse_env("RISK_ENGINE_DECAY_INTERVAL_SECS", &interval)?;
        }

        if let Ok(deadline) = std::env::var("RISK_ENGINE_DEADLINE_MS") {
            config.evaluation.default_deadline_ms = parse_env("RISK_ENGINE_DEADLINE_MS", &deadline)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.estimator.depth == 0 || self.estimator.width == 0 {
            return Err(Error::Config("estimator depth and width must be > 0".to_string()));
        }

        if self.estimator.decay_interval_secs == 0 {
            return Err(Error::Config("decay_interval_secs must be > 0".to_string()));
        }

        let factor = self.estimator.decay_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(Error::Config(format!(
                "decay_factor must be in (0,1], got {}",
                factor
            )));
        }

        let s = &self.scoring;
        let weights = [s.bot_weight, s.financial_weight, s.location_weight, s.amount_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::Config("scoring weights must be non-negative".to_string()));
        }
        let total: f64 = weights.iter().sum();
        if total > 1.0 + 1e-9 {
            return Err(Error::Config(format!("scoring weights sum to {} > 1.0", total)));
        }

        if s.amount_tiers.windows(2).any(|w| w[0].up_to >= w[1].up_to) {
            return Err(Error::Config("amount tiers must be strictly ascending".to_string()));
        }

        if self.antibot.soft_rate_limit > self.antibot.hard_rate_limit {
            return Err(Error::Config(
                "antibot soft_rate_limit must not exceed hard_rate_limit".to_string(),
            ));
        }

        if self.antibot.max_tracked_actors == 0 {
            return Err(Error::Config("antibot max_tracked_actors must be > 0".to_string()));
        }

        if self.remote.timeout_ms == 0 {
            return Err(Error::Config("remote timeout_ms must be > 0".to_string()));
        }
        if self.remote.enabled && self.remote.endpoint.trim().is_empty() {
            return Err(Error::Config("remote endpoint is required when enabled".to_string()));
        }

        if self.evaluation.default_deadline_ms == 0 {
            return Err(Error::Config("default_deadline_ms must be > 0".to_string()));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Config(format!("{} has invalid value '{}'", name, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "fraud-risk-engine");
        assert_eq!(config.scoring.bot_weight, 0.4);
        assert!(!config.remote.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [estimator]
            width = 512

            [remote]
            enabled = true
            timeout_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.estimator.width, 512);
        assert_eq!(config.estimator.depth, 4);
        assert!(config.remote.enabled);
        assert_eq!(config.remote.timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut config = Config::default();
        config.scoring.bot_weight = 0.9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.estimator.decay_factor = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let mut config = Config::default();
        config.estimator.decay_interval_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.remote.timeout_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.evaluation.default_deadline_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let zero_interval: Config = toml::from_str(
            r#"
            [estimator]
            decay_interval_secs = 0
            "#,
        )
        .unwrap();
        assert!(zero_interval.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_enabled_remote_without_endpoint() {
        let mut config = Config::default();
        config.remote.enabled = true;
        config.remote.endpoint = String::new();
        assert!(config.validate().is_err());

        config.remote.enabled = false;
        assert!(config.validate().is_ok());
    }
}
