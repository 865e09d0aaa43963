//! Engine configuration resolution
//!
//! Settings are resolved in two tiers: the TOML file, then environment
//! variable overrides. Missing values fall back to defaults; the result is
//! validated before use.

use crate::arbitration::ArbitratorSettings;
use crate::matching::{MatchSettings, MAX_EXACT_WIDTH};
use crate::workflow::PipelineConfig;
use concord_common::config::TomlConfig;
use concord_common::{Error, Result};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const JUDGE_ENDPOINT_ENV: &str = "CONCORD_JUDGE_ENDPOINT";
pub const MAX_REPAIR_ATTEMPTS_ENV: &str = "CONCORD_MAX_REPAIR_ATTEMPTS";
pub const MAX_CONCURRENT_JUDGES_ENV: &str = "CONCORD_MAX_CONCURRENT_JUDGES";

pub const DEFAULT_BIND: &str = "127.0.0.1:5790";
pub const DEFAULT_JUDGE_NAME: &str = "heuristic";

/// Largest smaller-side size the bitmask solver accepts (2^20 states per row)
pub const MAX_EXACT_SOLVER_LIMIT: usize = MAX_EXACT_WIDTH;

/// Fully resolved engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub matching: MatchSettings,
    pub max_repair_attempts: u32,
    pub producer_timeout: Duration,
    pub max_concurrent_producers: usize,
    pub max_concurrent_judges: usize,
    pub judge_min_interval: Duration,
    pub judge_timeout: Duration,
    pub max_concurrent_segments: usize,
    /// HTTP judge endpoint; `None` selects the built-in heuristic judge
    pub judge_endpoint: Option<String>,
    pub judge_name: String,
    pub bind: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            matching: MatchSettings::default(),
            max_repair_attempts: 3,
            producer_timeout: Duration::from_millis(30_000),
            max_concurrent_producers: 8,
            max_concurrent_judges: 2,
            judge_min_interval: Duration::ZERO,
            judge_timeout: Duration::from_millis(60_000),
            max_concurrent_segments: 4,
            judge_endpoint: None,
            judge_name: DEFAULT_JUDGE_NAME.to_string(),
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

impl EngineConfig {
    /// Build from the TOML file, apply environment overrides, then validate
    pub fn resolve(toml_config: &TomlConfig) -> Result<Self> {
        let mut config = Self::from_toml(toml_config);
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with whatever the TOML file sets
    pub fn from_toml(toml_config: &TomlConfig) -> Self {
        let defaults = Self::default();
        let matching = &toml_config.matching;
        let concurrency = &toml_config.concurrency;

        Self {
            matching: MatchSettings {
                shingle_width: matching
                    .shingle_width
                    .unwrap_or(defaults.matching.shingle_width),
                min_match_score: matching
                    .min_match_score
                    .unwrap_or(defaults.matching.min_match_score),
                full_agreement_overlap: matching
                    .full_agreement_overlap
                    .unwrap_or(defaults.matching.full_agreement_overlap),
                exact_solver_limit: matching
                    .exact_solver_limit
                    .unwrap_or(defaults.matching.exact_solver_limit),
            },
            max_repair_attempts: toml_config
                .repair
                .max_attempts
                .unwrap_or(defaults.max_repair_attempts),
            producer_timeout: concurrency
                .producer_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.producer_timeout),
            max_concurrent_producers: concurrency
                .max_concurrent_producers
                .unwrap_or(defaults.max_concurrent_producers),
            max_concurrent_judges: concurrency
                .max_concurrent_judges
                .unwrap_or(defaults.max_concurrent_judges),
            judge_min_interval: concurrency
                .judge_min_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.judge_min_interval),
            judge_timeout: concurrency
                .judge_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.judge_timeout),
            max_concurrent_segments: concurrency
                .max_concurrent_segments
                .unwrap_or(defaults.max_concurrent_segments),
            judge_endpoint: toml_config.judge.endpoint.clone(),
            judge_name: toml_config
                .judge
                .name
                .clone()
                .unwrap_or(defaults.judge_name),
            bind: toml_config.server.bind.clone().unwrap_or(defaults.bind),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var(JUDGE_ENDPOINT_ENV) {
            let endpoint = endpoint.trim().to_string();
            if endpoint.is_empty() {
                self.judge_endpoint = None;
            } else {
                info!("Judge endpoint loaded from environment variable");
                self.judge_endpoint = Some(endpoint);
            }
        }
        if let Some(attempts) = env_number::<u32>(MAX_REPAIR_ATTEMPTS_ENV) {
            self.max_repair_attempts = attempts;
        }
        if let Some(judges) = env_number::<usize>(MAX_CONCURRENT_JUDGES_ENV) {
            self.max_concurrent_judges = judges;
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        if m.shingle_width == 0 {
            return Err(Error::Config("matching.shingle_width must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&m.min_match_score) {
            return Err(Error::Config(format!(
                "matching.min_match_score must be within [0, 1], got {}",
                m.min_match_score
            )));
        }
        if !(0.0..=1.0).contains(&m.full_agreement_overlap)
            || m.full_agreement_overlap < m.min_match_score
        {
            return Err(Error::Config(format!(
                "matching.full_agreement_overlap must be within [min_match_score, 1], got {}",
                m.full_agreement_overlap
            )));
        }
        if m.exact_solver_limit > MAX_EXACT_SOLVER_LIMIT {
            return Err(Error::Config(format!(
                "matching.exact_solver_limit must be at most {}, got {}",
                MAX_EXACT_SOLVER_LIMIT, m.exact_solver_limit
            )));
        }
        if self.max_concurrent_producers == 0
            || self.max_concurrent_judges == 0
            || self.max_concurrent_segments == 0
        {
            return Err(Error::Config("concurrency limits must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            matching: self.matching.clone(),
            max_repair_attempts: self.max_repair_attempts,
            max_concurrent_segments: self.max_concurrent_segments,
        }
    }

    pub fn arbitrator_settings(&self) -> ArbitratorSettings {
        ArbitratorSettings {
            max_concurrent_judges: self.max_concurrent_judges,
            min_interval: self.judge_min_interval,
            timeout: self.judge_timeout,
            max_attempts: self.max_repair_attempts,
        }
    }
}

fn env_number<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => {
            info!("{} loaded from environment variable", name);
            Some(value)
        }
        Err(_) => {
            warn!("Ignoring {}: '{}' is not a valid number", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_common::config::{MatchingSection, RepairSection};

    #[test]
    fn test_defaults_without_file_settings() {
        let config = EngineConfig::from_toml(&TomlConfig::default());
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_values_override_defaults() {
        let toml_config = TomlConfig {
            matching: MatchingSection {
                min_match_score: Some(0.4),
                ..Default::default()
            },
            repair: RepairSection {
                max_attempts: Some(1),
            },
            ..Default::default()
        };
        let config = EngineConfig::from_toml(&toml_config);
        assert_eq!(config.matching.min_match_score, 0.4);
        assert_eq!(config.max_repair_attempts, 1);
        assert_eq!(config.arbitrator_settings().max_attempts, 1);
    }

    #[test]
    fn test_validation_rejects_bad_thresholds() {
        let mut config = EngineConfig::default();
        config.matching.full_agreement_overlap = 0.1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = EngineConfig::default();
        config.matching.exact_solver_limit = 21;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.matching.shingle_width = 0;
        assert!(config.validate().is_err());
    }
}
