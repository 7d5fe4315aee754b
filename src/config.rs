//! Engine configuration
//!
//! Policy constants live here rather than in the classifiers so they can be
//! tuned per run without touching the core logic.

use crate::error::{NexusError, NexusResult};
use anyhow::{Context as AnyhowContext, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What a sales tax registration does to sticky nexus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Registration is only reported; exposure keeps accruing as if unregistered
    #[default]
    PresentationOnly,

    /// Registration in year Y releases the sticky latch from Y+1 and stops liability for later years
    ClearsExposure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Percent of threshold at which a state is flagged as approaching
    #[serde(default = "default_approaching_threshold_pct")]
    pub approaching_threshold_pct: Decimal,

    /// Day-count basis for interest
    #[serde(default = "default_days_in_year")]
    pub days_in_year: u32,

    #[serde(default)]
    pub registration_policy: RegistrationPolicy,

    /// Fan out over states on worker threads
    #[serde(default = "default_parallel")]
    pub parallel: bool,

    /// Decimal places for money outputs
    #[serde(default = "default_currency_scale")]
    pub currency_scale: u32,
}

fn default_approaching_threshold_pct() -> Decimal {
    dec!(90)
}

fn default_days_in_year() -> u32 {
    365
}

fn default_parallel() -> bool {
    true
}

fn default_currency_scale() -> u32 {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            approaching_threshold_pct: default_approaching_threshold_pct(),
            days_in_year: default_days_in_year(),
            registration_policy: RegistrationPolicy::default(),
            parallel: default_parallel(),
            currency_scale: default_currency_scale(),
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: EngineConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NexusResult<()> {
        if self.days_in_year == 0 {
            return Err(NexusError::Config("days_in_year must be positive".to_string()));
        }
        if self.approaching_threshold_pct.is_sign_negative() {
            return Err(NexusError::Config(format!(
                "approaching_threshold_pct must not be negative: {}",
                self.approaching_threshold_pct
            )));
        }
        if self.currency_scale > 10 {
            return Err(NexusError::Config(format!(
                "currency_scale too large: {}",
                self.currency_scale
            )));
        }
        Ok(())
    }

    pub fn with_registration_policy(mut self, policy: RegistrationPolicy) -> Self {
        self.registration_policy = policy;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.approaching_threshold_pct, dec!(90));
        assert_eq!(config.days_in_year, 365);
        assert_eq!(config.registration_policy, RegistrationPolicy::PresentationOnly);
        assert!(config.parallel);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"registration_policy": "clears_exposure", "approaching_threshold_pct": "80"}"#)
                .unwrap();
        assert_eq!(config.registration_policy, RegistrationPolicy::ClearsExposure);
        assert_eq!(config.approaching_threshold_pct, dec!(80));
        assert_eq!(config.currency_scale, 2);
    }

    #[test]
    fn test_zero_day_count_rejected() {
        let config = EngineConfig {
            days_in_year: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
