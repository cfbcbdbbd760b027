//! Configuration for the deployer.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::strategy::Strategy;

/// Rollout configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    pub strategy: Strategy,

    /// How long to wait for a machine to reach the started state.
    pub start_timeout: Duration,

    /// How long to wait for a machine's health checks to pass.
    pub health_timeout: Duration,

    /// Lease time-to-live.
    pub lease_ttl: Duration,

    /// Interval between lease renewals. Must be shorter than the TTL.
    pub lease_renew_interval: Duration,

    pub skip_health_checks: bool,

    /// Only restart machines with new release metadata.
    pub restart_only: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Rolling,
            start_timeout: Duration::from_secs(300),
            health_timeout: Duration::from_secs(300),
            lease_ttl: Duration::from_secs(13),
            lease_renew_interval: Duration::from_secs(5),
            skip_health_checks: false,
            restart_only: false,
            log_level: "info".to_string(),
        }
    }
}

impl DeployConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let strategy = match lookup("FLEET_STRATEGY") {
            Some(s) => s.parse::<Strategy>().context("invalid FLEET_STRATEGY")?,
            None => defaults.strategy,
        };

        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(s) => s
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("invalid {key}: '{s}'")),
                None => Ok(default),
            }
        };

        let start_timeout = secs("FLEET_START_TIMEOUT_SECS", defaults.start_timeout)?;
        let health_timeout = secs("FLEET_HEALTH_TIMEOUT_SECS", defaults.health_timeout)?;
        let lease_ttl = secs("FLEET_LEASE_TTL_SECS", defaults.lease_ttl)?;
        let lease_renew_interval = secs(
            "FLEET_LEASE_RENEW_INTERVAL_SECS",
            defaults.lease_renew_interval,
        )?;

        if lease_renew_interval.is_zero() || lease_renew_interval >= lease_ttl {
            bail!(
                "lease renew interval ({}s) must be non-zero and shorter than the lease TTL ({}s)",
                lease_renew_interval.as_secs(),
                lease_ttl.as_secs()
            );
        }

        let flag = |key: &str| {
            lookup(key)
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false)
        };

        let log_level = lookup("FLEET_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            strategy,
            start_timeout,
            health_timeout,
            lease_ttl,
            lease_renew_interval,
            skip_health_checks: flag("FLEET_SKIP_HEALTH_CHECKS"),
            restart_only: flag("FLEET_RESTART_ONLY"),
            log_level,
        })
    }
}
