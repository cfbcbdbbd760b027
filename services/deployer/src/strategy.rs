//! Rollout strategies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a rollout reacts to failures and whether it waits on machines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One machine at a time, each started and healthy before the next.
    #[default]
    Rolling,
    /// Touch every machine without waiting, skipping past failures.
    Immediate,
}

/// What a failed machine operation does to the rest of the rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure and move on to the next machine.
    BestEffort,
    /// Abort the rollout.
    FailFast,
}

impl Strategy {
    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            Self::Rolling => FailurePolicy::FailFast,
            Self::Immediate => FailurePolicy::BestEffort,
        }
    }

    /// Whether machines must be started (and healthy) before moving on.
    pub fn is_health_gated(&self) -> bool {
        match self {
            Self::Rolling => true,
            Self::Immediate => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rolling => "rolling",
            Self::Immediate => "immediate",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur when parsing a strategy name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("deployment strategy '{0}' is not supported yet")]
    Unsupported(String),

    #[error("unknown deployment strategy '{0}' (expected 'rolling' or 'immediate')")]
    Unknown(String),
}

impl std::str::FromStr for Strategy {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rolling" => Ok(Self::Rolling),
            "immediate" => Ok(Self::Immediate),
            "canary" | "bluegreen" => Err(StrategyError::Unsupported(s.to_string())),
            _ => Err(StrategyError::Unknown(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_is_rolling() {
        let strategy = Strategy::default();
        assert_eq!(strategy, Strategy::Rolling);
        assert_eq!(strategy.failure_policy(), FailurePolicy::FailFast);
        assert!(strategy.is_health_gated());
    }

    #[test]
    fn test_immediate_is_best_effort() {
        assert_eq!(
            Strategy::Immediate.failure_policy(),
            FailurePolicy::BestEffort
        );
        assert!(!Strategy::Immediate.is_health_gated());
    }

    #[rstest]
    #[case("rolling", Ok(Strategy::Rolling))]
    #[case(" Immediate ", Ok(Strategy::Immediate))]
    #[case("canary", Err(StrategyError::Unsupported("canary".to_string())))]
    #[case("bluegreen", Err(StrategyError::Unsupported("bluegreen".to_string())))]
    #[case("yolo", Err(StrategyError::Unknown("yolo".to_string())))]
    fn test_parse(#[case] input: &str, #[case] expected: Result<Strategy, StrategyError>) {
        assert_eq!(input.parse::<Strategy>(), expected);
    }
}
