//! Error types for rollouts.

use fleet_id::MachineId;
use fleet_reconcile::BuildError;
use thiserror::Error;

/// Which wait timed out or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKind {
    Started,
    Healthy,
}

impl std::fmt::Display for WaitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => f.write_str("started"),
            Self::Healthy => f.write_str("healthy"),
        }
    }
}

/// Errors that abort a rollout.
///
/// Every variant names the phase that failed.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to set release status to 'running'")]
    ReleaseStatus(#[source] anyhow::Error),

    #[error("failed to set final release status")]
    FinalReleaseStatus(#[source] anyhow::Error),

    #[error("release command failed - aborting deployment")]
    ReleaseCommand(#[source] anyhow::Error),

    #[error("failed to acquire leases")]
    LeaseAcquisition(#[source] anyhow::Error),

    #[error("failed to destroy machine {machine}")]
    Destroy {
        machine: MachineId,
        #[source]
        source: anyhow::Error,
    },

    /// A machine for a new process group could not be created.
    ///
    /// `hint` is appended to the message when there is something the user
    /// can do about it.
    #[error("error creating a new machine in group '{group}'{}", hint_suffix(.hint))]
    Create {
        group: String,
        hint: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    /// The replacement for an existing machine could not be launched.
    #[error("failed to launch replacement for machine {replaces}")]
    Launch {
        replaces: MachineId,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to update machine {machine}")]
    Update {
        machine: MachineId,
        #[source]
        source: anyhow::Error,
    },

    #[error("machine {machine} did not become {kind}")]
    Wait {
        machine: MachineId,
        kind: WaitKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to update machine configuration for {machine}")]
    BuildPlan {
        machine: MachineId,
        #[source]
        source: BuildError,
    },

    #[error("error creating machine configuration for group '{group}'")]
    BuildLaunch {
        group: String,
        #[source]
        source: BuildError,
    },

    #[error("deployment cancelled")]
    Cancelled,
}

impl DeployError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeployError::Cancelled)
    }

    /// Returns the build error if the pass failed on a config mismatch.
    pub fn build_error(&self) -> Option<&BuildError> {
        match self {
            DeployError::BuildPlan { source, .. } | DeployError::BuildLaunch { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

fn hint_suffix(hint: &Option<String>) -> String {
    hint.as_deref().map(|h| format!("\n{h}")).unwrap_or_default()
}

/// Result type for rollout operations.
pub type DeployResult<T> = Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_error_carries_hint() {
        let err = DeployError::Create {
            group: "web".to_string(),
            hint: Some("add a payment method".to_string()),
            source: anyhow::anyhow!("limit reached"),
        };
        assert_eq!(
            err.to_string(),
            "error creating a new machine in group 'web'\nadd a payment method"
        );

        let err = DeployError::Create {
            group: "web".to_string(),
            hint: None,
            source: anyhow::anyhow!("limit reached"),
        };
        assert_eq!(err.to_string(), "error creating a new machine in group 'web'");
    }

    #[test]
    fn test_build_error_is_exposed() {
        let err = DeployError::BuildLaunch {
            group: "db".to_string(),
            source: BuildError::VolumeUnavailable {
                group: "db".to_string(),
                volume_name: "pg_data".to_string(),
            },
        };
        assert!(err.build_error().is_some_and(BuildError::is_volume_unavailable));
        assert!(!err.is_cancelled());
        assert!(DeployError::Cancelled.build_error().is_none());
    }

    #[test]
    fn test_wait_kind_display() {
        let err = DeployError::Wait {
            machine: MachineId::parse("m1").unwrap(),
            kind: WaitKind::Healthy,
            source: anyhow::anyhow!("timeout"),
        };
        assert_eq!(err.to_string(), "machine m1 did not become healthy");
    }
}
