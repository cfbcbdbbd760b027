//! Interfaces to the systems a rollout drives.
//!
//! The deployer only sequences calls; every remote operation goes through
//! one of these traits:
//! - `MachineApi`: create/update/destroy machines and wait on them
//! - `LeaseManager`: per-machine mutual exclusion
//! - `ReleaseCommandRunner`: one-off command run before a deploy
//! - `ReleaseStatusStore`: release lifecycle persistence
//! - `ProgressSink`: human-readable progress output

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use fleet_id::{MachineId, ReleaseId};
use fleet_reconcile::{LaunchInput, Machine, MachineState};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Machine control plane.
#[async_trait]
pub trait MachineApi: Send + Sync {
    /// Create a machine and return its initial state.
    async fn launch(&self, input: &LaunchInput) -> Result<Machine>;

    /// Update a machine in place.
    async fn update(&self, machine: &Machine, input: &LaunchInput) -> Result<()>;

    /// Destroy a machine. `force` destroys it even if it is running.
    async fn destroy(&self, machine: &Machine, force: bool) -> Result<()>;

    /// Wait until the machine reaches `state`.
    async fn wait_for_state(
        &self,
        machine: &Machine,
        state: MachineState,
        timeout: Duration,
    ) -> Result<()>;

    /// Wait until all of the machine's health checks pass.
    async fn wait_for_healthchecks(&self, machine: &Machine, timeout: Duration) -> Result<()>;
}

/// Lease manager.
///
/// Acquiring a lease the caller already holds extends it, which is how
/// background renewal works.
#[async_trait]
pub trait LeaseManager: Send + Sync {
    async fn acquire(&self, machines: &[MachineId], ttl: Duration) -> Result<()>;

    async fn release(&self, machines: &[MachineId]) -> Result<()>;
}

/// Runs the app's release command before machines are touched.
#[async_trait]
pub trait ReleaseCommandRunner: Send + Sync {
    async fn run(&self) -> Result<()>;

    /// Whether the last run used an ephemeral machine.
    ///
    /// Such machines count towards the org's machine limit.
    fn used_machine(&self) -> bool {
        false
    }
}

/// Release command runner for apps without a release command.
pub struct NoReleaseCommand;

#[async_trait]
impl ReleaseCommandRunner for NoReleaseCommand {
    async fn run(&self) -> Result<()> {
        Ok(())
    }
}

/// Release lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    Running,
    Complete,
    Failed,
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persists release status transitions.
#[async_trait]
pub trait ReleaseStatusStore: Send + Sync {
    async fn set_status(&self, release: &ReleaseId, status: ReleaseStatus) -> Result<()>;
}

/// Receives progress lines meant for the person running the deploy.
pub trait ProgressSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Progress sink that forwards lines to the tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn line(&self, line: &str) {
        info!(target: "fleet_deployer::progress", "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_status_serialization() {
        let json = serde_json::to_string(&ReleaseStatus::Complete).unwrap();
        assert_eq!(json, "\"complete\"");
        assert_eq!(ReleaseStatus::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn test_no_release_command() {
        let runner = NoReleaseCommand;
        assert!(runner.run().await.is_ok());
        assert!(!runner.used_machine());
    }
}
