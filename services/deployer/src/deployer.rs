//! Rollout orchestrator.
//!
//! A rollout runs one of two passes against a snapshot of the fleet:
//!
//! - **Restart pass**: re-stamp every machine with the new release metadata
//! - **Deploy pass**: run the release command, remove machines in undeclared
//!   process groups, create a machine for every empty group, then converge
//!   the remaining machines to the app config
//!
//! Both passes hold leases on the live machines for their whole duration and
//! release them on every exit path. Machines are touched one at a time; the
//! strategy decides whether a failed machine aborts the pass and whether the
//! pass waits for each machine to become healthy.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use fleet_id::MachineId;
use fleet_reconcile::{
    AppConfigResolver, Guest, LaunchContext, LaunchInputBuilder, Machine, MachinePlan,
    MachineState, ProcessGroupsDiff, VolumePool,
};
use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::{
    LeaseManager, MachineApi, ProgressSink, ReleaseCommandRunner, ReleaseStatus,
    ReleaseStatusStore,
};
use crate::config::DeployConfig;
use crate::error::{DeployError, DeployResult, WaitKind};
use crate::lease::LeaseRenewal;
use crate::shutdown::wait_for_shutdown;
use crate::strategy::FailurePolicy;

const PAYMENT_METHOD_ERROR: &str = "please add a payment method";

const RELEASE_COMMAND_MACHINE_HINT: &str = "Please note that release commands run in their own \
    ephemeral machine, and therefore count towards the machine limit.";

/// Systems a rollout drives.
#[derive(Clone)]
pub struct Collaborators {
    pub machines: Arc<dyn MachineApi>,
    pub leases: Arc<dyn LeaseManager>,
    pub release_command: Arc<dyn ReleaseCommandRunner>,
    pub releases: Arc<dyn ReleaseStatusStore>,
    pub app_config: Arc<dyn AppConfigResolver>,
    pub progress: Arc<dyn ProgressSink>,
}

/// What is being rolled out, and the fleet it is rolled out to.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub launch: LaunchContext,

    /// Guest override for machines created in new process groups.
    pub guest: Option<Guest>,

    /// Live machines, read once before the pass.
    pub machines: Vec<Machine>,

    /// Volumes available for new mounts, read once before the pass.
    pub volumes: VolumePool,
}

/// An existing machine and what to do with it.
struct UpdateEntry<'m> {
    machine: &'m Machine,
    plan: MachinePlan,
}

/// Drives one rollout.
pub struct Deployer {
    config: DeployConfig,
    clients: Collaborators,
    deployment: Deployment,
    shutdown: watch::Receiver<bool>,
}

impl Deployer {
    pub fn new(
        config: DeployConfig,
        clients: Collaborators,
        deployment: Deployment,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            clients,
            deployment,
            shutdown,
        }
    }

    /// Run the rollout and record its outcome on the release.
    pub async fn run(&self) -> DeployResult<()> {
        let release_id = &self.deployment.launch.release.release_id;
        info!(
            app = %self.deployment.launch.app,
            release_id = %release_id,
            release_version = %self.deployment.launch.release.release_version,
            strategy = %self.config.strategy,
            restart_only = self.config.restart_only,
            machine_count = self.deployment.machines.len(),
            "Starting rollout"
        );

        self.cancellable(
            self.clients
                .releases
                .set_status(release_id, ReleaseStatus::Running),
        )
        .await?
        .map_err(DeployError::ReleaseStatus)?;

        let result = if self.config.restart_only {
            self.restart_pass().await
        } else {
            self.deploy_pass().await
        };

        let status = if result.is_ok() {
            ReleaseStatus::Complete
        } else {
            ReleaseStatus::Failed
        };
        // Not cancellable: the release must not stay "running".
        let written = self.clients.releases.set_status(release_id, status).await;

        match (result, written) {
            (Ok(()), Ok(())) => {
                info!(release_id = %release_id, "Rollout complete");
                Ok(())
            }
            (Ok(()), Err(e)) => Err(DeployError::FinalReleaseStatus(e)),
            (Err(err), Ok(())) => {
                error!(release_id = %release_id, error = %err, "Rollout failed");
                Err(err)
            }
            (Err(err), Err(e)) => {
                warn!(
                    release_id = %release_id,
                    error = %e,
                    "Failed to set final release status after deployment failure"
                );
                Err(err)
            }
        }
    }

    /// Restart every machine with the new release metadata.
    async fn restart_pass(&self) -> DeployResult<()> {
        let machines = &self.deployment.machines;
        self.with_leases(machines, async {
            let builder = self.builder();
            let entries = machines
                .iter()
                .map(|machine| UpdateEntry {
                    machine,
                    plan: builder.for_restart(machine),
                })
                .collect();
            self.update_machines(entries).await
        })
        .await
    }

    /// Converge the fleet to the app config.
    async fn deploy_pass(&self) -> DeployResult<()> {
        self.cancellable(self.clients.release_command.run())
            .await?
            .map_err(DeployError::ReleaseCommand)?;

        self.with_leases(&self.deployment.machines, self.converge())
            .await
    }

    async fn converge(&self) -> DeployResult<()> {
        let machines = &self.deployment.machines;
        let diff = ProcessGroupsDiff::compute(machines, &self.clients.app_config.process_names());

        if let Some(summary) = diff.summary() {
            info!(
                machines_to_remove = diff.machines_to_remove.len(),
                groups_needing_machines = diff.groups_needing_machines.len(),
                "Process groups have changed"
            );
            for line in summary.lines() {
                self.progress(line);
            }
        }

        for machine in &diff.machines_to_remove {
            info!(
                machine_id = %machine.id,
                group = machine.process_group(),
                "Destroying machine in removed process group"
            );
            self.cancellable(self.clients.machines.destroy(machine, true))
                .await?
                .map_err(|source| DeployError::Destroy {
                    machine: machine.id.clone(),
                    source,
                })?;
        }

        if !diff.groups_needing_machines.is_empty() {
            let total = diff.groups_needing_machines.len();
            for (i, group) in diff.groups_needing_machines.iter().enumerate() {
                self.spawn_machine_in_group(group, i, total).await?;
            }
            self.progress("Finished launching new machines");
        }

        let builder = self.builder();
        let mut entries = Vec::new();
        for machine in diff.remaining(machines) {
            let built = builder
                .for_update(machine)
                .map_err(|source| DeployError::BuildPlan {
                    machine: machine.id.clone(),
                    source,
                })?;
            for warning in &built.warnings {
                warn!(machine_id = %machine.id, "{warning}");
                self.progress(&format!("WARNING {warning}"));
            }
            entries.push(UpdateEntry {
                machine,
                plan: built.plan,
            });
        }

        self.update_machines(entries).await
    }

    /// Create the first machine of an empty process group.
    ///
    /// Creation is never best-effort: any failure aborts the pass.
    async fn spawn_machine_in_group(
        &self,
        group: &str,
        i: usize,
        total: usize,
    ) -> DeployResult<()> {
        self.progress(&format!(
            "No machines in group '{group}', launching one new machine"
        ));

        let input = self
            .builder()
            .for_launch(group, self.deployment.guest.as_ref())
            .map_err(|source| DeployError::BuildLaunch {
                group: group.to_string(),
                source,
            })?;

        let machine = match self.cancellable(self.clients.machines.launch(&input)).await? {
            Ok(machine) => machine,
            Err(source) => {
                let hint = (self.clients.release_command.used_machine()
                    && format!("{source:#}").contains(PAYMENT_METHOD_ERROR))
                .then(|| RELEASE_COMMAND_MACHINE_HINT.to_string());
                return Err(DeployError::Create {
                    group: group.to_string(),
                    hint,
                    source,
                });
            }
        };

        let index = format_index(i, total);
        info!(machine_id = %machine.id, group, "Created machine");
        self.progress(&format!("  {index} Created machine {} in group '{group}'", machine.id));

        if self.config.strategy.is_health_gated() {
            self.wait_until_ready(&machine, &index).await?;
        }
        Ok(())
    }

    /// Apply plans to existing machines, one at a time.
    async fn update_machines(&self, entries: Vec<UpdateEntry<'_>>) -> DeployResult<()> {
        let strategy = self.config.strategy;
        self.progress(&format!(
            "Updating existing machines in '{}' with {strategy} strategy",
            self.deployment.launch.app
        ));

        let total = entries.len();
        for (i, entry) in entries.iter().enumerate() {
            let index = format_index(i, total);

            let machine = match self.apply_entry(entry, &index).await {
                Ok(machine) => machine,
                Err(DeployError::Cancelled) => return Err(DeployError::Cancelled),
                Err(e) => match strategy.failure_policy() {
                    FailurePolicy::FailFast => return Err(e),
                    FailurePolicy::BestEffort => {
                        warn!(
                            machine_id = %entry.machine.id,
                            error = %e,
                            "Continuing after error"
                        );
                        self.progress(&format!("Continuing after error: {e}"));
                        continue;
                    }
                },
            };

            if strategy.is_health_gated() {
                self.wait_until_ready(&machine, &index).await?;
            }
        }

        self.progress("  Finished deploying");
        Ok(())
    }

    /// Update a machine in place, or destroy it and launch its replacement.
    ///
    /// Returns the machine that is now running the new config.
    async fn apply_entry(&self, entry: &UpdateEntry<'_>, index: &str) -> DeployResult<Machine> {
        let machine = entry.machine;
        match &entry.plan {
            MachinePlan::Replace { input, .. } => {
                self.progress(&format!("  {index} Replacing {} by new machine", machine.id));
                self.cancellable(self.clients.machines.destroy(machine, true))
                    .await?
                    .map_err(|source| DeployError::Destroy {
                        machine: machine.id.clone(),
                        source,
                    })?;

                let created = self
                    .cancellable(self.clients.machines.launch(input))
                    .await?
                    .map_err(|source| DeployError::Launch {
                        replaces: machine.id.clone(),
                        source,
                    })?;
                info!(
                    machine_id = %created.id,
                    replaces = %machine.id,
                    "Replaced machine"
                );
                self.progress(&format!("  {index} Created machine {}", created.id));
                Ok(created)
            }
            MachinePlan::Update { input, .. } => {
                self.progress(&format!("  {index} Updating {}", machine.id));
                self.cancellable(self.clients.machines.update(machine, input))
                    .await?
                    .map_err(|source| DeployError::Update {
                        machine: machine.id.clone(),
                        source,
                    })?;
                debug!(machine_id = %machine.id, "Updated machine");
                Ok(machine.clone())
            }
        }
    }

    /// Wait for the machine to start and, unless skipped, pass health checks.
    async fn wait_until_ready(&self, machine: &Machine, index: &str) -> DeployResult<()> {
        self.cancellable(self.clients.machines.wait_for_state(
            machine,
            MachineState::Started,
            self.config.start_timeout,
        ))
        .await?
        .map_err(|source| DeployError::Wait {
            machine: machine.id.clone(),
            kind: WaitKind::Started,
            source,
        })?;

        if self.config.skip_health_checks {
            return Ok(());
        }

        self.cancellable(
            self.clients
                .machines
                .wait_for_healthchecks(machine, self.config.health_timeout),
        )
        .await?
        .map_err(|source| DeployError::Wait {
            machine: machine.id.clone(),
            kind: WaitKind::Healthy,
            source,
        })?;

        self.progress(&format!(
            "  {index} Machine {} update finished: success",
            machine.id
        ));
        Ok(())
    }

    /// Run `body` while holding leases on `machines`.
    ///
    /// Leases are renewed in the background and released once `body`
    /// finishes, whether it succeeds, fails, is cancelled or panics.
    async fn with_leases<F>(&self, machines: &[Machine], body: F) -> DeployResult<()>
    where
        F: Future<Output = DeployResult<()>>,
    {
        let ids: Vec<MachineId> = machines.iter().map(|m| m.id.clone()).collect();
        let ttl = self.config.lease_ttl;

        self.cancellable(self.clients.leases.acquire(&ids, ttl))
            .await?
            .map_err(DeployError::LeaseAcquisition)?;
        info!(machine_count = ids.len(), ttl_secs = ttl.as_secs(), "Acquired leases");

        let renewal = LeaseRenewal::spawn(
            Arc::clone(&self.clients.leases),
            ids.clone(),
            ttl,
            self.config.lease_renew_interval,
            self.shutdown.clone(),
        );

        let outcome = AssertUnwindSafe(body).catch_unwind().await;

        renewal.stop().await;
        match self.clients.leases.release(&ids).await {
            Ok(()) => debug!(machine_count = ids.len(), "Released leases"),
            Err(e) => warn!(error = %e, "Failed to release leases"),
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Race `fut` against the shutdown signal.
    async fn cancellable<T>(&self, fut: impl Future<Output = T>) -> DeployResult<T> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("Rollout cancelled");
                Err(DeployError::Cancelled)
            }
            out = fut => Ok(out),
        }
    }

    fn builder(&self) -> LaunchInputBuilder<'_> {
        LaunchInputBuilder::new(
            &self.deployment.launch,
            &self.deployment.volumes,
            self.clients.app_config.as_ref(),
        )
    }

    fn progress(&self, line: &str) {
        self.clients.progress.line(line);
    }
}

/// Progress index such as `[01/10]`, padded to the width of `total`.
pub fn format_index(n: usize, total: usize) -> String {
    let width = total.to_string().len();
    format!("[{:0width$}/{total}]", n + 1)
}
