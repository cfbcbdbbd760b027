//! Dry-run planning.
//!
//! Computes everything a deploy or restart pass would do against a snapshot,
//! without touching any remote system. Build errors fail the plan exactly as
//! they would fail the pass.

use fleet_id::MachineId;
use fleet_reconcile::{
    AppConfigResolver, BuildWarning, LaunchInput, LaunchInputBuilder, MachinePlan, Mount,
    ProcessGroupsDiff,
};
use serde::Serialize;
use tabled::Tabled;

use crate::deployer::Deployment;
use crate::error::{DeployError, DeployResult};

/// A machine the pass would create for an empty process group.
#[derive(Debug, Clone)]
pub struct PlannedLaunch {
    pub group: String,
    pub input: LaunchInput,
}

/// What the pass would do to an existing machine.
#[derive(Debug, Clone)]
pub struct PlannedUpdate {
    pub group: String,
    pub plan: MachinePlan,
    pub warnings: Vec<BuildWarning>,
}

/// Full dry-run result.
#[derive(Debug, Clone)]
pub struct RolloutPlan {
    pub diff: ProcessGroupsDiff,
    pub launches: Vec<PlannedLaunch>,
    pub updates: Vec<PlannedUpdate>,
}

/// One table row per machine the pass touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct PlanRow {
    #[tabled(rename = "MACHINE")]
    pub machine: String,
    #[tabled(rename = "GROUP")]
    pub group: String,
    #[tabled(rename = "ACTION")]
    pub action: String,
    #[tabled(rename = "REGION")]
    pub region: String,
    #[tabled(rename = "MOUNT")]
    pub mount: String,
}

impl RolloutPlan {
    /// Plan a restart pass: every machine is updated in place.
    pub fn restart(deployment: &Deployment, app_config: &dyn AppConfigResolver) -> Self {
        let builder = builder(deployment, app_config);
        let updates = deployment
            .machines
            .iter()
            .map(|machine| PlannedUpdate {
                group: machine.process_group().to_string(),
                plan: builder.for_restart(machine),
                warnings: Vec::new(),
            })
            .collect();

        Self {
            diff: ProcessGroupsDiff::default(),
            launches: Vec::new(),
            updates,
        }
    }

    /// Plan a deploy pass.
    pub fn deploy(
        deployment: &Deployment,
        app_config: &dyn AppConfigResolver,
    ) -> DeployResult<Self> {
        let builder = builder(deployment, app_config);
        let diff = ProcessGroupsDiff::compute(&deployment.machines, &app_config.process_names());

        let launches = diff
            .groups_needing_machines
            .iter()
            .map(|group| {
                builder
                    .for_launch(group, deployment.guest.as_ref())
                    .map(|input| PlannedLaunch {
                        group: group.clone(),
                        input,
                    })
                    .map_err(|source| DeployError::BuildLaunch {
                        group: group.clone(),
                        source,
                    })
            })
            .collect::<DeployResult<Vec<_>>>()?;

        let updates = diff
            .remaining(&deployment.machines)
            .into_iter()
            .map(|machine| {
                builder
                    .for_update(machine)
                    .map(|built| PlannedUpdate {
                        group: machine.process_group().to_string(),
                        plan: built.plan,
                        warnings: built.warnings,
                    })
                    .map_err(|source| DeployError::BuildPlan {
                        machine: machine.id.clone(),
                        source,
                    })
            })
            .collect::<DeployResult<Vec<_>>>()?;

        Ok(Self {
            diff,
            launches,
            updates,
        })
    }

    pub fn warnings(&self) -> impl Iterator<Item = &BuildWarning> {
        self.updates.iter().flat_map(|u| u.warnings.iter())
    }

    /// Machines that would be destroyed and not replaced.
    pub fn removals(&self) -> impl Iterator<Item = &MachineId> {
        self.diff.machines_to_remove.iter().map(|m| &m.id)
    }

    pub fn replacement_count(&self) -> usize {
        self.updates.iter().filter(|u| u.plan.is_replace()).count()
    }

    pub fn rows(&self) -> Vec<PlanRow> {
        let removed = self.diff.machines_to_remove.iter().map(|machine| PlanRow {
            machine: machine.id.to_string(),
            group: machine.process_group().to_string(),
            action: "destroy".to_string(),
            region: machine.region.clone(),
            mount: describe_mount(machine.config.mount.as_ref()),
        });

        let launched = self.launches.iter().map(|launch| PlanRow {
            machine: "(new)".to_string(),
            group: launch.group.clone(),
            action: "create".to_string(),
            region: launch.input.region.clone(),
            mount: describe_mount(launch.input.config.mount.as_ref()),
        });

        let updated = self.updates.iter().map(|update| {
            let input = update.plan.input();
            let action = match &update.plan {
                MachinePlan::Update { .. } => "update",
                MachinePlan::Replace { .. } => "replace",
            };
            PlanRow {
                machine: update.plan.machine_id().to_string(),
                group: update.group.clone(),
                action: action.to_string(),
                region: input.region.clone(),
                mount: describe_mount(input.config.mount.as_ref()),
            }
        });

        removed.chain(launched).chain(updated).collect()
    }
}

fn builder<'a>(
    deployment: &'a Deployment,
    app_config: &'a dyn AppConfigResolver,
) -> LaunchInputBuilder<'a> {
    LaunchInputBuilder::new(&deployment.launch, &deployment.volumes, app_config)
}

fn describe_mount(mount: Option<&Mount>) -> String {
    match mount {
        None => "-".to_string(),
        Some(mount) => match &mount.volume {
            Some(volume) => format!("{}:{} ({volume})", mount.name, mount.path),
            None => format!("{}:{}", mount.name, mount.path),
        },
    }
}
