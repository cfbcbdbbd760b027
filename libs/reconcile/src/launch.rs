//! Launch input builder.
//!
//! Computes the exact config a machine should run with for the three kinds
//! of work a rollout does:
//!
//! - **Restart**: re-stamp an existing machine's config, nothing else changes
//! - **Launch**: create a fresh machine for a process group
//! - **Update**: converge an existing machine, replacing it when its volume
//!   attachment cannot be changed in place
//!
//! # Mount reconciliation
//!
//! A volume attached to a live machine cannot be swapped for another one;
//! only its mount path can change in place. Adding, removing or swapping a
//! volume therefore forces the machine to be replaced.

use fleet_id::{MachineId, VolumeId};

use crate::app_config::AppConfigResolver;
use crate::error::BuildError;
use crate::model::{Guest, LaunchInput, Machine, MachineConfig, MachinePlan, Mount, VolumePool};
use crate::stamp::ReleaseMetadata;

/// Per-deployment inputs shared by every launch input.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub app: String,
    pub org_slug: String,
    pub image: String,
    pub release: ReleaseMetadata,
}

/// Something the user should know about a planned change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildWarning {
    /// The machine has a volume but the app config no longer declares a mount.
    MountRemoved {
        machine: MachineId,
        volume: Option<VolumeId>,
    },

    /// The machine has a different volume attached than the app config names.
    VolumeSwap {
        machine: MachineId,
        attached: String,
        desired: String,
    },

    /// Same volume, new mount path.
    MountPathChanged {
        machine: MachineId,
        volume: Option<VolumeId>,
        from: String,
        to: String,
    },
}

impl std::fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MountRemoved { machine, volume } => write!(
                f,
                "machine {machine} has volume {} attached but the app config has no mount; \
                 it will be replaced",
                volume.as_ref().map_or("(unknown)", VolumeId::as_str)
            ),
            Self::VolumeSwap {
                machine,
                attached,
                desired,
            } => write!(
                f,
                "machine {machine} has volume '{attached}' attached but the app config \
                 names '{desired}'; it will be replaced"
            ),
            Self::MountPathChanged {
                machine,
                volume,
                from,
                to,
            } => write!(
                f,
                "updating the mount path for volume {} on machine {machine} from {from} to {to}",
                volume.as_ref().map_or("(unknown)", VolumeId::as_str)
            ),
        }
    }
}

/// An update or restart decision plus the warnings it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPlan {
    pub plan: MachinePlan,
    pub warnings: Vec<BuildWarning>,
}

/// Builds launch inputs against one snapshot of the fleet.
pub struct LaunchInputBuilder<'a> {
    ctx: &'a LaunchContext,
    volumes: &'a VolumePool,
    app_config: &'a dyn AppConfigResolver,
}

impl<'a> LaunchInputBuilder<'a> {
    pub fn new(
        ctx: &'a LaunchContext,
        volumes: &'a VolumePool,
        app_config: &'a dyn AppConfigResolver,
    ) -> Self {
        Self {
            ctx,
            volumes,
            app_config,
        }
    }

    /// Plan for restarting `machine` with its current config.
    ///
    /// Mounts are left untouched, so this never fails.
    pub fn for_restart(&self, machine: &Machine) -> MachinePlan {
        let mut config = machine.config.clone();
        self.ctx.release.stamp(&mut config);

        MachinePlan::Update {
            id: machine.id.clone(),
            input: self.input(&machine.region, config),
        }
    }

    /// Input for a new machine in `group`.
    pub fn for_launch(
        &self,
        group: &str,
        guest: Option<&Guest>,
    ) -> Result<LaunchInput, BuildError> {
        if group.is_empty() {
            return Err(BuildError::EmptyProcessGroup);
        }

        let mut config = self
            .app_config
            .to_machine_config(group, None)
            .map_err(|source| BuildError::Resolve {
                group: group.to_string(),
                source,
            })?;
        if let Some(guest) = guest {
            config.guest = Some(guest.clone());
        }
        config.image = self.ctx.image.clone();
        self.ctx.release.stamp(&mut config);

        let group = config.process_group().to_string();
        if let Some(mount) = config.mount.take() {
            config.mount = Some(self.bind_volume(&group, mount)?);
        }

        Ok(self.input(self.app_config.primary_region(), config))
    }

    /// Plan for converging `machine` to the app config.
    pub fn for_update(&self, machine: &Machine) -> Result<BuiltPlan, BuildError> {
        let group = machine.process_group();
        let mut config = self
            .app_config
            .to_machine_config(group, Some(&machine.config))
            .map_err(|source| BuildError::Resolve {
                group: group.to_string(),
                source,
            })?;
        config.image = self.ctx.image.clone();
        self.ctx.release.stamp(&mut config);

        let group = config.process_group().to_string();
        let outcome = self.reconcile_mount(
            &machine.id,
            &group,
            machine.config.mount.as_ref(),
            config.mount.take(),
        )?;
        config.mount = outcome.mount;

        let input = self.input(&machine.region, config);
        let plan = if outcome.replace {
            MachinePlan::Replace {
                replaces: machine.id.clone(),
                input,
            }
        } else {
            MachinePlan::Update {
                id: machine.id.clone(),
                input,
            }
        };

        Ok(BuiltPlan {
            plan,
            warnings: outcome.warning.into_iter().collect(),
        })
    }

    fn reconcile_mount(
        &self,
        machine: &MachineId,
        group: &str,
        existing: Option<&Mount>,
        desired: Option<Mount>,
    ) -> Result<MountOutcome, BuildError> {
        let outcome = match (existing, desired) {
            (None, None) => MountOutcome::keep(None),

            (Some(existing), None) => MountOutcome {
                mount: None,
                replace: true,
                warning: Some(BuildWarning::MountRemoved {
                    machine: machine.clone(),
                    volume: existing.volume.clone(),
                }),
            },

            // The attached volume's name is unknown, so whether it matches
            // the desired mount cannot be checked. Keep what is attached.
            // This is an approximation: a materially different desired mount
            // is ignored.
            (Some(existing), Some(_)) if existing.name.is_empty() => {
                MountOutcome::keep(Some(existing.clone()))
            }

            (Some(existing), Some(desired)) if desired.name != existing.name => {
                let warning = BuildWarning::VolumeSwap {
                    machine: machine.clone(),
                    attached: existing.name.clone(),
                    desired: desired.name.clone(),
                };
                MountOutcome {
                    mount: Some(self.bind_volume(group, desired)?),
                    replace: true,
                    warning: Some(warning),
                }
            }

            (Some(existing), Some(mut desired)) if desired.path != existing.path => {
                desired.volume = existing.volume.clone();
                MountOutcome {
                    warning: Some(BuildWarning::MountPathChanged {
                        machine: machine.clone(),
                        volume: existing.volume.clone(),
                        from: existing.path.clone(),
                        to: desired.path.clone(),
                    }),
                    mount: Some(desired),
                    replace: false,
                }
            }

            (Some(existing), Some(_)) => MountOutcome::keep(Some(existing.clone())),

            (None, Some(desired)) => MountOutcome {
                mount: Some(self.bind_volume(group, desired)?),
                replace: true,
                warning: None,
            },
        };

        Ok(outcome)
    }

    fn bind_volume(&self, group: &str, mount: Mount) -> Result<Mount, BuildError> {
        let volume = self.volumes.first_unattached(&mount.name).ok_or_else(|| {
            BuildError::VolumeUnavailable {
                group: group.to_string(),
                volume_name: mount.name.clone(),
            }
        })?;
        Ok(mount.with_volume(volume.id.clone()))
    }

    fn input(&self, region: &str, config: MachineConfig) -> LaunchInput {
        LaunchInput {
            app: self.ctx.app.clone(),
            org_slug: self.ctx.org_slug.clone(),
            region: region.to_string(),
            config,
        }
    }
}

struct MountOutcome {
    mount: Option<Mount>,
    replace: bool,
    warning: Option<BuildWarning>,
}

impl MountOutcome {
    fn keep(mount: Option<Mount>) -> Self {
        Self {
            mount,
            replace: false,
            warning: None,
        }
    }
}
