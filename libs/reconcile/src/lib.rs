//! Rollout decision primitives.
//!
//! This library decides what a rollout has to do to converge a fleet of
//! machines to the app config. It never talks to the control plane; the
//! deployer executes the decisions. Key concepts:
//!
//! - **Snapshot**: live machines and volumes, read once per pass.
//! - **Stamping**: release metadata written into every config a pass touches.
//! - **Machine plan**: update a machine in place, or replace it when its
//!   volume attachment must change.
//! - **Process group diff**: which machines to remove and which groups need
//!   a first machine.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same snapshot
//! - A machine has at most one mount
//! - A plan never reassigns the volume of a machine it updates in place

pub mod app_config;
pub mod diff;
pub mod error;
pub mod launch;
pub mod model;
pub mod stamp;

pub use app_config::{AppConfigResolver, StaticAppConfig};
pub use diff::ProcessGroupsDiff;
pub use error::{BuildError, ResolveError};
pub use launch::{BuildWarning, BuiltPlan, LaunchContext, LaunchInputBuilder};
pub use model::{
    Guest, LaunchInput, Machine, MachineConfig, MachinePlan, MachineState, Mount, Volume,
    VolumePool,
};
pub use stamp::ReleaseMetadata;
