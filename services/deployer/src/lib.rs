//! Fleet Deployer Library
//!
//! Rolls a new release out to an app's fleet of machines. The deployer reads
//! a snapshot of the fleet, decides what to do with `fleet-reconcile`, and
//! executes those decisions through collaborator traits.
//!
//! ## Flow
//!
//! ```text
//! release status "running"
//! ├── restart pass  (re-stamp every machine)
//! └── deploy pass
//!     ├── release command
//!     ├── leases (renewed in the background)
//!     ├── destroy machines in removed process groups
//!     ├── create a machine for every empty process group
//!     └── update or replace remaining machines
//! release status "complete" | "failed"
//! ```
//!
//! ## Modules
//!
//! - `client`: collaborator traits for the remote systems a rollout drives
//! - `config`: environment configuration
//! - `deployer`: the orchestrator
//! - `lease`: background lease renewal
//! - `plan`: dry-run planning
//! - `shutdown`: shutdown signal helpers
//! - `strategy`: rollout strategies and failure policies

pub mod client;
pub mod config;
pub mod deployer;
pub mod error;
pub mod lease;
pub mod plan;
pub mod shutdown;
pub mod strategy;

pub use client::{
    LeaseManager, MachineApi, NoReleaseCommand, ProgressSink, ReleaseCommandRunner, ReleaseStatus,
    ReleaseStatusStore, TracingProgress,
};
pub use config::DeployConfig;
pub use deployer::{format_index, Collaborators, Deployer, Deployment};
pub use error::{DeployError, DeployResult, WaitKind};
pub use plan::{PlanRow, RolloutPlan};
pub use strategy::{FailurePolicy, Strategy, StrategyError};
