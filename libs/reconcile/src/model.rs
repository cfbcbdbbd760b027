//! Snapshot and plan types shared by the builders, the differ and the deployer.

use std::collections::BTreeMap;

use fleet_id::{MachineId, VolumeId};
use serde::{Deserialize, Serialize};

/// Metadata key holding the release ID a machine was last deployed with.
pub const METADATA_RELEASE_ID: &str = "fly_release_id";

/// Metadata key holding the release version a machine was last deployed with.
pub const METADATA_RELEASE_VERSION: &str = "fly_release_version";

/// Metadata key holding the platform generation of a machine.
pub const METADATA_PLATFORM_VERSION: &str = "fly_platform_version";

/// Metadata key holding the process group a machine belongs to.
pub const METADATA_PROCESS_GROUP: &str = "fly_process_group";

/// Metadata key marking machines of a managed Postgres app.
pub const METADATA_MANAGED_POSTGRES: &str = "fly-managed-postgres";

/// Platform generation stamped onto machines that do not declare one.
pub const DEFAULT_PLATFORM_VERSION: &str = "v2";

/// Process group used when a machine or config does not name one.
pub const DEFAULT_PROCESS_GROUP: &str = "app";

/// Guest resources for a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub cpu_kind: String,
    pub cpus: u32,
    pub memory_mb: u32,
}

/// A single volume attachment.
///
/// Mounts derived from the app config carry no volume yet; the builder
/// assigns one from the volume pool or from the machine's existing mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Volume name. Empty when the control plane did not report it.
    #[serde(default)]
    pub name: String,

    /// Path inside the guest.
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeId>,
}

impl Mount {
    /// Creates a mount that has not been bound to a volume.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            volume: None,
        }
    }

    /// Binds the mount to a volume.
    #[must_use]
    pub fn with_volume(mut self, volume: VolumeId) -> Self {
        self.volume = Some(volume);
        self
    }
}

/// Target configuration of a machine.
///
/// Only the fields the rollout engine reasons about are typed; everything
/// else the control plane returns is kept in `extra` and sent back as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default)]
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest: Option<Guest>,

    /// At most one mount per machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount: Option<Mount>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MachineConfig {
    /// Returns the process group this config belongs to.
    ///
    /// Missing or empty group metadata resolves to [`DEFAULT_PROCESS_GROUP`].
    pub fn process_group(&self) -> &str {
        self.metadata
            .get(METADATA_PROCESS_GROUP)
            .map(String::as_str)
            .filter(|group| !group.is_empty())
            .unwrap_or(DEFAULT_PROCESS_GROUP)
    }
}

/// Machine lifecycle state as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
    Replacing,
    Destroying,
    Destroyed,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Replacing => "replacing",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Last known remote state of a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub region: String,
    #[serde(default = "default_state")]
    pub state: MachineState,
    pub config: MachineConfig,
}

fn default_state() -> MachineState {
    MachineState::Unknown
}

impl Machine {
    pub fn process_group(&self) -> &str {
        self.config.process_group()
    }
}

/// A volume as listed by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_machine_id: Option<MachineId>,
}

impl Volume {
    pub fn is_attached(&self) -> bool {
        self.attached_machine_id.is_some()
    }
}

/// Unattached volumes grouped by name, in listing order.
///
/// The pool is a read-only snapshot: looking up the same name twice returns
/// the same volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumePool {
    by_name: BTreeMap<String, Vec<Volume>>,
}

impl VolumePool {
    /// Builds a pool from a volume listing, keeping only unattached volumes.
    pub fn from_volumes<I>(volumes: I) -> Self
    where
        I: IntoIterator<Item = Volume>,
    {
        let mut by_name: BTreeMap<String, Vec<Volume>> = BTreeMap::new();
        for volume in volumes.into_iter().filter(|v| !v.is_attached()) {
            by_name.entry(volume.name.clone()).or_default().push(volume);
        }
        Self { by_name }
    }

    /// Returns the first unattached volume with the given name.
    pub fn first_unattached(&self, name: &str) -> Option<&Volume> {
        self.by_name.get(name).and_then(|volumes| volumes.first())
    }

    /// Number of unattached volumes with the given name.
    pub fn available(&self, name: &str) -> usize {
        self.by_name.get(name).map_or(0, Vec::len)
    }
}

/// Everything the control plane needs to create or update a machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchInput {
    pub app: String,
    pub org_slug: String,
    pub region: String,
    pub config: MachineConfig,
}

/// Decision for an existing machine.
#[derive(Debug, Clone, PartialEq)]
pub enum MachinePlan {
    /// Update the machine in place.
    Update { id: MachineId, input: LaunchInput },

    /// Destroy the machine and launch a new one from `input`.
    Replace { replaces: MachineId, input: LaunchInput },
}

impl MachinePlan {
    pub fn input(&self) -> &LaunchInput {
        match self {
            Self::Update { input, .. } | Self::Replace { input, .. } => input,
        }
    }

    /// ID of the live machine this plan acts on.
    pub fn machine_id(&self) -> &MachineId {
        match self {
            Self::Update { id, .. } => id,
            Self::Replace { replaces, .. } => replaces,
        }
    }

    pub fn is_replace(&self) -> bool {
        matches!(self, Self::Replace { .. })
    }
}
