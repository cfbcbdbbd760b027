//! Release metadata stamped onto every machine a deployment touches.

use fleet_id::{ReleaseId, ReleaseVersion};

use crate::model::{
    MachineConfig, DEFAULT_PLATFORM_VERSION, DEFAULT_PROCESS_GROUP, METADATA_MANAGED_POSTGRES,
    METADATA_PLATFORM_VERSION, METADATA_PROCESS_GROUP, METADATA_RELEASE_ID,
    METADATA_RELEASE_VERSION,
};

/// Identity of the release being rolled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseMetadata {
    pub release_id: ReleaseId,
    pub release_version: ReleaseVersion,

    /// Whether the owning app is a managed Postgres cluster.
    pub managed_postgres: bool,
}

impl ReleaseMetadata {
    pub fn new(release_id: ReleaseId, release_version: ReleaseVersion) -> Self {
        Self {
            release_id,
            release_version,
            managed_postgres: false,
        }
    }

    #[must_use]
    pub fn managed_postgres(mut self, managed_postgres: bool) -> Self {
        self.managed_postgres = managed_postgres;
        self
    }

    /// Stamps release metadata into `config`.
    ///
    /// Release ID and version are always overwritten. Platform version and
    /// process group are only filled in when missing, since machines created
    /// before those keys existed may lack them. The managed Postgres marker
    /// is set or removed every time.
    pub fn stamp(&self, config: &mut MachineConfig) {
        let metadata = &mut config.metadata;

        metadata.insert(
            METADATA_RELEASE_ID.to_string(),
            self.release_id.to_string(),
        );
        metadata.insert(
            METADATA_RELEASE_VERSION.to_string(),
            self.release_version.to_string(),
        );

        metadata
            .entry(METADATA_PLATFORM_VERSION.to_string())
            .or_insert_with(|| DEFAULT_PLATFORM_VERSION.to_string());
        metadata
            .entry(METADATA_PROCESS_GROUP.to_string())
            .or_insert_with(|| DEFAULT_PROCESS_GROUP.to_string());

        if self.managed_postgres {
            metadata.insert(METADATA_MANAGED_POSTGRES.to_string(), "true".to_string());
        } else {
            metadata.remove(METADATA_MANAGED_POSTGRES);
        }
    }
}
