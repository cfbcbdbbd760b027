//! Error types for launch input building.

use thiserror::Error;

/// Errors that can occur when deriving a machine config from the app config.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The app config does not declare this process group.
    #[error("process group '{0}' is not declared in the app config")]
    UnknownProcessGroup(String),

    /// The app config declares the group but its settings are unusable.
    #[error("invalid config for process group '{group}': {message}")]
    Invalid { group: String, message: String },
}

/// Errors that can occur when building a launch input.
///
/// All of these indicate a configuration mismatch the user has to fix, so
/// callers abort the pass instead of retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// No unattached volume with the required name exists.
    #[error("machine in group '{group}' needs an unattached volume named '{volume_name}'")]
    VolumeUnavailable { group: String, volume_name: String },

    /// A machine was requested for a group without a name.
    #[error("cannot launch a machine for an empty process group name")]
    EmptyProcessGroup,

    /// The app config could not produce a machine config.
    #[error("failed to derive machine config for group '{group}'")]
    Resolve {
        group: String,
        #[source]
        source: ResolveError,
    },
}

impl BuildError {
    /// Returns true if the error asks the user to provision a volume.
    pub fn is_volume_unavailable(&self) -> bool {
        matches!(self, BuildError::VolumeUnavailable { .. })
    }
}
