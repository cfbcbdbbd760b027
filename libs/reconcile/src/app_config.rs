//! Desired machine configuration per process group.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::model::{MachineConfig, Mount, METADATA_PROCESS_GROUP};

/// Source of desired machine configs.
///
/// Parsing the declarative app spec lives outside this crate; the builders
/// only need a config per group and the set of declared groups.
pub trait AppConfigResolver: Send + Sync {
    /// Derives the desired config for `group`.
    ///
    /// When `base` is given (an existing machine's config) the result is
    /// merged over it, so settings the app config does not manage survive.
    fn to_machine_config(
        &self,
        group: &str,
        base: Option<&MachineConfig>,
    ) -> Result<MachineConfig, ResolveError>;

    /// Declared process groups, in a stable order.
    fn process_names(&self) -> Vec<String>;

    /// Region new machines are launched in.
    fn primary_region(&self) -> &str;
}

/// App config held in memory, one template config per process group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticAppConfig {
    pub primary_region: String,
    pub processes: BTreeMap<String, MachineConfig>,
}

impl StaticAppConfig {
    pub fn new(primary_region: impl Into<String>) -> Self {
        Self {
            primary_region: primary_region.into(),
            processes: BTreeMap::new(),
        }
    }

    /// Declares a process group with its template config.
    #[must_use]
    pub fn with_process(mut self, group: impl Into<String>, template: MachineConfig) -> Self {
        self.processes.insert(group.into(), template);
        self
    }
}

impl AppConfigResolver for StaticAppConfig {
    fn to_machine_config(
        &self,
        group: &str,
        base: Option<&MachineConfig>,
    ) -> Result<MachineConfig, ResolveError> {
        let template = self
            .processes
            .get(group)
            .ok_or_else(|| ResolveError::UnknownProcessGroup(group.to_string()))?;

        let mut config = base.cloned().unwrap_or_default();

        if !template.image.is_empty() {
            config.image = template.image.clone();
        }
        if template.guest.is_some() {
            config.guest = template.guest.clone();
        }

        // The mount always follows the app config. Volumes are bound later.
        config.mount = match &template.mount {
            Some(mount) if mount.name.is_empty() => {
                return Err(ResolveError::Invalid {
                    group: group.to_string(),
                    message: format!("mount at '{}' has no volume name", mount.path),
                });
            }
            Some(mount) => Some(Mount::new(&mount.name, &mount.path)),
            None => None,
        };

        config.metadata.extend(template.metadata.clone());
        config
            .metadata
            .insert(METADATA_PROCESS_GROUP.to_string(), group.to_string());

        for (key, value) in &template.extra {
            config.extra.insert(key.clone(), value.clone());
        }

        Ok(config)
    }

    fn process_names(&self) -> Vec<String> {
        self.processes.keys().cloned().collect()
    }

    fn primary_region(&self) -> &str {
        &self.primary_region
    }
}
