//! Snapshot fixtures.

use fleet_deployer::Deployment;
use fleet_id::{MachineId, ReleaseId, ReleaseVersion, VolumeId};
use fleet_reconcile::model::METADATA_PROCESS_GROUP;
use fleet_reconcile::{
    LaunchContext, Machine, MachineConfig, MachineState, Mount, ReleaseMetadata, Volume,
    VolumePool,
};

/// A started machine in `group` with no mount.
pub fn machine(id: &str, group: &str) -> Machine {
    let mut config = MachineConfig {
        image: "registry.example.com/demo:v1".to_string(),
        ..Default::default()
    };
    config
        .metadata
        .insert(METADATA_PROCESS_GROUP.to_string(), group.to_string());

    Machine {
        id: MachineId::parse(id).unwrap_or_else(|e| panic!("bad machine id {id}: {e}")),
        region: "ord".to_string(),
        state: MachineState::Started,
        config,
    }
}

/// A started machine in `group` with `volume` mounted as `name` at `path`.
pub fn machine_with_mount(id: &str, group: &str, name: &str, path: &str, volume: &str) -> Machine {
    let mut machine = machine(id, group);
    machine.config.mount = Some(Mount::new(name, path).with_volume(volume_id(volume)));
    machine
}

/// An unattached volume.
pub fn volume(id: &str, name: &str) -> Volume {
    Volume {
        id: volume_id(id),
        name: name.to_string(),
        attached_machine_id: None,
    }
}

pub fn release() -> ReleaseMetadata {
    ReleaseMetadata::new(
        ReleaseId::parse("rel_2").unwrap_or_else(|e| panic!("bad release id: {e}")),
        ReleaseVersion::new(2),
    )
}

/// A deployment of `registry.example.com/demo:v2` to `machines`.
pub fn deployment(machines: Vec<Machine>, volumes: Vec<Volume>) -> Deployment {
    Deployment {
        launch: LaunchContext {
            app: "demo".to_string(),
            org_slug: "personal".to_string(),
            image: "registry.example.com/demo:v2".to_string(),
            release: release(),
        },
        guest: None,
        machines,
        volumes: VolumePool::from_volumes(volumes),
    }
}

fn volume_id(id: &str) -> VolumeId {
    VolumeId::parse(id).unwrap_or_else(|e| panic!("bad volume id {id}: {e}"))
}
