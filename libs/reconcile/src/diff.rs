//! Process group differ.
//!
//! Staffing is binary per group: a declared group with at least one live
//! machine is left alone, however many machines it has. Only groups with no
//! machines get one, and only machines in undeclared groups are removed.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use fleet_id::MachineId;

use crate::model::Machine;

/// Work-lists produced by comparing live machines with declared groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessGroupsDiff {
    /// Machines whose group is no longer declared, in snapshot order.
    pub machines_to_remove: Vec<Machine>,

    /// Number of machines removed per undeclared group.
    pub groups_to_remove: BTreeMap<String, usize>,

    /// Declared groups without any live machine.
    pub groups_needing_machines: BTreeSet<String>,
}

impl ProcessGroupsDiff {
    /// Compares `machines` with the `declared` process groups.
    pub fn compute(machines: &[Machine], declared: &[String]) -> Self {
        let declared: BTreeSet<&str> = declared.iter().map(String::as_str).collect();
        let mut staffed: BTreeSet<&str> = BTreeSet::new();
        let mut diff = Self::default();

        for machine in machines {
            let group = machine.process_group();
            if declared.contains(group) {
                staffed.insert(group);
            } else {
                *diff.groups_to_remove.entry(group.to_string()).or_insert(0) += 1;
                diff.machines_to_remove.push(machine.clone());
            }
        }

        diff.groups_needing_machines = declared
            .difference(&staffed)
            .map(|group| group.to_string())
            .collect();

        diff
    }

    /// Returns true if no machine has to be created or removed.
    pub fn is_empty(&self) -> bool {
        self.machines_to_remove.is_empty() && self.groups_needing_machines.is_empty()
    }

    /// Live machines that survive the removal phase, in snapshot order.
    pub fn remaining<'m>(&self, machines: &'m [Machine]) -> Vec<&'m Machine> {
        let removed: HashSet<&MachineId> = self.machines_to_remove.iter().map(|m| &m.id).collect();
        machines
            .iter()
            .filter(|machine| !removed.contains(&machine.id))
            .collect()
    }

    /// Human-readable description of the planned group changes.
    ///
    /// Returns `None` when nothing changes.
    pub fn summary(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut out = String::from("Process groups have changed. This will:\n");
        for (group, count) in &self.groups_to_remove {
            let plural = if *count == 1 { "" } else { "s" };
            out.push_str(&format!(" * destroy {count} \"{group}\" machine{plural}\n"));
        }
        for group in &self.groups_needing_machines {
            out.push_str(&format!(" * create 1 \"{group}\" machine\n"));
        }
        Some(out)
    }
}
