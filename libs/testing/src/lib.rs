//! Test doubles for the fleet deployer.
//!
//! Every fake appends to a shared [`CallLog`] so tests can assert on the
//! exact sequence of remote calls a rollout made. Failures are injected per
//! machine, per group or per phase.

pub mod fixtures;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use fleet_deployer::{
    Collaborators, LeaseManager, MachineApi, ProgressSink, ReleaseCommandRunner, ReleaseStatus,
    ReleaseStatusStore, WaitKind,
};
use fleet_id::{MachineId, ReleaseId};
use fleet_reconcile::{AppConfigResolver, LaunchInput, Machine, MachineState};
use tracing::debug;

/// A remote call made by the deployer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetStatus(ReleaseStatus),
    ReleaseCommand,
    AcquireLeases(Vec<MachineId>),
    ReleaseLeases(Vec<MachineId>),
    /// A machine was launched into `group`; `id` is what the fake assigned.
    Launch { group: String, id: MachineId },
    Update(MachineId),
    Destroy(MachineId),
    Wait(MachineId, WaitKind),
}

/// Shared, ordered record of calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: Call) {
        debug!(?call, "[FAKE] call");
        self.lock().push(call);
    }

    /// Snapshot of all calls so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().iter().filter(|call| pred(call)).count()
    }

    pub fn contains(&self, call: &Call) -> bool {
        self.lock().contains(call)
    }

    /// Machines touched by updates, in order.
    pub fn updated(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                Call::Update(id) => Some(id.to_string()),
                _ => None,
            })
            .collect()
    }

    /// Statuses written to the release, in order.
    pub fn statuses(&self) -> Vec<ReleaseStatus> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                Call::SetStatus(status) => Some(*status),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Call>> {
        // A test that panicked while holding the lock has already failed.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory machine control plane.
#[derive(Debug, Default)]
pub struct FakeMachineApi {
    log: CallLog,
    next_id: AtomicU64,
    fail_update: HashSet<String>,
    fail_destroy: HashSet<String>,
    fail_launch: Option<(String, String)>,
    fail_wait: HashSet<(String, WaitKind)>,
    panic_update: HashSet<String>,
    hang_waits: bool,
}

impl FakeMachineApi {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn fail_update(mut self, machine: &str) -> Self {
        self.fail_update.insert(machine.to_string());
        self
    }

    #[must_use]
    pub fn fail_destroy(mut self, machine: &str) -> Self {
        self.fail_destroy.insert(machine.to_string());
        self
    }

    /// Updating `machine` panics, as a buggy client would.
    #[must_use]
    pub fn panic_on_update(mut self, machine: &str) -> Self {
        self.panic_update.insert(machine.to_string());
        self
    }

    /// Launches into `group` fail with `message`.
    #[must_use]
    pub fn fail_launch(mut self, group: &str, message: &str) -> Self {
        self.fail_launch = Some((group.to_string(), message.to_string()));
        self
    }

    /// Waits of `kind` on `machine` fail. Launched machines are named
    /// `new_1`, `new_2`, ... in launch order.
    #[must_use]
    pub fn fail_wait(mut self, machine: &str, kind: WaitKind) -> Self {
        self.fail_wait.insert((machine.to_string(), kind));
        self
    }

    /// Every wait blocks forever.
    #[must_use]
    pub fn hang_waits(mut self) -> Self {
        self.hang_waits = true;
        self
    }

    async fn wait(&self, machine: &Machine, kind: WaitKind) -> Result<()> {
        self.log.push(Call::Wait(machine.id.clone(), kind));
        if self.hang_waits {
            std::future::pending::<()>().await;
        }
        if self.fail_wait.contains(&(machine.id.to_string(), kind)) {
            bail!("timeout reached waiting for machine {} to be {kind}", machine.id);
        }
        Ok(())
    }
}

#[async_trait]
impl MachineApi for FakeMachineApi {
    async fn launch(&self, input: &LaunchInput) -> Result<Machine> {
        let group = input.config.process_group().to_string();
        if let Some((failing, message)) = &self.fail_launch {
            if *failing == group {
                bail!("{message}");
            }
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = MachineId::parse(&format!("new_{n}"))?;
        self.log.push(Call::Launch {
            group,
            id: id.clone(),
        });

        Ok(Machine {
            id,
            region: input.region.clone(),
            state: MachineState::Created,
            config: input.config.clone(),
        })
    }

    async fn update(&self, machine: &Machine, _input: &LaunchInput) -> Result<()> {
        self.log.push(Call::Update(machine.id.clone()));
        if self.panic_update.contains(machine.id.as_str()) {
            panic!("machine client bug while updating {}", machine.id);
        }
        if self.fail_update.contains(machine.id.as_str()) {
            bail!("failed to update VM {}: unavailable", machine.id);
        }
        Ok(())
    }

    async fn destroy(&self, machine: &Machine, _force: bool) -> Result<()> {
        self.log.push(Call::Destroy(machine.id.clone()));
        if self.fail_destroy.contains(machine.id.as_str()) {
            bail!("could not destroy machine {}", machine.id);
        }
        Ok(())
    }

    async fn wait_for_state(
        &self,
        machine: &Machine,
        _state: MachineState,
        _timeout: Duration,
    ) -> Result<()> {
        self.wait(machine, WaitKind::Started).await
    }

    async fn wait_for_healthchecks(&self, machine: &Machine, _timeout: Duration) -> Result<()> {
        self.wait(machine, WaitKind::Healthy).await
    }
}

/// Lease manager that records acquisitions and releases.
#[derive(Debug, Default)]
pub struct FakeLeases {
    log: CallLog,
    acquired: AtomicU64,
    fail_acquire: bool,
    hang_renewals: bool,
}

impl FakeLeases {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail_acquire = true;
        self
    }

    /// The first acquire succeeds; every renewal after it blocks forever.
    #[must_use]
    pub fn hang_renewals(mut self) -> Self {
        self.hang_renewals = true;
        self
    }
}

#[async_trait]
impl LeaseManager for FakeLeases {
    async fn acquire(&self, machines: &[MachineId], _ttl: Duration) -> Result<()> {
        self.log.push(Call::AcquireLeases(machines.to_vec()));
        let renewal = self.acquired.fetch_add(1, Ordering::SeqCst) > 0;
        if renewal && self.hang_renewals {
            std::future::pending::<()>().await;
        }
        if self.fail_acquire {
            bail!("machine is leased by another deployment");
        }
        Ok(())
    }

    async fn release(&self, machines: &[MachineId]) -> Result<()> {
        self.log.push(Call::ReleaseLeases(machines.to_vec()));
        Ok(())
    }
}

/// Release command runner with a scripted outcome.
#[derive(Debug, Default)]
pub struct FakeReleaseCommand {
    log: CallLog,
    fail: bool,
    used_machine: bool,
}

impl FakeReleaseCommand {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Report that the command ran in an ephemeral machine.
    #[must_use]
    pub fn with_machine(mut self) -> Self {
        self.used_machine = true;
        self
    }
}

#[async_trait]
impl ReleaseCommandRunner for FakeReleaseCommand {
    async fn run(&self) -> Result<()> {
        self.log.push(Call::ReleaseCommand);
        if self.fail {
            bail!("release command exited with code 1");
        }
        Ok(())
    }

    fn used_machine(&self) -> bool {
        self.used_machine
    }
}

/// Release status store that can reject specific transitions.
#[derive(Debug, Default)]
pub struct FakeReleaseStore {
    log: CallLog,
    reject: HashSet<ReleaseStatus>,
}

impl FakeReleaseStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            reject: HashSet::new(),
        }
    }

    #[must_use]
    pub fn reject(mut self, status: ReleaseStatus) -> Self {
        self.reject.insert(status);
        self
    }
}

#[async_trait]
impl ReleaseStatusStore for FakeReleaseStore {
    async fn set_status(&self, _release: &ReleaseId, status: ReleaseStatus) -> Result<()> {
        self.log.push(Call::SetStatus(status));
        if self.reject.contains(&status) {
            bail!("release store unavailable");
        }
        Ok(())
    }
}

/// Progress sink that keeps every line.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    lines: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl ProgressSink for RecordingProgress {
    fn line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_string());
    }
}

/// All fakes wired to one call log.
pub struct FakeFleet {
    pub log: CallLog,
    pub machines: FakeMachineApi,
    pub leases: FakeLeases,
    pub release_command: FakeReleaseCommand,
    pub releases: FakeReleaseStore,
    pub progress: Arc<RecordingProgress>,
}

impl FakeFleet {
    pub fn new() -> Self {
        let log = CallLog::new();
        Self {
            machines: FakeMachineApi::new(log.clone()),
            leases: FakeLeases::new(log.clone()),
            release_command: FakeReleaseCommand::new(log.clone()),
            releases: FakeReleaseStore::new(log.clone()),
            progress: Arc::new(RecordingProgress::default()),
            log,
        }
    }

    #[must_use]
    pub fn machines(mut self, f: impl FnOnce(FakeMachineApi) -> FakeMachineApi) -> Self {
        self.machines = f(self.machines);
        self
    }

    #[must_use]
    pub fn leases(mut self, f: impl FnOnce(FakeLeases) -> FakeLeases) -> Self {
        self.leases = f(self.leases);
        self
    }

    #[must_use]
    pub fn release_command(
        mut self,
        f: impl FnOnce(FakeReleaseCommand) -> FakeReleaseCommand,
    ) -> Self {
        self.release_command = f(self.release_command);
        self
    }

    #[must_use]
    pub fn releases(mut self, f: impl FnOnce(FakeReleaseStore) -> FakeReleaseStore) -> Self {
        self.releases = f(self.releases);
        self
    }

    /// Hand the fakes to a deployer. Keep `log` and `progress` for asserts.
    pub fn collaborators(self, app_config: impl AppConfigResolver + 'static) -> Collaborators {
        Collaborators {
            machines: Arc::new(self.machines),
            leases: Arc::new(self.leases),
            release_command: Arc::new(self.release_command),
            releases: Arc::new(self.releases),
            app_config: Arc::new(app_config),
            progress: self.progress,
        }
    }
}

impl Default for FakeFleet {
    fn default() -> Self {
        Self::new()
    }
}
