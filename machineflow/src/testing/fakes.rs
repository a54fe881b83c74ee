//! In-memory fakes of every provisioner collaborator.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::backend::{BillingService, LifecycleOp, MachineStore, PowerState, Router, VmBackend};
use crate::core::{Compute, HostAddress, Machine, MachineSpec, MachineState, MachineStatus};
use crate::errors::{BackendError, BillingError, RouterError, StoreError};
use crate::progress::ProgressWriter;

/// Everything the store holds for one machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreRecord {
    /// Every status written, oldest first.
    pub statuses: Vec<MachineStatus>,
    /// Every milestone written, oldest first.
    pub milestones: Vec<MachineState>,
    /// Console endpoint.
    pub host_address: Option<HostAddress>,
    /// Recorded snapshot ids.
    pub snapshots: Vec<String>,
    /// Every snapshot status written.
    pub snapshot_statuses: Vec<MachineStatus>,
    /// Recorded disk ids.
    pub disks: Vec<String>,
    /// Bound quota.
    pub quota: Option<String>,
}

/// A [`MachineStore`] backed by a concurrent map, with per-field failure
/// injection.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: DashMap<String, StoreRecord>,
    images: DashSet<(String, String)>,
    failing: DashSet<&'static str>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes writes to `field` fail. Fields: `status`, `milestone`,
    /// `host_address`, `snapshot`, `snapshot_status`, `disk`, `quota`.
    /// `image` makes image lookups fail.
    pub fn fail_on(&self, field: &'static str) {
        self.failing.insert(field);
    }

    /// Registers an image as valid for a machine name.
    pub fn register_image(&self, name: impl Into<String>, image: impl Into<String>) {
        self.images.insert((name.into(), image.into()));
    }

    /// Returns the record for a machine id.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<StoreRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    /// Returns every status written for a machine.
    #[must_use]
    pub fn statuses(&self, id: &str) -> Vec<MachineStatus> {
        self.record(id).map(|r| r.statuses).unwrap_or_default()
    }

    /// Returns the last status written for a machine.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<MachineStatus> {
        self.record(id).and_then(|r| r.statuses.last().copied())
    }

    /// Returns every milestone written for a machine.
    #[must_use]
    pub fn milestones(&self, id: &str) -> Vec<MachineState> {
        self.record(id).map(|r| r.milestones).unwrap_or_default()
    }

    fn write<F>(&self, machine: &Machine, field: &'static str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoreRecord),
    {
        if self.failing.contains(field) {
            return Err(StoreError::write_failed(&machine.id, field, "injected failure"));
        }
        let mut record = self.records.entry(machine.id.clone()).or_default();
        apply(record.value_mut());
        Ok(())
    }
}

#[async_trait]
impl MachineStore for InMemoryStore {
    async fn set_status(&self, machine: &Machine, status: MachineStatus) -> Result<(), StoreError> {
        self.write(machine, "status", |r| r.statuses.push(status))
    }

    async fn set_milestone(&self, machine: &Machine, state: MachineState) -> Result<(), StoreError> {
        self.write(machine, "milestone", |r| r.milestones.push(state))
    }

    async fn set_host_address(
        &self,
        machine: &Machine,
        address: &HostAddress,
    ) -> Result<(), StoreError> {
        self.write(machine, "host_address", |r| r.host_address = Some(address.clone()))
    }

    async fn record_snapshot(&self, machine: &Machine, snapshot_id: &str) -> Result<(), StoreError> {
        self.write(machine, "snapshot", |r| r.snapshots.push(snapshot_id.to_string()))
    }

    async fn set_snapshot_status(
        &self,
        machine: &Machine,
        status: MachineStatus,
    ) -> Result<(), StoreError> {
        self.write(machine, "snapshot_status", |r| r.snapshot_statuses.push(status))
    }

    async fn record_disk(&self, machine: &Machine, disk_id: &str) -> Result<(), StoreError> {
        self.write(machine, "disk", |r| r.disks.push(disk_id.to_string()))
    }

    async fn set_quota(&self, machine: &Machine, quota_id: &str) -> Result<(), StoreError> {
        self.write(machine, "quota", |r| r.quota = Some(quota_id.to_string()))
    }

    async fn is_valid_image(&self, name: &str, image: &str) -> Result<bool, StoreError> {
        if self.failing.contains("image") {
            return Err(StoreError::write_failed(name, "image", "injected failure"));
        }
        Ok(self.images.contains(&(name.to_string(), image.to_string())))
    }
}

#[derive(Debug, Default)]
struct BackendState {
    calls: Vec<String>,
    failing: HashSet<String>,
    vms: HashMap<String, PowerState>,
    pending: Option<PowerState>,
    power_probes: usize,
    snapshot_probes: usize,
}

/// A [`VmBackend`] that keeps VMs in memory.
///
/// Power and snapshot waits settle after a configurable number of probes,
/// and any operation can be made to fail.
#[derive(Debug)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
    settle_after: usize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Creates a backend where waits settle on the first probe.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            settle_after: 1,
        }
    }

    /// Sets how many probes a power or snapshot wait takes to settle.
    #[must_use]
    pub fn settle_after(mut self, probes: usize) -> Self {
        self.settle_after = probes.max(1);
        self
    }

    /// Makes an operation fail. Operations: `create`, `remove`, `start`,
    /// `stop`, `restart`, `power_state`, `host_address`, `create_snapshot`,
    /// `snapshot_ready`, `remove_snapshot`, `attach_disk`, `detach_disk`,
    /// `logs`, `showback`.
    pub fn fail_on(&self, operation: &str) {
        self.state.lock().failing.insert(operation.to_string());
    }

    /// Makes power-state probes report a failed VM.
    pub fn power_fails(&self) {
        self.state.lock().pending = Some(PowerState::Failed);
    }

    /// Returns `<operation>:<machine>` for every call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Returns the ids of VMs currently present.
    #[must_use]
    pub fn vms(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().vms.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the number of power-state probes made.
    #[must_use]
    pub fn power_probes(&self) -> usize {
        self.state.lock().power_probes
    }

    fn call(&self, operation: &str, machine: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.calls.push(format!("{operation}:{machine}"));
        if state.failing.contains(operation) {
            return Err(BackendError::new(operation, machine, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl VmBackend for FakeBackend {
    async fn create(&self, machine: &Machine, _compute: &Compute) -> Result<String, BackendError> {
        self.call("create", &machine.name)?;
        let id = format!("vm-{}", Uuid::new_v4().simple());
        self.state.lock().vms.insert(id.clone(), PowerState::Booting);
        Ok(id)
    }

    async fn remove(&self, machine: &Machine) -> Result<(), BackendError> {
        self.call("remove", &machine.name)?;
        if let Some(id) = &machine.vm_id {
            self.state.lock().vms.remove(id);
        }
        Ok(())
    }

    async fn lifecycle(&self, machine: &Machine, op: LifecycleOp) -> Result<(), BackendError> {
        self.call(&op.to_string(), &machine.name)?;
        let target = match op {
            LifecycleOp::Start | LifecycleOp::Restart => PowerState::Running,
            LifecycleOp::Stop => PowerState::Poweroff,
        };
        let mut state = self.state.lock();
        state.power_probes = 0;
        if state.pending != Some(PowerState::Failed) {
            state.pending = Some(target);
        }
        Ok(())
    }

    async fn power_state(&self, machine: &Machine) -> Result<PowerState, BackendError> {
        self.call("power_state", &machine.name)?;
        let mut state = self.state.lock();
        state.power_probes += 1;
        let reached = state.power_probes >= self.settle_after;
        Ok(match state.pending {
            Some(PowerState::Failed) => PowerState::Failed,
            Some(target) if reached => target,
            Some(PowerState::Poweroff) => PowerState::ShuttingDown,
            _ => PowerState::Booting,
        })
    }

    async fn host_address(&self, machine: &Machine) -> Result<HostAddress, BackendError> {
        self.call("host_address", &machine.name)?;
        Ok(HostAddress {
            host: "kvm-1.internal".to_string(),
            port: 5900,
        })
    }

    async fn create_snapshot(&self, machine: &Machine) -> Result<String, BackendError> {
        self.call("create_snapshot", &machine.name)?;
        self.state.lock().snapshot_probes = 0;
        Ok(format!("snap-{}", Uuid::new_v4().simple()))
    }

    async fn snapshot_ready(&self, machine: &Machine) -> Result<bool, BackendError> {
        self.call("snapshot_ready", &machine.name)?;
        let mut state = self.state.lock();
        state.snapshot_probes += 1;
        Ok(state.snapshot_probes >= self.settle_after)
    }

    async fn remove_snapshot(&self, machine: &Machine) -> Result<(), BackendError> {
        self.call("remove_snapshot", &machine.name)
    }

    async fn attach_disk(&self, machine: &Machine) -> Result<String, BackendError> {
        self.call("attach_disk", &machine.name)?;
        Ok(format!("disk-{}", Uuid::new_v4().simple()))
    }

    async fn detach_disk(&self, machine: &Machine) -> Result<(), BackendError> {
        self.call("detach_disk", &machine.name)
    }

    async fn logs(&self, machine: &Machine, writer: &ProgressWriter) -> Result<(), BackendError> {
        self.call("logs", &machine.name)?;
        writer.raw(format!("[{}] boot complete\n", machine.name).as_bytes());
        Ok(())
    }

    async fn showback(
        &self,
        start: i64,
        end: i64,
        region: &str,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        self.call("showback", region)?;
        Ok(vec![serde_json::json!({
            "region": region,
            "start": start,
            "end": end,
            "cpu_hours": 12.5,
        })])
    }
}

/// A [`Router`] holding routes in memory.
#[derive(Debug)]
pub struct InMemoryRouter {
    name: String,
    routes: DashMap<String, String>,
    failing: DashSet<&'static str>,
}

impl InMemoryRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: DashMap::new(),
            failing: DashSet::new(),
        }
    }

    /// Makes `set` or `unset` fail.
    pub fn fail_on(&self, action: &'static str) {
        self.failing.insert(action);
    }

    /// Adds a route directly.
    pub fn insert(&self, name: impl Into<String>, address: impl Into<String>) {
        self.routes.insert(name.into(), address.into());
    }

    /// Returns the address `name` maps to.
    #[must_use]
    pub fn route(&self, name: &str) -> Option<String> {
        self.routes.get(name).map(|r| r.clone())
    }

    fn check(&self, action: &'static str, name: &str) -> Result<(), RouterError> {
        if self.failing.contains(action) {
            return Err(RouterError::Failed {
                router: self.name.clone(),
                action,
                name: name.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Router for InMemoryRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_cname(&self, name: &str, address: &str) -> Result<(), RouterError> {
        self.check("set", name)?;
        self.routes.insert(name.to_string(), address.to_string());
        Ok(())
    }

    async fn unset_cname(&self, name: &str, address: &str) -> Result<(), RouterError> {
        self.check("unset", name)?;
        self.routes.remove_if(name, |_, current| current == address);
        Ok(())
    }

    async fn addr(&self, name: &str) -> Result<String, RouterError> {
        self.route(name).ok_or_else(|| RouterError::NoRoute(name.to_string()))
    }
}

/// A [`BillingService`] with a switchable balance.
#[derive(Debug, Default)]
pub struct FakeBilling {
    insufficient: Mutex<bool>,
    checks: Mutex<Vec<String>>,
    deductions: Mutex<Vec<String>>,
}

impl FakeBilling {
    /// Creates a billing service with enough credit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every credit check fail.
    pub fn set_insufficient(&self) {
        *self.insufficient.lock() = true;
    }

    /// Returns the machine names credit-checked.
    #[must_use]
    pub fn checks(&self) -> Vec<String> {
        self.checks.lock().clone()
    }

    /// Returns `<account>/<carton>/<name>` for every deduction.
    #[must_use]
    pub fn deductions(&self) -> Vec<String> {
        self.deductions.lock().clone()
    }
}

#[async_trait]
impl BillingService for FakeBilling {
    async fn check_credits(&self, machine: &Machine, spec: &MachineSpec) -> Result<(), BillingError> {
        self.checks.lock().push(machine.name.clone());
        if *self.insufficient.lock() {
            return Err(BillingError::insufficient(&spec.account_id, "balance is zero"));
        }
        Ok(())
    }

    async fn deduct(&self, account_id: &str, carton_id: &str, name: &str) -> Result<(), BillingError> {
        if *self.insufficient.lock() {
            return Err(BillingError::insufficient(account_id, "balance is zero"));
        }
        self.deductions
            .lock()
            .push(format!("{account_id}/{carton_id}/{name}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine {
        Machine::from_spec(
            &MachineSpec::new("m1", "acc", "web", "example.com"),
            MachineStatus::Launching,
            MachineState::Initializing,
            "ubuntu",
            "10",
        )
    }

    #[tokio::test]
    async fn test_store_records_history() {
        let store = InMemoryStore::new();
        let m = machine();
        store.set_status(&m, MachineStatus::Launching).await.unwrap();
        store.set_status(&m, MachineStatus::Created).await.unwrap();

        assert_eq!(
            store.statuses("m1"),
            vec![MachineStatus::Launching, MachineStatus::Created]
        );
        assert_eq!(store.status("m1"), Some(MachineStatus::Created));
    }

    #[tokio::test]
    async fn test_store_failure_injection() {
        let store = InMemoryStore::new();
        store.fail_on("milestone");
        let err = store
            .set_milestone(&machine(), MachineState::Initialized)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("milestone"));
        assert!(store.milestones("m1").is_empty());
    }

    #[tokio::test]
    async fn test_backend_power_settles_after_k_probes() {
        let backend = FakeBackend::new().settle_after(3);
        let m = machine();
        backend.lifecycle(&m, LifecycleOp::Start).await.unwrap();

        assert_eq!(backend.power_state(&m).await.unwrap(), PowerState::Booting);
        assert_eq!(backend.power_state(&m).await.unwrap(), PowerState::Booting);
        assert_eq!(backend.power_state(&m).await.unwrap(), PowerState::Running);
    }

    #[tokio::test]
    async fn test_router_roundtrip() {
        let router = InMemoryRouter::new("route53");
        router.set_cname("web.example.com", "10.0.0.1").await.unwrap();
        assert_eq!(router.addr("web.example.com").await.unwrap(), "10.0.0.1");

        router.unset_cname("web.example.com", "10.0.0.1").await.unwrap();
        assert!(matches!(
            router.addr("web.example.com").await,
            Err(RouterError::NoRoute(_))
        ));
    }
}
