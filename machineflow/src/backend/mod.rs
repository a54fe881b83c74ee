//! Narrow interfaces to the systems a provisioner drives.
//!
//! Steps never talk to a hypervisor, database or DNS service directly;
//! they go through these traits so every collaborator can be swapped for
//! a fake in tests.

use crate::core::{Compute, HostAddress, Machine, MachineSpec, MachineState, MachineStatus};
use crate::errors::{BackendError, BillingError, RouterError, StoreError};
use crate::progress::ProgressWriter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Power-lifecycle operation on an existing VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOp {
    /// Power on.
    Start,
    /// Power off.
    Stop,
    /// Reboot.
    Restart,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Restart => write!(f, "restart"),
        }
    }
}

/// Power state reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Scheduled but not placed.
    Pending,
    /// Placed and booting.
    Booting,
    /// Active and running.
    Running,
    /// Shutting down.
    ShuttingDown,
    /// Powered off.
    Poweroff,
    /// The backend gave up on the VM.
    Failed,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Booting => write!(f, "booting"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Poweroff => write!(f, "poweroff"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Client for the hypervisor / cloud-management API.
#[async_trait]
pub trait VmBackend: Send + Sync {
    /// Creates a VM and returns its backend instance id.
    async fn create(&self, machine: &Machine, compute: &Compute) -> Result<String, BackendError>;

    /// Removes the VM.
    async fn remove(&self, machine: &Machine) -> Result<(), BackendError>;

    /// Runs a power-lifecycle operation.
    async fn lifecycle(&self, machine: &Machine, op: LifecycleOp) -> Result<(), BackendError>;

    /// Reports the current power state (a single probe, no waiting).
    async fn power_state(&self, machine: &Machine) -> Result<PowerState, BackendError>;

    /// Resolves the console endpoint of the VM.
    async fn host_address(&self, machine: &Machine) -> Result<HostAddress, BackendError>;

    /// Starts a disk snapshot and returns its id.
    async fn create_snapshot(&self, machine: &Machine) -> Result<String, BackendError>;

    /// Reports whether the machine's snapshot has finished.
    async fn snapshot_ready(&self, machine: &Machine) -> Result<bool, BackendError>;

    /// Removes the machine's snapshot.
    async fn remove_snapshot(&self, machine: &Machine) -> Result<(), BackendError>;

    /// Attaches a new disk and returns its id.
    async fn attach_disk(&self, machine: &Machine) -> Result<String, BackendError>;

    /// Detaches the machine's disk.
    async fn detach_disk(&self, machine: &Machine) -> Result<(), BackendError>;

    /// Streams the VM's boot log into the writer.
    async fn logs(&self, machine: &Machine, writer: &ProgressWriter) -> Result<(), BackendError>;

    /// Pulls usage records between two unix timestamps.
    async fn showback(
        &self,
        start: i64,
        end: i64,
        region: &str,
    ) -> Result<Vec<serde_json::Value>, BackendError>;
}

/// Persistent store holding the machine records.
///
/// Writes are upserts keyed by machine id; no transaction spans steps.
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Persists the status label.
    async fn set_status(&self, machine: &Machine, status: MachineStatus) -> Result<(), StoreError>;

    /// Persists the lifecycle milestone.
    async fn set_milestone(&self, machine: &Machine, state: MachineState) -> Result<(), StoreError>;

    /// Persists the console endpoint.
    async fn set_host_address(
        &self,
        machine: &Machine,
        address: &HostAddress,
    ) -> Result<(), StoreError>;

    /// Records a snapshot id against the machine.
    async fn record_snapshot(&self, machine: &Machine, snapshot_id: &str) -> Result<(), StoreError>;

    /// Persists the status of the machine's snapshot record.
    async fn set_snapshot_status(
        &self,
        machine: &Machine,
        status: MachineStatus,
    ) -> Result<(), StoreError>;

    /// Records a disk id against the machine.
    async fn record_disk(&self, machine: &Machine, disk_id: &str) -> Result<(), StoreError>;

    /// Binds a quota to the machine.
    async fn set_quota(&self, machine: &Machine, quota_id: &str) -> Result<(), StoreError>;

    /// Checks that an image is registered for the named machine.
    async fn is_valid_image(&self, name: &str, image: &str) -> Result<bool, StoreError>;
}

/// DNS / name-to-address mapping service.
#[async_trait]
pub trait Router: Send + Sync {
    /// Router name used for registration.
    fn name(&self) -> &str;

    /// Points `name` at `address`.
    async fn set_cname(&self, name: &str, address: &str) -> Result<(), RouterError>;

    /// Removes the mapping of `name` to `address`.
    async fn unset_cname(&self, name: &str, address: &str) -> Result<(), RouterError>;

    /// Looks up the address `name` maps to.
    async fn addr(&self, name: &str) -> Result<String, RouterError>;
}

/// Credit checks and deductions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingService: Send + Sync {
    /// Fails when the account cannot pay for the machine.
    async fn check_credits(&self, machine: &Machine, spec: &MachineSpec) -> Result<(), BillingError>;

    /// Deducts the machine's usage from the account.
    async fn deduct(&self, account_id: &str, carton_id: &str, name: &str) -> Result<(), BillingError>;
}

/// Billing service for installations that do not meter usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnmeteredBilling;

#[async_trait]
impl BillingService for UnmeteredBilling {
    async fn check_credits(&self, _machine: &Machine, _spec: &MachineSpec) -> Result<(), BillingError> {
        Ok(())
    }

    async fn deduct(&self, _account_id: &str, _carton_id: &str, _name: &str) -> Result<(), BillingError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_display() {
        assert_eq!(LifecycleOp::Start.to_string(), "start");
        assert_eq!(LifecycleOp::Restart.to_string(), "restart");
    }

    #[test]
    fn test_power_state_serialize() {
        let json = serde_json::to_string(&PowerState::ShuttingDown).unwrap();
        assert_eq!(json, r#""shutting_down""#);
        assert_eq!(PowerState::ShuttingDown.to_string(), "shutting_down");
    }

    #[tokio::test]
    async fn test_unmetered_billing_accepts_everything() {
        let spec = MachineSpec::new("m1", "acc", "web", "example.com");
        let machine = Machine::from_spec(&spec, crate::core::MachineStatus::Launching, spec.state, "ubuntu", "10");

        assert!(UnmeteredBilling.check_credits(&machine, &spec).await.is_ok());
        assert!(UnmeteredBilling.deduct("acc", "c-1", "web.example.com").await.is_ok());
    }
}
