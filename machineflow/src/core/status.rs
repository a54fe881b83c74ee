//! Machine status and lifecycle state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fine-grained progress label persisted after almost every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    /// Deploy has been requested.
    Launching,
    /// Deploy finished on the backend.
    Launched,
    /// The account balance covers the machine.
    BalanceVerified,
    /// The account balance does not cover the machine.
    InsufficientFund,
    /// The backend created the VM.
    Created,
    /// The console host address is being resolved.
    VncHostUpdating,
    /// The console host address is recorded.
    VncHostUpdated,
    /// The VM is booting.
    VmBooting,
    /// The machine is bootstrapped.
    Bootstrapped,
    /// The machine is running.
    Running,
    /// A start was requested.
    Starting,
    /// The machine started.
    Started,
    /// A stop was requested.
    Stopping,
    /// The machine stopped.
    Stopped,
    /// A state change is in progress.
    StateUpping,
    /// The state change completed.
    StateUpped,
    /// A route is being created.
    NetworkCreating,
    /// A route was created.
    NetworkCreated,
    /// No route was needed.
    NetworkSkipped,
    /// A snapshot is being created.
    SnapCreating,
    /// A snapshot was created.
    SnapCreated,
    /// A snapshot is being deleted.
    SnapDeleting,
    /// A snapshot was deleted.
    SnapDeleted,
    /// A disk is being attached.
    DiskAttaching,
    /// A disk was attached.
    DiskAttached,
    /// A disk is being detached.
    DiskDetaching,
    /// A disk was detached.
    DiskDetached,
    /// A quota was bound to the machine.
    QuotaUpdated,
    /// Destroy was requested.
    Destroying,
    /// The machine is gone.
    Destroyed,
    /// An operation failed before the machine was usable.
    PreError,
    /// An operation failed.
    Error,
}

impl MachineStatus {
    /// Returns the persisted label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Launching => "launching",
            Self::Launched => "launched",
            Self::BalanceVerified => "balance_verified",
            Self::InsufficientFund => "insufficient_fund",
            Self::Created => "created",
            Self::VncHostUpdating => "vnc_host_updating",
            Self::VncHostUpdated => "vnc_host_updated",
            Self::VmBooting => "vm_booting",
            Self::Bootstrapped => "bootstrapped",
            Self::Running => "running",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::StateUpping => "state_upping",
            Self::StateUpped => "state_upped",
            Self::NetworkCreating => "network_creating",
            Self::NetworkCreated => "network_created",
            Self::NetworkSkipped => "network_skipped",
            Self::SnapCreating => "snap_creating",
            Self::SnapCreated => "snap_created",
            Self::SnapDeleting => "snap_deleting",
            Self::SnapDeleted => "snap_deleted",
            Self::DiskAttaching => "disk_attaching",
            Self::DiskAttached => "disk_attached",
            Self::DiskDetaching => "disk_detaching",
            Self::DiskDetached => "disk_detached",
            Self::QuotaUpdated => "quota_updated",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::PreError => "pre_error",
            Self::Error => "error",
        }
    }

    /// Returns true if the status marks a failed operation.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::PreError | Self::Error | Self::InsufficientFund)
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse lifecycle phase ("milestone").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    /// The machine is being created.
    Initializing,
    /// The backend has the machine.
    Initialized,
    /// The machine is running.
    Running,
    /// The machine is powered off.
    Stopped,
    /// The machine is being removed.
    Destroying,
    /// The machine is removed.
    Destroyed,
    /// The machine is parked for lack of funds.
    Parked,
    /// An operation failed mid-way.
    PreError,
}

impl Default for MachineState {
    fn default() -> Self {
        Self::Initializing
    }
}

impl MachineState {
    /// Returns the persisted label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "machine.initializing",
            Self::Initialized => "machine.initialized",
            Self::Running => "machine.running",
            Self::Stopped => "machine.stopped",
            Self::Destroying => "machine.destroying",
            Self::Destroyed => "machine.destroyed",
            Self::Parked => "machine.parked",
            Self::PreError => "machine.pre_error",
        }
    }

    /// Returns true if the machine no longer exists on the backend.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
