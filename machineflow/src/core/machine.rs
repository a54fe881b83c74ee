//! In-memory snapshot of the machine a pipeline works on.

use super::{MachineSpec, MachineState, MachineStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Console endpoint of a VM on its hypervisor host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAddress {
    /// Hypervisor host.
    pub host: String,
    /// Console port.
    pub port: u16,
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The target entity threaded through every step of a pipeline.
///
/// Built fresh from the caller's [`MachineSpec`] at the start of each run
/// and discarded at the end; persisted truth lives in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    /// Opaque machine id.
    pub id: String,
    /// Owning account.
    pub account_id: String,
    /// Parent group id.
    pub carton_id: String,
    /// Grandparent group id.
    pub cartons_id: String,
    /// Hierarchy level.
    pub level: u32,
    /// Fully qualified name.
    pub name: String,
    /// Current progress label.
    pub status: MachineStatus,
    /// Current lifecycle phase.
    pub state: MachineState,
    /// Backend image reference.
    pub image: String,
    /// Storage type.
    pub storage_type: String,
    /// Region.
    pub region: String,
    /// Backend-assigned instance id.
    pub vm_id: Option<String>,
    /// CPU throttle percentage handed to the backend.
    pub vcpu_throttle: String,
    /// Whether a route currently points at the machine.
    pub routable: bool,
    /// Console endpoint, once resolved.
    pub host_address: Option<HostAddress>,
    /// Snapshot produced or targeted by the current operation.
    pub snapshot_id: Option<String>,
    /// Disk produced or targeted by the current operation.
    pub disk_id: Option<String>,
}

impl Machine {
    /// Builds the working copy for a pipeline run.
    #[must_use]
    pub fn from_spec(
        spec: &MachineSpec,
        status: MachineStatus,
        state: MachineState,
        image: impl Into<String>,
        vcpu_throttle: impl Into<String>,
    ) -> Self {
        Self {
            id: spec.id.clone(),
            account_id: spec.account_id.clone(),
            carton_id: spec.carton_id.clone(),
            cartons_id: spec.cartons_id.clone(),
            level: spec.level,
            name: spec.full_name(),
            status,
            state,
            image: image.into(),
            storage_type: spec.storage_type.clone(),
            region: spec.region.clone(),
            vm_id: spec.instance_id.clone(),
            vcpu_throttle: vcpu_throttle.into(),
            routable: false,
            host_address: None,
            snapshot_id: spec.snapshot_id.clone(),
            disk_id: spec.disk_id.clone(),
        }
    }

    /// Marks the machine routable when a non-empty address is given.
    pub fn set_routable(&mut self, address: Option<&str>) {
        self.routable = address.is_some_and(|a| !a.is_empty());
    }

    /// Sets the status, returning self for chaining.
    #[must_use]
    pub fn with_status(mut self, status: MachineStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the state, returning self for chaining.
    #[must_use]
    pub fn with_state(mut self, state: MachineState) -> Self {
        self.state = state;
        self
    }
}
