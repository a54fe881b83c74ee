//! Declarative catalog of the machine pipelines.
//!
//! Every public operation maps to a fixed table of step identifiers, each
//! with an inclusion predicate. Predicates are evaluated once against
//! [`Conditions`] before the pipeline is built; steps never reshape the
//! pipeline themselves.

use super::Pipeline;
use crate::actions;
use crate::context::MachineArgs;
use crate::core::MachineSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A public provisioner operation backed by a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Create and boot a machine.
    Deploy,
    /// Remove a machine and its route.
    Destroy,
    /// Snapshot the machine's disk.
    SnapshotCreate,
    /// Remove a snapshot.
    SnapshotDelete,
    /// Attach a new disk.
    DiskAttach,
    /// Detach a disk.
    DiskDetach,
    /// Generic state transition (bootstrapped, running, ...).
    SetState,
    /// Power on.
    Start,
    /// Power off.
    Stop,
    /// Reboot.
    Restart,
    /// Persist a status label only.
    SetStatus,
}

impl Operation {
    /// Every operation, in catalog order.
    pub const ALL: [Self; 11] = [
        Self::Deploy,
        Self::Destroy,
        Self::SnapshotCreate,
        Self::SnapshotDelete,
        Self::DiskAttach,
        Self::DiskDetach,
        Self::SetState,
        Self::Start,
        Self::Stop,
        Self::Restart,
        Self::SetStatus,
    ];

    /// Returns the operation name, also used as the pipeline name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Destroy => "destroy",
            Self::SnapshotCreate => "snapshot-create",
            Self::SnapshotDelete => "snapshot-delete",
            Self::DiskAttach => "disk-attach",
            Self::DiskDetach => "disk-detach",
            Self::SetState => "set-state",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::SetStatus => "set-status",
        }
    }

    /// Returns the step table for this operation.
    #[must_use]
    pub const fn entries(self) -> &'static [Entry] {
        match self {
            Self::Deploy => DEPLOY,
            Self::Destroy => DESTROY,
            Self::SnapshotCreate => SNAPSHOT_CREATE,
            Self::SnapshotDelete => SNAPSHOT_DELETE,
            Self::DiskAttach => DISK_ATTACH,
            Self::DiskDetach => DISK_DETACH,
            Self::SetState => SET_STATE,
            Self::Start => START,
            Self::Stop => STOP,
            Self::Restart => RESTART,
            Self::SetStatus => SET_STATUS,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies a machine step in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    BuildMachine,
    UpdateStatus,
    CheckBalance,
    UpdateMilestone,
    CreateMachine,
    UpdateQuota,
    ResolveHostAddress,
    UpdateHostAddress,
    SetFinalStatus,
    FollowLogs,
    DestroyMachine,
    DestroyRoute,
    StartMachine,
    StopMachine,
    RestartMachine,
    ChangeState,
    AddRoute,
    SetFinalState,
    CreateSnapshot,
    WaitSnapshotReady,
    RecordSnapshot,
    UpdateSnapshotStatus,
    RemoveSnapshot,
    AttachDisk,
    RecordDisk,
    DetachDisk,
}

impl StepId {
    /// Returns the diagnostic name of the step.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BuildMachine => "machine-struct-creating",
            Self::UpdateStatus => "update-status",
            Self::CheckBalance => "balance-check",
            Self::UpdateMilestone => "change-milestone-state",
            Self::CreateMachine => "create-machine",
            Self::UpdateQuota => "update-quota",
            Self::ResolveHostAddress => "gethost-port",
            Self::UpdateHostAddress => "update-vnc-host-port",
            Self::SetFinalStatus => "set-final-status",
            Self::FollowLogs => "follow-logs",
            Self::DestroyMachine => "destroy-old-machine",
            Self::DestroyRoute => "destroy-old-route",
            Self::StartMachine => "start-machine",
            Self::StopMachine => "stop-machine",
            Self::RestartMachine => "restart-machine",
            Self::ChangeState => "change-state-machine",
            Self::AddRoute => "add-new-route",
            Self::SetFinalState => "set-final-state",
            Self::CreateSnapshot => "create-snapshot-image",
            Self::WaitSnapshotReady => "wait-for-image-ready",
            Self::RecordSnapshot => "update-snap-table",
            Self::UpdateSnapshotStatus => "update-snap-status",
            Self::RemoveSnapshot => "remove-snap-shot",
            Self::AttachDisk => "add-new-storage",
            Self::RecordDisk => "update-disk-table",
            Self::DetachDisk => "remove-disk-storage",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Environment flags evaluated once before a pipeline is assembled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    /// Billing is enabled for the deployment.
    pub billing_enabled: bool,
    /// The caller supplied a pre-authorized quota.
    pub has_quota: bool,
    /// The caller supplied a public address.
    pub has_public_ip: bool,
}

impl Conditions {
    /// Derives the conditions for a machine spec.
    #[must_use]
    pub fn for_spec(spec: &MachineSpec, billing_enabled: bool) -> Self {
        Self {
            billing_enabled,
            has_quota: spec.has_quota(),
            has_public_ip: spec.public_ip().is_some(),
        }
    }
}

/// When a catalog entry is part of the assembled pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inclusion {
    /// Always included.
    Always,
    /// Billing is enabled and no quota covers the machine.
    WhenBilling,
    /// A quota was supplied.
    WhenQuota,
    /// A public address was supplied.
    WhenPublicIp,
}

impl Inclusion {
    /// Evaluates the predicate.
    #[must_use]
    pub const fn holds(self, conditions: &Conditions) -> bool {
        match self {
            Self::Always => true,
            Self::WhenBilling => conditions.billing_enabled && !conditions.has_quota,
            Self::WhenQuota => conditions.has_quota,
            Self::WhenPublicIp => conditions.has_public_ip,
        }
    }
}

/// One row of an operation's step table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// The step.
    pub step: StepId,
    /// Its inclusion predicate.
    pub when: Inclusion,
}

const fn always(step: StepId) -> Entry {
    Entry {
        step,
        when: Inclusion::Always,
    }
}

const fn when(when: Inclusion, step: StepId) -> Entry {
    Entry { step, when }
}

use Inclusion::{WhenBilling, WhenPublicIp, WhenQuota};
use StepId::*;

const DEPLOY: &[Entry] = &[
    always(BuildMachine),
    when(WhenBilling, CheckBalance),
    when(WhenBilling, UpdateStatus),
    always(UpdateMilestone),
    always(CreateMachine),
    when(WhenQuota, UpdateQuota),
    always(ResolveHostAddress),
    always(UpdateMilestone),
    always(UpdateStatus),
    always(UpdateHostAddress),
    always(UpdateStatus),
    always(SetFinalStatus),
    always(UpdateStatus),
    always(FollowLogs),
];

const DESTROY: &[Entry] = &[
    always(BuildMachine),
    always(UpdateStatus),
    always(UpdateMilestone),
    always(DestroyMachine),
    always(DestroyRoute),
    always(UpdateMilestone),
    always(UpdateStatus),
];

const SNAPSHOT_CREATE: &[Entry] = &[
    always(BuildMachine),
    always(UpdateStatus),
    always(CreateSnapshot),
    always(WaitSnapshotReady),
    always(RecordSnapshot),
    always(UpdateStatus),
];

const SNAPSHOT_DELETE: &[Entry] = &[
    always(BuildMachine),
    always(UpdateSnapshotStatus),
    always(UpdateStatus),
    always(RemoveSnapshot),
    always(UpdateStatus),
];

const DISK_ATTACH: &[Entry] = &[
    always(BuildMachine),
    always(UpdateStatus),
    always(AttachDisk),
    always(RecordDisk),
    always(UpdateStatus),
];

const DISK_DETACH: &[Entry] = &[
    always(BuildMachine),
    always(UpdateStatus),
    always(DetachDisk),
    always(UpdateStatus),
];

const SET_STATE: &[Entry] = &[
    always(BuildMachine),
    always(ChangeState),
    when(WhenPublicIp, UpdateStatus),
    when(WhenPublicIp, AddRoute),
    always(UpdateStatus),
    always(SetFinalState),
    always(UpdateStatus),
];

const START: &[Entry] = &[
    always(BuildMachine),
    always(UpdateStatus),
    always(StartMachine),
    always(UpdateMilestone),
    always(UpdateStatus),
];

const STOP: &[Entry] = &[
    always(BuildMachine),
    always(UpdateStatus),
    always(StopMachine),
    always(UpdateMilestone),
    always(UpdateStatus),
];

const RESTART: &[Entry] = &[
    always(BuildMachine),
    always(UpdateStatus),
    always(RestartMachine),
    always(UpdateMilestone),
    always(UpdateStatus),
];

const SET_STATUS: &[Entry] = &[always(BuildMachine), always(UpdateStatus)];

/// Returns the ordered steps of `operation` under `conditions`.
#[must_use]
pub fn sequence(operation: Operation, conditions: &Conditions) -> Vec<StepId> {
    operation
        .entries()
        .iter()
        .filter(|entry| entry.when.holds(conditions))
        .map(|entry| entry.step)
        .collect()
}

/// Assembles the pipeline for `operation` under `conditions`.
#[must_use]
pub fn build(operation: Operation, conditions: &Conditions) -> Pipeline<MachineArgs> {
    let steps = sequence(operation, conditions)
        .into_iter()
        .map(actions::step_for)
        .collect();
    Pipeline::new(operation.name(), steps)
}
