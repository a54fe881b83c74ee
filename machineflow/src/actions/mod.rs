//! The machine steps composed by the pipeline catalog.
//!
//! Every step takes a single [`MachineArgs`] parameter and, apart from
//! the first, threads the [`crate::core::Machine`] produced by its
//! predecessor.

mod billing;
mod entity;
mod lifecycle;
mod network;
mod storage;

pub use billing::{CheckBalance, UpdateQuota};
pub use entity::{BuildMachine, SetFinalState, SetFinalStatus, UpdateMilestone, UpdateStatus};
pub use lifecycle::{
    CreateMachine, DestroyMachine, FollowLogs, LifecycleStep, ResolveHostAddress,
    UpdateHostAddress,
};
pub use network::{AddRoute, ChangeState, DestroyRoute};
pub use storage::{
    AttachDisk, CreateSnapshot, DetachDisk, RecordDisk, RecordSnapshot, RemoveSnapshot,
    UpdateSnapshotStatus, WaitSnapshotReady,
};

use crate::context::{ForwardContext, MachineArgs};
use crate::errors::ProvisionError;
use crate::pipeline::StepId;
use crate::stages::Step;
use std::sync::Arc;

/// Returns the step implementing a catalog entry.
#[must_use]
pub fn step_for(id: StepId) -> Arc<dyn Step<MachineArgs>> {
    match id {
        StepId::BuildMachine => Arc::new(BuildMachine),
        StepId::UpdateStatus => Arc::new(UpdateStatus),
        StepId::CheckBalance => Arc::new(CheckBalance),
        StepId::UpdateMilestone => Arc::new(UpdateMilestone),
        StepId::CreateMachine => Arc::new(CreateMachine),
        StepId::UpdateQuota => Arc::new(UpdateQuota),
        StepId::ResolveHostAddress => Arc::new(ResolveHostAddress),
        StepId::UpdateHostAddress => Arc::new(UpdateHostAddress),
        StepId::SetFinalStatus => Arc::new(SetFinalStatus),
        StepId::FollowLogs => Arc::new(FollowLogs),
        StepId::DestroyMachine => Arc::new(DestroyMachine),
        StepId::DestroyRoute => Arc::new(DestroyRoute),
        StepId::StartMachine => Arc::new(LifecycleStep::start()),
        StepId::StopMachine => Arc::new(LifecycleStep::stop()),
        StepId::RestartMachine => Arc::new(LifecycleStep::restart()),
        StepId::ChangeState => Arc::new(ChangeState),
        StepId::AddRoute => Arc::new(AddRoute),
        StepId::SetFinalState => Arc::new(SetFinalState),
        StepId::CreateSnapshot => Arc::new(CreateSnapshot),
        StepId::WaitSnapshotReady => Arc::new(WaitSnapshotReady),
        StepId::RecordSnapshot => Arc::new(RecordSnapshot),
        StepId::UpdateSnapshotStatus => Arc::new(UpdateSnapshotStatus),
        StepId::RemoveSnapshot => Arc::new(RemoveSnapshot),
        StepId::AttachDisk => Arc::new(AttachDisk),
        StepId::RecordDisk => Arc::new(RecordDisk),
        StepId::DetachDisk => Arc::new(DetachDisk),
    }
}

/// Error hook shared by steps with external side effects: tells the
/// progress reader that a rollback is under way.
pub(crate) fn rollback_notice(ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
    if let Ok(args) = ctx.args() {
        args.error(format!("==> ROLLBACK     {error}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MachineStatus;
    use crate::errors::BackendError;
    use crate::pipeline::Operation;
    use crate::testing::{fake_context, test_spec, ProgressBuffer};

    #[test]
    fn test_step_names_match_catalog() {
        for operation in Operation::ALL {
            for entry in operation.entries() {
                assert_eq!(step_for(entry.step).name(), entry.step.name());
            }
        }
    }

    #[test]
    fn test_rollback_notice_writes_error_line() {
        let fakes = fake_context();
        let buffer = ProgressBuffer::new();
        let args = fakes
            .args(test_spec(), MachineStatus::Launching)
            .with_writer(buffer.writer());
        let params = [args];
        let ctx = ForwardContext::new("create-machine", &params, None);

        let error = ProvisionError::from(BackendError::new("create", "web.example.com", "quota"));
        rollback_notice(&ctx, &error);

        let errors = buffer.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("==> ROLLBACK"));
        assert!(errors[0].contains("quota"));
    }
}
