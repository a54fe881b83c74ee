//! Snapshot and disk steps.

use async_trait::async_trait;
use tracing::warn;

use super::rollback_notice;
use crate::context::{BackwardContext, ForwardContext, MachineArgs};
use crate::core::{MachineStatus, StepResult};
use crate::errors::{ProvisionError, Result};
use crate::pipeline::{wait_until, StepId};
use crate::provisioner::ProvisionerContext;
use crate::stages::Step;

fn missing(ctx: &ForwardContext<'_, MachineArgs>, expected: &'static str) -> ProvisionError {
    ProvisionError::UnexpectedResult {
        step: ctx.step().to_string(),
        expected,
        found: "machine",
    }
}

/// Starts a disk snapshot of the machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateSnapshot;

#[async_trait]
impl Step<MachineArgs> for CreateSnapshot {
    fn name(&self) -> &str {
        StepId::CreateSnapshot.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let mut machine = ctx.previous_machine()?.clone();

        args.info(format!("  creating snapshot machine {} ----", machine.name));
        let snapshot_id = args.provisioner.backend().create_snapshot(&machine).await?;
        machine.snapshot_id = Some(snapshot_id);
        args.info(format!(" creating snapshot machine ({}, {}) OK", machine.id, machine.name));

        Ok(machine.with_status(MachineStatus::SnapCreated).into())
    }

    async fn backward(&self, ctx: &BackwardContext<'_, MachineArgs>) -> Result<()> {
        let args = ctx.args()?;
        let machine = ctx.machine()?;
        let context = &args.provisioner;

        if let Err(err) = context.backend().remove_snapshot(machine).await {
            warn!(machine = %machine.name, error = %err, "Could not remove snapshot");
            args.error(format!("  snapshot remove failure error ({}) {err}", machine.name));
        }
        if let Err(err) = context
            .store()
            .set_snapshot_status(machine, MachineStatus::Error)
            .await
        {
            warn!(machine = %machine.name, error = %err, "Could not mark snapshot as failed");
            args.error(format!("  snapshot create failure update error ({}) {err}", machine.name));
        }
        Ok(())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

/// Waits until the backend reports the snapshot finished.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitSnapshotReady;

#[async_trait]
impl Step<MachineArgs> for WaitSnapshotReady {
    fn name(&self) -> &str {
        StepId::WaitSnapshotReady.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?;
        let context: &ProvisionerContext = &args.provisioner;

        args.info(format!(" waiting to snapshot creating for machine ({})", machine.name));
        let what = format!("snapshot of {}", machine.name);
        wait_until(context.poll(), &what, move || async move {
            Ok::<_, ProvisionError>(context.backend().snapshot_ready(machine).await?)
        })
        .await?;
        args.info(format!(" waiting to snapshot creating for machine ({}) OK", machine.name));

        Ok(machine.clone().with_status(MachineStatus::Running).into())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

/// Records the snapshot id against the machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordSnapshot;

#[async_trait]
impl Step<MachineArgs> for RecordSnapshot {
    fn name(&self) -> &str {
        StepId::RecordSnapshot.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?;
        let snapshot_id = machine
            .snapshot_id
            .as_deref()
            .ok_or_else(|| missing(ctx, "machine with snapshot id"))?;

        args.provisioner
            .store()
            .record_snapshot(machine, snapshot_id)
            .await?;
        args.info(format!(" update snapshot {snapshot_id} for machine ({}) OK", machine.name));

        Ok(machine.clone().into())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

/// Persists the status of the machine's snapshot record.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateSnapshotStatus;

#[async_trait]
impl Step<MachineArgs> for UpdateSnapshotStatus {
    fn name(&self) -> &str {
        StepId::UpdateSnapshotStatus.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?;

        args.provisioner
            .store()
            .set_snapshot_status(machine, machine.status)
            .await?;
        args.info(format!(" update snapshot status for machine ({}, {}) OK", machine.name, machine.status));

        Ok(machine.clone().into())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

/// Removes the machine's snapshot from the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveSnapshot;

#[async_trait]
impl Step<MachineArgs> for RemoveSnapshot {
    fn name(&self) -> &str {
        StepId::RemoveSnapshot.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?.clone();

        args.info(format!(" remove snapshot for machine ({})", machine.name));
        args.provisioner.backend().remove_snapshot(&machine).await?;
        args.info(format!(" remove snapshot for machine ({}) OK", machine.name));

        Ok(machine.with_status(MachineStatus::SnapDeleted).into())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

/// Attaches a new disk to the machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachDisk;

#[async_trait]
impl Step<MachineArgs> for AttachDisk {
    fn name(&self) -> &str {
        StepId::AttachDisk.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let mut machine = ctx.previous_machine()?.clone();

        args.info(format!("  attaching new disk to machine {} ----", machine.name));
        let disk_id = args.provisioner.backend().attach_disk(&machine).await?;
        machine.disk_id = Some(disk_id);
        args.info(format!("  attaching new disk to machine ({}, {}) OK", machine.id, machine.name));

        Ok(machine.with_status(MachineStatus::DiskAttached).into())
    }

    async fn backward(&self, ctx: &BackwardContext<'_, MachineArgs>) -> Result<()> {
        let args = ctx.args()?;
        let machine = ctx.machine()?;
        if let Err(err) = args.provisioner.backend().detach_disk(machine).await {
            args.error(format!("  detaching new disk failure error ({}) {err}", machine.name));
            return Err(err.into());
        }
        Ok(())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

/// Records the attached disk against the machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordDisk;

#[async_trait]
impl Step<MachineArgs> for RecordDisk {
    fn name(&self) -> &str {
        StepId::RecordDisk.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?;
        let disk_id = machine
            .disk_id
            .as_deref()
            .ok_or_else(|| missing(ctx, "machine with disk id"))?;

        args.provisioner.store().record_disk(machine, disk_id).await?;
        args.info(format!(" update disks for machine ({}, {disk_id}) OK", machine.name));

        Ok(machine.clone().into())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

/// Detaches the machine's disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachDisk;

#[async_trait]
impl Step<MachineArgs> for DetachDisk {
    fn name(&self) -> &str {
        StepId::DetachDisk.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?.clone();

        args.info(format!("  detaching disk from machine {} ----", machine.name));
        args.provisioner.backend().detach_disk(&machine).await?;
        args.info(format!("  detaching disk from machine ({}, {}) OK", machine.id, machine.name));

        Ok(machine.with_status(MachineStatus::DiskDetached).into())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::BuildMachine;
    use crate::testing::{
        fake_context, run_backward, run_forward, test_settings, test_spec, FakeBackend, Fakes,
    };
    use pretty_assertions::assert_eq;

    async fn built(args: &MachineArgs) -> StepResult {
        run_forward(&BuildMachine, args, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_create_wait_record() {
        let fakes = Fakes::with(FakeBackend::new().settle_after(2), test_settings());
        let args = fakes.args(test_spec(), MachineStatus::SnapCreating);
        let previous = built(&args).await;

        let created = run_forward(&CreateSnapshot, &args, Some(&previous)).await.unwrap();
        let snapshot_id = created.as_machine().unwrap().snapshot_id.clone().unwrap();
        assert!(snapshot_id.starts_with("snap-"));

        let ready = run_forward(&WaitSnapshotReady, &args, Some(&created)).await.unwrap();
        assert_eq!(ready.as_machine().unwrap().status, MachineStatus::Running);

        run_forward(&RecordSnapshot, &args, Some(&ready)).await.unwrap();
        assert_eq!(fakes.store.record("m-1").unwrap().snapshots, vec![snapshot_id]);
    }

    #[tokio::test]
    async fn test_snapshot_backward_marks_error_even_when_removal_fails() {
        let fakes = fake_context();
        fakes.backend.fail_on("remove_snapshot");
        let args = fakes.args(test_spec(), MachineStatus::SnapCreating);
        let previous = built(&args).await;
        let created = run_forward(&CreateSnapshot, &args, Some(&previous)).await.unwrap();

        run_backward(&CreateSnapshot, &args, &created).await.unwrap();

        assert_eq!(
            fakes.store.record("m-1").unwrap().snapshot_statuses,
            vec![MachineStatus::Error]
        );
    }

    #[tokio::test]
    async fn test_record_snapshot_needs_id() {
        let fakes = fake_context();
        let args = fakes.args(test_spec(), MachineStatus::SnapCreating);
        let previous = built(&args).await;

        let err = run_forward(&RecordSnapshot, &args, Some(&previous)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::UnexpectedResult { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_delete_steps() {
        let fakes = fake_context();
        let args = fakes.args(test_spec(), MachineStatus::SnapDeleting);
        let previous = built(&args).await;

        run_forward(&UpdateSnapshotStatus, &args, Some(&previous)).await.unwrap();
        let removed = run_forward(&RemoveSnapshot, &args, Some(&previous)).await.unwrap();

        assert_eq!(
            fakes.store.record("m-1").unwrap().snapshot_statuses,
            vec![MachineStatus::SnapDeleting]
        );
        assert_eq!(removed.as_machine().unwrap().status, MachineStatus::SnapDeleted);
    }

    #[tokio::test]
    async fn test_disk_attach_record_and_compensate() {
        let fakes = fake_context();
        let args = fakes.args(test_spec(), MachineStatus::DiskAttaching);
        let previous = built(&args).await;

        let attached = run_forward(&AttachDisk, &args, Some(&previous)).await.unwrap();
        let disk_id = attached.as_machine().unwrap().disk_id.clone().unwrap();
        assert_eq!(attached.as_machine().unwrap().status, MachineStatus::DiskAttached);

        run_forward(&RecordDisk, &args, Some(&attached)).await.unwrap();
        assert_eq!(fakes.store.record("m-1").unwrap().disks, vec![disk_id]);

        run_backward(&AttachDisk, &args, &attached).await.unwrap();
        assert!(fakes
            .backend
            .calls()
            .contains(&"detach_disk:web.example.com".to_string()));
    }

    #[tokio::test]
    async fn test_disk_detach() {
        let fakes = fake_context();
        let args = fakes.args(test_spec(), MachineStatus::DiskDetaching);
        let previous = built(&args).await;

        let detached = run_forward(&DetachDisk, &args, Some(&previous)).await.unwrap();
        assert_eq!(detached.as_machine().unwrap().status, MachineStatus::DiskDetached);
    }
}
