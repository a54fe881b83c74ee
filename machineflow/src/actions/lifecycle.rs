//! Steps that create, remove and power-cycle the backend VM.

use async_trait::async_trait;
use tracing::{error, warn};

use super::rollback_notice;
use crate::backend::{LifecycleOp, PowerState};
use crate::context::{BackwardContext, ForwardContext, MachineArgs};
use crate::core::{Machine, MachineState, MachineStatus, StepResult};
use crate::errors::{BackendError, ProvisionError, Result};
use crate::pipeline::{wait_until, StepId};
use crate::provisioner::ProvisionerContext;
use crate::stages::Step;

/// Creates the backend VM.
///
/// A failed create marks the machine as pre-error before the error is
/// returned. Compensation removes the VM again.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateMachine;

#[async_trait]
impl Step<MachineArgs> for CreateMachine {
    fn name(&self) -> &str {
        StepId::CreateMachine.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let mut machine = ctx.previous_machine()?.clone();
        let context = &args.provisioner;

        context.store().set_status(&machine, machine.status).await?;
        args.info(format!(
            " create machine for box ({}, image:{})",
            machine.name, machine.image
        ));

        let vm_id = match context.backend().create(&machine, &args.spec.compute).await {
            Ok(id) => id,
            Err(err) => {
                if let Err(store_err) = context
                    .store()
                    .set_status(&machine, MachineStatus::PreError)
                    .await
                {
                    warn!(machine = %machine.name, error = %store_err, "Could not mark machine as pre-error");
                }
                return Err(err.into());
            }
        };

        machine.vm_id = Some(vm_id);
        machine.state = MachineState::Initialized;
        args.info(format!(
            " create machine for box ({}, image:{}) OK",
            machine.name, machine.image
        ));
        Ok(machine.into())
    }

    async fn backward(&self, ctx: &BackwardContext<'_, MachineArgs>) -> Result<()> {
        let args = ctx.args()?;
        let machine = ctx.machine()?;
        if machine.vm_id.is_none() {
            return Ok(());
        }

        args.info(format!("  removing machine {}", machine.name));
        if let Err(err) = args.provisioner.backend().remove(machine).await {
            args.error(format!("  removing err machine {err}"));
            return Err(err.into());
        }
        Ok(())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

/// Resolves the VM's console endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveHostAddress;

#[async_trait]
impl Step<MachineArgs> for ResolveHostAddress {
    fn name(&self) -> &str {
        StepId::ResolveHostAddress.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let mut machine = ctx.previous_machine()?.clone();

        let address = args.provisioner.backend().host_address(&machine).await?;
        machine.host_address = Some(address);
        Ok(machine.with_status(MachineStatus::VncHostUpdating).into())
    }
}

/// Persists the resolved console endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateHostAddress;

#[async_trait]
impl Step<MachineArgs> for UpdateHostAddress {
    fn name(&self) -> &str {
        StepId::UpdateHostAddress.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?.clone();

        let Some(address) = &machine.host_address else {
            return Err(ProvisionError::UnexpectedResult {
                step: ctx.step().to_string(),
                expected: "machine with host address",
                found: "machine",
            });
        };
        args.provisioner
            .store()
            .set_host_address(&machine, address)
            .await?;

        Ok(machine.with_status(MachineStatus::VncHostUpdated).into())
    }

    async fn backward(&self, ctx: &BackwardContext<'_, MachineArgs>) -> Result<()> {
        let args = ctx.args()?;
        args.provisioner
            .store()
            .set_status(ctx.machine()?, MachineStatus::PreError)
            .await?;
        Ok(())
    }
}

/// Streams the VM's boot log into the progress output.
///
/// Terminal deploy step: returns the image id as text. A broken log
/// stream fails the deploy, which unwinds the machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct FollowLogs;

#[async_trait]
impl Step<MachineArgs> for FollowLogs {
    fn name(&self) -> &str {
        StepId::FollowLogs.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?;

        if let Err(err) = args.provisioner.backend().logs(machine, &args.writer).await {
            error!(machine = %machine.name, error = %err, "Log stream ended with an error");
            return Err(err.into());
        }
        Ok(StepResult::Text(args.image_id.clone()))
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

/// Removes the backend VM of a machine being destroyed.
///
/// Removal cannot be undone, so compensation only reports it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DestroyMachine;

#[async_trait]
impl Step<MachineArgs> for DestroyMachine {
    fn name(&self) -> &str {
        StepId::DestroyMachine.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?;

        args.info(format!("  destroying old machine {} ----", machine.name));
        if machine.vm_id.is_some() {
            args.provisioner.backend().remove(machine).await?;
        } else {
            args.info(format!("  no backend instance for {}, skipping", machine.name));
        }
        args.info(format!("  destroyed old machine ({}, {}) OK", machine.id, machine.name));

        Ok(machine.clone().into())
    }

    async fn backward(&self, ctx: &BackwardContext<'_, MachineArgs>) -> Result<()> {
        let args = ctx.args()?;
        let machine = ctx.machine()?;
        args.error(format!("  machine {} was removed and cannot be restored", machine.name));
        warn!(machine = %machine.name, "Destroyed machine cannot be restored");
        Ok(())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

/// Start, stop or restart the VM.
///
/// Start and stop block until the backend reports the target power
/// state; restart returns as soon as the backend accepts it.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleStep {
    id: StepId,
    op: LifecycleOp,
    target: Option<PowerState>,
    done: MachineStatus,
}

impl LifecycleStep {
    /// Powers the VM on and waits until it runs.
    #[must_use]
    pub const fn start() -> Self {
        Self {
            id: StepId::StartMachine,
            op: LifecycleOp::Start,
            target: Some(PowerState::Running),
            done: MachineStatus::Started,
        }
    }

    /// Powers the VM off and waits until it is off.
    #[must_use]
    pub const fn stop() -> Self {
        Self {
            id: StepId::StopMachine,
            op: LifecycleOp::Stop,
            target: Some(PowerState::Poweroff),
            done: MachineStatus::Stopped,
        }
    }

    /// Reboots the VM.
    #[must_use]
    pub const fn restart() -> Self {
        Self {
            id: StepId::RestartMachine,
            op: LifecycleOp::Restart,
            target: None,
            done: MachineStatus::Running,
        }
    }

    fn verb(&self) -> &'static str {
        match self.op {
            LifecycleOp::Start => "starting",
            LifecycleOp::Stop => "stopping",
            LifecycleOp::Restart => "restarting",
        }
    }

    async fn run(&self, context: &ProvisionerContext, machine: &Machine) -> Result<()> {
        context.backend().lifecycle(machine, self.op).await?;
        if let Some(target) = self.target {
            wait_for_power(context, machine, target).await?;
        }
        Ok(())
    }
}

/// Polls the backend until the VM reports `target`.
///
/// A VM the backend reports as failed ends the wait with an error.
async fn wait_for_power(context: &ProvisionerContext, machine: &Machine, target: PowerState) -> Result<u32> {
    let what = format!("{} to reach {target}", machine.name);
    wait_until(context.poll(), &what, move || async move {
        let state = context.backend().power_state(machine).await?;
        if state == PowerState::Failed {
            return Err(ProvisionError::from(BackendError::new(
                "power_state",
                machine.name.as_str(),
                format!("VM failed while waiting for {target}"),
            )));
        }
        Ok::<_, ProvisionError>(state == target)
    })
    .await
}

#[async_trait]
impl Step<MachineArgs> for LifecycleStep {
    fn name(&self) -> &str {
        self.id.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?.clone();

        args.info(format!("  {} machine {}", self.verb(), machine.name));
        if let Err(err) = self.run(&args.provisioner, &machine).await {
            args.error(format!("  error {} machine ( {})", self.op, machine.name));
            return Err(err);
        }
        args.info(format!("  {} machine ({}, {}) OK", self.verb(), machine.id, machine.name));

        Ok(machine.with_status(self.done).into())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}
