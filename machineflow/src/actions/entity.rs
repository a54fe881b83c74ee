//! Steps that build the working machine and persist its status and milestone.

use async_trait::async_trait;
use tracing::warn;

use super::rollback_notice;
use crate::context::{BackwardContext, ForwardContext, MachineArgs};
use crate::core::{Machine, MachineState, MachineStatus, StepResult};
use crate::errors::{ProvisionError, Result};
use crate::pipeline::StepId;
use crate::stages::Step;

/// Builds the working machine from the caller's spec.
///
/// Always the first step: it reads only the parameter bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildMachine;

#[async_trait]
impl Step<MachineArgs> for BuildMachine {
    fn name(&self) -> &str {
        StepId::BuildMachine.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let name = args.spec.full_name();
        args.info(format!(" creating struct machine ({name}, {})", args.status));

        let machine = Machine::from_spec(
            &args.spec,
            args.status,
            args.state,
            args.image_id.clone(),
            args.provisioner.settings().vcpu_throttle.clone(),
        );

        args.info(format!(" creating struct machine ({name}, {}) OK", args.status));
        Ok(machine.into())
    }
}

/// Persists the machine's current status.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateStatus;

#[async_trait]
impl Step<MachineArgs> for UpdateStatus {
    fn name(&self) -> &str {
        StepId::UpdateStatus.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?.clone();

        args.info(format!(" update status for machine ({}, {})", machine.name, machine.status));
        args.provisioner
            .store()
            .set_status(&machine, machine.status)
            .await?;
        args.info(format!(" update status for machine ({}, {}) OK", machine.name, machine.status));

        Ok(machine.into())
    }

    async fn backward(&self, ctx: &BackwardContext<'_, MachineArgs>) -> Result<()> {
        let args = ctx.args()?;
        let machine = ctx.machine()?;
        args.provisioner
            .store()
            .set_status(machine, MachineStatus::PreError)
            .await?;
        Ok(())
    }
}

/// Persists the machine's lifecycle milestone.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateMilestone;

#[async_trait]
impl Step<MachineArgs> for UpdateMilestone {
    fn name(&self) -> &str {
        StepId::UpdateMilestone.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?.clone();

        args.info(format!(" update milestone state for machine ({}, {})", machine.name, machine.state));
        args.provisioner
            .store()
            .set_milestone(&machine, machine.state)
            .await?;
        args.info(format!(" update milestone state for machine ({}, {}) OK", machine.name, machine.state));

        Ok(machine.into())
    }

    async fn backward(&self, ctx: &BackwardContext<'_, MachineArgs>) -> Result<()> {
        let args = ctx.args()?;
        let machine = ctx.machine()?;
        args.info(format!("---- state changing backward for {} ----", machine.name));

        if let Err(err) = args
            .provisioner
            .store()
            .set_milestone(machine, MachineState::PreError)
            .await
        {
            warn!(machine = %machine.name, error = %err, "Could not mark milestone as pre-error");
            return Err(err.into());
        }
        Ok(())
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, MachineArgs>, error: &ProvisionError) {
        rollback_notice(ctx, error);
    }
}

/// Marks the machine as booting.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetFinalStatus;

#[async_trait]
impl Step<MachineArgs> for SetFinalStatus {
    fn name(&self) -> &str {
        StepId::SetFinalStatus.name()
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let machine = ctx.previous_machine()?.clone();
        Ok(machine.with_status(MachineStatus::VmBooting).into())
    }
}

/// Marks a state transition as complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetFinalState;

#[async_trait]
impl Step<MachineArgs> for SetFinalState {
    fn name(&self) -> &str {
        StepId::SetFinalState.name()
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let machine = ctx.previous_machine()?.clone();
        Ok(machine.with_status(MachineStatus::StateUpped).into())
    }
}
