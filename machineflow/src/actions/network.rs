//! State-change requests and DNS routes.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::{BackwardContext, ForwardContext, MachineArgs};
use crate::core::{MachineState, MachineStatus, StepResult};
use crate::errors::Result;
use crate::pipeline::StepId;
use crate::stages::Step;

/// Asks downstream agents to move the machine to the requested status.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeState;

#[async_trait]
impl Step<MachineArgs> for ChangeState {
    fn name(&self) -> &str {
        StepId::ChangeState.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?.clone();
        let context = &args.provisioner;

        args.info(format!("  change state of machine ({}, {})", machine.name, args.status));

        if let Err(err) = context
            .store()
            .set_status(&machine, MachineStatus::StateUpping)
            .await
        {
            args.error(format!("  error change state of machine ( {})", machine.name));
            return Err(err.into());
        }
        if let Err(err) = context.publisher().state_changed(&machine, args.status).await {
            args.error(format!("  error publish state change of machine ( {})", machine.name));
            return Err(err.into());
        }

        let next = if args.spec.public_ip().is_some() {
            MachineStatus::NetworkCreating
        } else {
            MachineStatus::NetworkSkipped
        };
        args.info(format!("  change state of machine ({}, {}) OK", machine.name, args.status));
        Ok(machine.with_status(next).into())
    }

    async fn backward(&self, ctx: &BackwardContext<'_, MachineArgs>) -> Result<()> {
        let args = ctx.args()?;
        args.provisioner
            .store()
            .set_status(ctx.machine()?, MachineStatus::Error)
            .await?;
        Ok(())
    }
}

/// Points the machine's name at its public address.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddRoute;

#[async_trait]
impl Step<MachineArgs> for AddRoute {
    fn name(&self) -> &str {
        StepId::AddRoute.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let mut machine = ctx.previous_machine()?.clone();
        let address = args.spec.public_ip().unwrap_or_default();
        let router = args.provisioner.router_for(&args.spec)?;

        args.info(format!("adding route to machine ({}, {address})", machine.name));
        router.set_cname(&machine.name, address).await?;
        machine.set_routable(Some(address));
        args.info(format!("adding route to machine ({}, {address}) OK", machine.name));

        Ok(machine.with_status(MachineStatus::NetworkCreated).into())
    }

    async fn backward(&self, ctx: &BackwardContext<'_, MachineArgs>) -> Result<()> {
        let args = ctx.args()?;
        let machine = ctx.machine()?;
        if !machine.routable {
            return Ok(());
        }

        let address = args.spec.public_ip().unwrap_or_default();
        args.info(format!("   destroy routes from created machine ({}, {})", machine.id, machine.name));
        let router = args.provisioner.router_for(&args.spec)?;
        if let Err(err) = router.unset_cname(&machine.name, address).await {
            args.error(format!("   destroy route error ({}, {address}) {err}", machine.name));
            return Err(err.into());
        }
        Ok(())
    }
}

/// Removes the route of a machine being destroyed and marks it destroyed.
///
/// Machines without a public address have no route and skip the router.
#[derive(Debug, Clone, Copy, Default)]
pub struct DestroyRoute;

#[async_trait]
impl Step<MachineArgs> for DestroyRoute {
    fn name(&self) -> &str {
        StepId::DestroyRoute.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let mut machine = ctx.previous_machine()?.clone();
        let address = args.spec.public_ip();
        machine.set_routable(address);

        args.info("destroy routes from created machine");
        if let (true, Some(address)) = (machine.routable, address) {
            let router = args.provisioner.router_for(&args.spec)?;
            if let Err(err) = router.unset_cname(&machine.name, address).await {
                args.error(format!("destroy route error ({}, {address}) {err}", machine.name));
                return Err(err.into());
            }
            args.info(format!("  destroy route from machine ({}, {address})", machine.name));
        } else {
            debug!(machine = %machine.name, "No public address, no route to remove");
            args.info(format!("  skip destroy routes from created machine ({}) OK", machine.name));
        }

        Ok(machine
            .with_status(MachineStatus::Destroyed)
            .with_state(MachineState::Destroyed)
            .into())
    }

    async fn backward(&self, ctx: &BackwardContext<'_, MachineArgs>) -> Result<()> {
        let args = ctx.args()?;
        let machine = ctx.machine()?;
        let Some(address) = args.spec.public_ip().filter(|_| machine.routable) else {
            return Ok(());
        };

        args.info("  adding back routes to old machine");
        let router = args.provisioner.router_for(&args.spec)?;
        if let Err(err) = router.set_cname(&machine.name, address).await {
            warn!(machine = %machine.name, error = %err, "Could not restore route");
            args.error(format!("   adding back route error ({}, {address}) {err}", machine.name));
            return Err(err.into());
        }
        Ok(())
    }
}
