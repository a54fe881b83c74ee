//! Credit check and quota binding.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::context::{ForwardContext, MachineArgs};
use crate::core::{MachineState, MachineStatus, StepResult};
use crate::errors::{ProvisionError, Result};
use crate::pipeline::StepId;
use crate::stages::Step;

/// Refuses the deploy when the account cannot pay for the machine.
///
/// A refusal parks the machine and marks it as short of funds before the
/// error is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckBalance;

#[async_trait]
impl Step<MachineArgs> for CheckBalance {
    fn name(&self) -> &str {
        StepId::CheckBalance.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?.clone();
        let context = &args.provisioner;

        args.info(format!(" balance check for user ({})", args.spec.account_id));

        if let Err(err) = context.billing().check_credits(&machine, &args.spec).await {
            let store = context.store();
            if let Err(store_err) = store.set_milestone(&machine, MachineState::Parked).await {
                warn!(machine = %machine.name, error = %store_err, "Could not park machine");
            }
            if let Err(store_err) = store
                .set_status(&machine, MachineStatus::InsufficientFund)
                .await
            {
                warn!(machine = %machine.name, error = %store_err, "Could not mark insufficient funds");
            }
            args.error(format!(" balance check for user ({}) FAILED: {err}", args.spec.account_id));
            return Err(err.into());
        }

        args.info(format!(" balance check for user ({}) OK", args.spec.account_id));
        Ok(machine.with_status(MachineStatus::BalanceVerified).into())
    }
}

/// Binds the machine spec's quota to the freshly created machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateQuota;

#[async_trait]
impl Step<MachineArgs> for UpdateQuota {
    fn name(&self) -> &str {
        StepId::UpdateQuota.name()
    }

    fn min_params(&self) -> usize {
        1
    }

    async fn forward(&self, ctx: &ForwardContext<'_, MachineArgs>) -> Result<StepResult> {
        let args = ctx.args()?;
        let machine = ctx.previous_machine()?.clone();

        let Some(quota_id) = args.spec.quota_id.as_deref().filter(|q| !q.is_empty()) else {
            return Err(ProvisionError::InvalidSpec(format!(
                "machine '{}' has no quota to bind",
                machine.name
            )));
        };

        args.info(format!(" update quota {quota_id} for machine ({})", machine.name));
        args.provisioner.store().set_quota(&machine, quota_id).await?;
        info!(machine = %machine.name, quota = quota_id, "Quota bound");
        args.info(format!(" update quota {quota_id} for machine ({}) OK", machine.name));

        Ok(machine.with_status(MachineStatus::QuotaUpdated).into())
    }
}
