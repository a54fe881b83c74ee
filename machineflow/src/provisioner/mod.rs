//! The provisioner: every public machine operation.
//!
//! Each operation builds a [`MachineArgs`] bundle with the operation's
//! target status and state, validates the caller's spec, assembles the
//! catalog pipeline for the machine spec's conditions and runs it. Done
//! notifications are sent only by deploy, destroy and set-state, and
//! never change the operation's result.

mod builder;
mod context;

#[cfg(test)]
mod scenario_tests;

pub use builder::ProvisionerBuilder;
pub use context::{ProvisionerContext, ProvisionerSettings};

use std::sync::Arc;

use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::context::MachineArgs;
use crate::core::{MachineSpec, MachineState, MachineStatus, Repo, StepResult};
use crate::errors::{ProvisionError, Result};
use crate::events::Outcome;
use crate::observability::{PipelineSpanAttributes, SpanTimer};
use crate::pipeline::{build, Conditions, Operation};
use crate::progress::{LogSource, ProgressWriter};

/// Drives machine operations against a shared [`ProvisionerContext`].
#[derive(Debug, Clone)]
pub struct Provisioner {
    ctx: Arc<ProvisionerContext>,
}

impl Provisioner {
    /// Starts building a provisioner.
    #[must_use]
    pub fn builder() -> ProvisionerBuilder {
        ProvisionerBuilder::new()
    }

    /// Wraps an existing context.
    #[must_use]
    pub fn from_context(ctx: Arc<ProvisionerContext>) -> Self {
        Self { ctx }
    }

    /// Returns the shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<ProvisionerContext> {
        &self.ctx
    }

    /// One-line readiness report for the startup banner.
    #[must_use]
    pub fn startup_message(&self) -> String {
        let routers = self.ctx.router_names();
        if routers.is_empty() {
            "  > provisioner \tready".to_string()
        } else {
            format!("  > provisioner \tready (routers: {})", routers.join(", "))
        }
    }

    /// Resolves the image for a repository: the platform image, or the
    /// repository itself for one-click sources.
    #[must_use]
    pub fn build_image(&self, repo: &Repo) -> String {
        if repo.one_click {
            repo.source.clone()
        } else {
            self.ctx.settings.default_image.clone()
        }
    }

    /// Deploys a machine from its source repository.
    pub async fn git_deploy(&self, spec: &MachineSpec, writer: ProgressWriter) -> Result<String> {
        writer.info(
            LogSource::Deploy,
            format!("--- git deploy for box (git:{})", spec.repo.source),
        );
        let image = self.build_image(&spec.repo);
        self.deploy(spec, &image, writer).await
    }

    /// Deploys a machine from a registered image, falling back to the
    /// build image when the store does not know it.
    pub async fn image_deploy(
        &self,
        spec: &MachineSpec,
        image_id: &str,
        writer: ProgressWriter,
    ) -> Result<String> {
        let name = spec.full_name();
        if let Err(err) = spec.validate() {
            writer.error(LogSource::Deploy, format!("--- invalid box ({name}) --> {err}"));
            return Err(err);
        }
        writer.info(
            LogSource::Deploy,
            format!("--- deploy box ({name}, image:{image_id})"),
        );

        let known = match self.ctx.store().is_valid_image(&name, image_id).await {
            Ok(known) => known,
            Err(err) => {
                writer.error(
                    LogSource::Deploy,
                    format!("--- deploy box ({name}, image:{image_id}) --> {err}"),
                );
                return Err(err.into());
            }
        };
        let image = if known {
            image_id.to_string()
        } else {
            let fallback = self.build_image(&spec.repo);
            info!(machine = %name, requested = image_id, image = %fallback, "Unknown image, using build image");
            fallback
        };
        self.deploy(spec, &image, writer).await
    }

    /// Creates and boots a machine. Returns the image id it was built from.
    ///
    /// A failed deploy is announced with [`Outcome::Failure`].
    pub async fn deploy(
        &self,
        spec: &MachineSpec,
        image_id: &str,
        writer: ProgressWriter,
    ) -> Result<String> {
        let args = self
            .args(spec, MachineStatus::Launching, &writer)
            .with_state(MachineState::Initializing)
            .with_image(image_id)
            .deploying();
        Self::check(&args)?;
        let label = format!("deploy box ({}, image:{image_id})", spec.full_name());

        match self.run_reported(Operation::Deploy, args, &label).await {
            Ok(StepResult::Text(image)) => Ok(image),
            Ok(other) => Err(ProvisionError::UnexpectedResult {
                step: Operation::Deploy.name().to_string(),
                expected: "text",
                found: other.kind(),
            }),
            Err(err) => {
                self.notify(spec, Outcome::Failure).await;
                Err(err)
            }
        }
    }

    /// Removes a machine and its route. Announced with [`Outcome::Destroyed`],
    /// or [`Outcome::Failure`] when the pipeline fails.
    pub async fn destroy(&self, spec: &MachineSpec, writer: ProgressWriter) -> Result<()> {
        let args = self
            .args(spec, MachineStatus::Destroying, &writer)
            .with_state(MachineState::Destroying)
            .with_source(LogSource::Destroying);
        Self::check(&args)?;
        let label = format!("destroying box ({})", spec.full_name());

        match self.run_reported(Operation::Destroy, args, &label).await {
            Ok(_) => {
                self.notify(spec, Outcome::Destroyed).await;
                Ok(())
            }
            Err(err) => {
                self.notify(spec, Outcome::Failure).await;
                Err(err)
            }
        }
    }

    /// Snapshots the machine's disk.
    pub async fn save_image(&self, spec: &MachineSpec, writer: ProgressWriter) -> Result<()> {
        self.update(
            Operation::SnapshotCreate,
            spec,
            MachineStatus::SnapCreating,
            writer,
            "creating snapshot box",
        )
        .await
    }

    /// Removes the machine's snapshot.
    pub async fn delete_image(&self, spec: &MachineSpec, writer: ProgressWriter) -> Result<()> {
        self.update(
            Operation::SnapshotDelete,
            spec,
            MachineStatus::SnapDeleting,
            writer,
            "removing snapshot box",
        )
        .await
    }

    /// Attaches a new disk.
    pub async fn attach_disk(&self, spec: &MachineSpec, writer: ProgressWriter) -> Result<()> {
        self.update(
            Operation::DiskAttach,
            spec,
            MachineStatus::DiskAttaching,
            writer,
            "adding new storage to box",
        )
        .await
    }

    /// Detaches the machine's disk.
    pub async fn detach_disk(&self, spec: &MachineSpec, writer: ProgressWriter) -> Result<()> {
        self.update(
            Operation::DiskDetach,
            spec,
            MachineStatus::DiskDetaching,
            writer,
            "removing existing storage from box",
        )
        .await
    }

    /// Moves a machine to `status`, routing it when it has a public address.
    /// Announced with [`Outcome::Launched`].
    pub async fn set_state(
        &self,
        spec: &MachineSpec,
        status: MachineStatus,
        writer: ProgressWriter,
    ) -> Result<()> {
        let args = self.args(spec, status, &writer);
        Self::check(&args)?;
        let label = format!("stateto {}", spec.full_name());

        self.run_reported(Operation::SetState, args, &label).await?;
        self.notify(spec, Outcome::Launched).await;
        Ok(())
    }

    /// Powers a machine on and waits until it runs.
    pub async fn start(&self, spec: &MachineSpec, writer: ProgressWriter) -> Result<()> {
        self.power(
            Operation::Start,
            spec,
            (MachineStatus::Starting, MachineState::Running),
            (LogSource::Starting, "starting box"),
            writer,
        )
        .await
    }

    /// Powers a machine off and waits until it is down.
    pub async fn stop(&self, spec: &MachineSpec, writer: ProgressWriter) -> Result<()> {
        self.power(
            Operation::Stop,
            spec,
            (MachineStatus::Stopping, MachineState::Stopped),
            (LogSource::Stopping, "stopping box"),
            writer,
        )
        .await
    }

    /// Reboots a machine.
    pub async fn restart(&self, spec: &MachineSpec, writer: ProgressWriter) -> Result<()> {
        self.power(
            Operation::Restart,
            spec,
            (MachineStatus::Bootstrapped, MachineState::Running),
            (LogSource::Restarting, "restarting box"),
            writer,
        )
        .await
    }

    /// Persists a status label and nothing else.
    pub async fn set_box_status(
        &self,
        spec: &MachineSpec,
        status: MachineStatus,
        writer: ProgressWriter,
    ) -> Result<()> {
        let args = self.args(spec, status, &writer);
        Self::check(&args)?;
        let label = format!("status {} box {status}", spec.full_name());

        if let Err(err) = self.run_reported(Operation::SetStatus, args, &label).await {
            error!(machine = %spec.full_name(), error = %err, "Status pipeline failed");
            return Err(err);
        }
        Ok(())
    }

    /// Looks up the address the machine's router maps its name to.
    pub async fn addr(&self, spec: &MachineSpec) -> Result<String> {
        let name = spec.full_name();
        let router = self.ctx.router_for(spec).map_err(|err| {
            error!(machine = %name, error = %err, "Failed to get router");
            err
        })?;
        router.addr(&name).await.map_err(|err| {
            error!(machine = %name, error = %err, "Failed to obtain machine address");
            err.into()
        })
    }

    /// Points the alias `cname` at the machine's name.
    pub async fn set_cname(&self, spec: &MachineSpec, cname: &str) -> Result<()> {
        let router = self.ctx.router_for(spec)?;
        router.set_cname(cname, &spec.full_name()).await?;
        Ok(())
    }

    /// Removes the alias `cname`.
    pub async fn unset_cname(&self, spec: &MachineSpec, cname: &str) -> Result<()> {
        let router = self.ctx.router_for(spec)?;
        router.unset_cname(cname, &spec.full_name()).await?;
        Ok(())
    }

    /// Deducts a machine's usage from its account.
    pub async fn trigger_bills(&self, account_id: &str, carton_id: &str, name: &str) -> Result<()> {
        self.ctx.billing().deduct(account_id, carton_id, name).await?;
        Ok(())
    }

    /// Pulls usage records for `region` between two unix timestamps.
    pub async fn metric_envs(
        &self,
        start: i64,
        end: i64,
        region: &str,
        writer: ProgressWriter,
    ) -> Result<Vec<serde_json::Value>> {
        writer.info(
            LogSource::Billing,
            format!("--- pull metrics for the duration ({start}, {end})"),
        );
        match self.ctx.backend().showback(start, end, region).await {
            Ok(records) => {
                writer.info(
                    LogSource::Billing,
                    format!("--- pull metrics for the duration ({start}, {end})OK"),
                );
                Ok(records)
            }
            Err(err) => {
                writer.error(
                    LogSource::Billing,
                    format!("--- pull metrics for the duration error({start}, {end})-->{err}"),
                );
                Err(err.into())
            }
        }
    }

    fn args(&self, spec: &MachineSpec, status: MachineStatus, writer: &ProgressWriter) -> MachineArgs {
        MachineArgs::new(spec.clone(), status, Arc::clone(&self.ctx)).with_writer(writer.clone())
    }

    async fn update(
        &self,
        operation: Operation,
        spec: &MachineSpec,
        status: MachineStatus,
        writer: ProgressWriter,
        what: &str,
    ) -> Result<()> {
        let args = self.args(spec, status, &writer).with_source(LogSource::Updating);
        Self::check(&args)?;
        let label = format!("{what} ({})", spec.full_name());
        self.run_reported(operation, args, &label).await.map(|_| ())
    }

    async fn power(
        &self,
        operation: Operation,
        spec: &MachineSpec,
        (status, state): (MachineStatus, MachineState),
        (source, what): (LogSource, &str),
        writer: ProgressWriter,
    ) -> Result<()> {
        let args = self
            .args(spec, status, &writer)
            .with_state(state)
            .with_source(source);
        Self::check(&args)?;
        let label = format!("{what} ({})", spec.full_name());
        self.run_reported(operation, args, &label).await.map(|_| ())
    }

    /// Rejects an invalid spec before anything runs, reporting it on the
    /// operation's sink.
    fn check(args: &MachineArgs) -> Result<()> {
        args.spec.validate().map_err(|err| {
            args.error(format!("--- invalid box ({}) --> {err}", args.spec.full_name()));
            err
        })
    }

    /// Runs the operation's pipeline between a `--- {label}` line and its
    /// `OK` or error counterpart.
    async fn run_reported(
        &self,
        operation: Operation,
        args: MachineArgs,
        label: &str,
    ) -> Result<StepResult> {
        args.info(format!("--- {label}"));
        match self.run(operation, &args).await {
            Ok(result) => {
                args.info(format!("--- {label} OK"));
                Ok(result)
            }
            Err(err) => {
                args.error(format!("--- {label} --> {err}"));
                Err(err)
            }
        }
    }

    async fn run(&self, operation: Operation, args: &MachineArgs) -> Result<StepResult> {
        let conditions = Conditions::for_spec(&args.spec, self.ctx.settings.billing_enabled);
        let attrs = PipelineSpanAttributes::for_operation(operation, &args.spec)
            .with_run_id(Uuid::now_v7().to_string());
        let span = info_span!(
            "operation",
            operation = attrs.pipeline_name.as_deref(),
            run_id = attrs.run_id.as_deref(),
            machine = attrs.machine.as_deref(),
            account_id = attrs.account_id.as_deref(),
            region = attrs.region.as_deref(),
        );

        let timer = SpanTimer::start(operation.name());
        let result = build(operation, &conditions)
            .execute(std::slice::from_ref(args))
            .instrument(span.clone())
            .await;

        let elapsed_ms = timer.finish();
        span.in_scope(|| match &result {
            Ok(_) => info!(elapsed_ms, "Operation completed"),
            Err(err) => warn!(elapsed_ms, error = %err, "Operation failed"),
        });
        result
    }

    async fn notify(&self, spec: &MachineSpec, outcome: Outcome) {
        if let Err(err) = self.ctx.publisher().done_notify(spec, outcome).await {
            warn!(machine = %spec.full_name(), %outcome, error = %err, "Done notification failed");
        }
    }
}
