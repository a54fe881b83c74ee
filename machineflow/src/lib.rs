//! # Machineflow
//!
//! Virtual machine provisioning as ordered, reversible step pipelines.
//!
//! Every machine operation (deploy, destroy, snapshot, disk, power and
//! state changes) is a fixed sequence of steps drawn from a declarative
//! catalog. Steps run strictly in order; when one fails, the steps that
//! already completed are compensated in reverse order and the original
//! error is returned.
//!
//! - **Steps**: forward work, compensation and an error hook per step
//! - **Pipelines**: sequential execution with best-effort rollback
//! - **Catalog**: operation tables with inclusion predicates
//! - **Provisioner**: an explicit context of collaborators shared by every operation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use machineflow::prelude::*;
//!
//! let provisioner = Provisioner::builder()
//!     .backend(backend)
//!     .store(store)
//!     .router(route53)
//!     .build()?;
//!
//! let spec = MachineSpec::new("m-1", "acc-1", "web", "example.com");
//! let image = provisioner.deploy(&spec, "ubuntu", ProgressWriter::new(std::io::stdout())).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod actions;
pub mod backend;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod progress;
pub mod provisioner;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{
        BillingService, LifecycleOp, MachineStore, PowerState, Router, UnmeteredBilling, VmBackend,
    };
    pub use crate::config::{ClusterConfig, PollConfig, ProvisionerConfig, RegionConfig};
    pub use crate::context::{BackwardContext, ForwardContext, MachineArgs};
    pub use crate::core::{
        Compute, HostAddress, Machine, MachineSpec, MachineState, MachineStatus, Repo, StepResult,
    };
    pub use crate::errors::{
        BackendError, BillingError, ProvisionError, PublishError, RouterError, StoreError,
    };
    pub use crate::events::{EventPublisher, LoggingPublisher, NoOpPublisher, Outcome};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{Conditions, Operation, Pipeline, PollPolicy, StepId};
    pub use crate::progress::{LogSource, ProgressWriter};
    pub use crate::provisioner::{Provisioner, ProvisionerBuilder, ProvisionerSettings};
    pub use crate::stages::{FnStep, NoOpStep, Step};
}
