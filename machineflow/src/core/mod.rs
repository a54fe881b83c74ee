//! Core types: the machine entity, its status labels and step results.

mod machine;
mod output;
mod spec;
mod status;

pub use machine::{HostAddress, Machine};
pub use output::StepResult;
pub use spec::{Compute, MachineSpec, Repo};
pub use status::{MachineState, MachineStatus};
