//! Execution contexts for steps.
//!
//! - [`ForwardContext`] / [`BackwardContext`]: what a step sees while running
//!   or compensating
//! - [`MachineArgs`]: the parameter bundle machine steps are driven by

mod args;
mod step;

pub use args::MachineArgs;
pub use step::{BackwardContext, ForwardContext};
