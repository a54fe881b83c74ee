//! Pipeline building and execution.
//!
//! This module provides:
//! - The sequential executor with reverse-order rollback
//! - Polling with backoff for steps that wait on the backend
//! - The declarative catalog of machine pipelines

pub mod catalog;
mod executor;
mod poll;

pub use catalog::{build, sequence, Conditions, Entry, Inclusion, Operation, StepId};
pub use executor::Pipeline;
pub use poll::{wait_until, PollPolicy};
