//! Contexts handed to a step's forward, backward and error hooks.

use crate::core::{Machine, StepResult};
use crate::errors::{PreconditionError, ProvisionError, Result};

/// Context for a step's forward operation and its error hook.
///
/// Holds the positional parameters of the run and the result of the
/// immediately preceding step (`None` for the first step).
#[derive(Debug)]
pub struct ForwardContext<'a, P> {
    step: &'a str,
    params: &'a [P],
    previous: Option<&'a StepResult>,
}

impl<'a, P> ForwardContext<'a, P> {
    /// Creates a forward context.
    #[must_use]
    pub fn new(step: &'a str, params: &'a [P], previous: Option<&'a StepResult>) -> Self {
        Self {
            step,
            params,
            previous,
        }
    }

    /// Returns the name of the step being run.
    #[must_use]
    pub fn step(&self) -> &'a str {
        self.step
    }

    /// Returns all positional parameters.
    #[must_use]
    pub fn params(&self) -> &'a [P] {
        self.params
    }

    /// Returns the first positional parameter.
    pub fn args(&self) -> Result<&'a P> {
        first_param(self.step, self.params)
    }

    /// Returns the previous step's result, if any.
    #[must_use]
    pub fn previous(&self) -> Option<&'a StepResult> {
        self.previous
    }

    /// Returns the machine threaded by the previous step.
    pub fn previous_machine(&self) -> Result<&'a Machine> {
        match self.previous {
            Some(result) => result.machine(self.step),
            None => Err(ProvisionError::UnexpectedResult {
                step: self.step.to_string(),
                expected: "machine",
                found: "nothing",
            }),
        }
    }
}

/// Context for a step's compensation.
///
/// Carries only the run's parameters and this step's own forward result,
/// never the rest of the chain.
#[derive(Debug)]
pub struct BackwardContext<'a, P> {
    step: &'a str,
    params: &'a [P],
    result: &'a StepResult,
}

impl<'a, P> BackwardContext<'a, P> {
    /// Creates a backward context.
    #[must_use]
    pub fn new(step: &'a str, params: &'a [P], result: &'a StepResult) -> Self {
        Self {
            step,
            params,
            result,
        }
    }

    /// Returns the name of the step being compensated.
    #[must_use]
    pub fn step(&self) -> &'a str {
        self.step
    }

    /// Returns all positional parameters.
    #[must_use]
    pub fn params(&self) -> &'a [P] {
        self.params
    }

    /// Returns the first positional parameter.
    pub fn args(&self) -> Result<&'a P> {
        first_param(self.step, self.params)
    }

    /// Returns this step's forward result.
    #[must_use]
    pub fn result(&self) -> &'a StepResult {
        self.result
    }

    /// Returns the machine this step produced.
    pub fn machine(&self) -> Result<&'a Machine> {
        self.result.machine(self.step)
    }
}

fn first_param<'a, P>(step: &str, params: &'a [P]) -> Result<&'a P> {
    params
        .first()
        .ok_or_else(|| PreconditionError::new(step, 1, 0).into())
}
