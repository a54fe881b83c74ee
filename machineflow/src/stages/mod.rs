//! Step trait and implementations.
//!
//! Steps are the atomic units of a pipeline: a forward operation, an
//! optional compensation and an optional error hook.

use crate::context::{BackwardContext, ForwardContext};
use crate::core::StepResult;
use crate::errors::{ProvisionError, Result};
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline steps.
///
/// `P` is the positional parameter type of the pipeline the step runs in.
#[async_trait]
pub trait Step<P: Send + Sync>: Send + Sync + Debug {
    /// Returns the name of the step, used for diagnostics only.
    fn name(&self) -> &str;

    /// Minimum number of positional parameters the step needs.
    fn min_params(&self) -> usize {
        0
    }

    /// Performs one unit of external work and returns the value handed to
    /// the next step.
    async fn forward(&self, ctx: &ForwardContext<'_, P>) -> Result<StepResult>;

    /// Undoes the externally visible effect of a successful forward.
    ///
    /// Receives the run's parameters and this step's own forward result.
    /// Errors are logged by the pipeline and never propagated.
    async fn backward(&self, ctx: &BackwardContext<'_, P>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Notification hook invoked when this step's forward fails.
    async fn on_error(&self, ctx: &ForwardContext<'_, P>, error: &ProvisionError) {
        let _ = (ctx, error);
    }
}

type ForwardFn<P> = Box<dyn Fn(&ForwardContext<'_, P>) -> Result<StepResult> + Send + Sync>;
type BackwardFn<P> = Box<dyn Fn(&BackwardContext<'_, P>) -> Result<()> + Send + Sync>;
type ErrorFn<P> = Box<dyn Fn(&ForwardContext<'_, P>, &ProvisionError) + Send + Sync>;

/// A step built from closures.
pub struct FnStep<P> {
    name: String,
    min_params: usize,
    forward: ForwardFn<P>,
    backward: Option<BackwardFn<P>>,
    on_error: Option<ErrorFn<P>>,
}

impl<P> FnStep<P> {
    /// Creates a step from a forward closure.
    pub fn new<F>(name: impl Into<String>, forward: F) -> Self
    where
        F: Fn(&ForwardContext<'_, P>) -> Result<StepResult> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            min_params: 0,
            forward: Box::new(forward),
            backward: None,
            on_error: None,
        }
    }

    /// Sets the compensation closure.
    #[must_use]
    pub fn with_backward<F>(mut self, backward: F) -> Self
    where
        F: Fn(&BackwardContext<'_, P>) -> Result<()> + Send + Sync + 'static,
    {
        self.backward = Some(Box::new(backward));
        self
    }

    /// Sets the error hook closure.
    #[must_use]
    pub fn with_on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&ForwardContext<'_, P>, &ProvisionError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Sets the minimum parameter count.
    #[must_use]
    pub fn with_min_params(mut self, min_params: usize) -> Self {
        self.min_params = min_params;
        self
    }
}

impl<P> Debug for FnStep<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep")
            .field("name", &self.name)
            .field("min_params", &self.min_params)
            .field("has_backward", &self.backward.is_some())
            .field("has_on_error", &self.on_error.is_some())
            .finish()
    }
}

#[async_trait]
impl<P: Send + Sync> Step<P> for FnStep<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_params(&self) -> usize {
        self.min_params
    }

    async fn forward(&self, ctx: &ForwardContext<'_, P>) -> Result<StepResult> {
        (self.forward)(ctx)
    }

    async fn backward(&self, ctx: &BackwardContext<'_, P>) -> Result<()> {
        match &self.backward {
            Some(backward) => backward(ctx),
            None => Ok(()),
        }
    }

    async fn on_error(&self, ctx: &ForwardContext<'_, P>, error: &ProvisionError) {
        if let Some(on_error) = &self.on_error {
            on_error(ctx, error);
        }
    }
}

/// A step that hands the previous result through unchanged.
#[derive(Debug, Clone)]
pub struct NoOpStep {
    name: String,
}

impl NoOpStep {
    /// Creates a new no-op step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl<P: Send + Sync> Step<P> for NoOpStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forward(&self, ctx: &ForwardContext<'_, P>) -> Result<StepResult> {
        Ok(ctx
            .previous()
            .cloned()
            .unwrap_or_else(|| StepResult::Text(self.name.clone())))
    }
}
