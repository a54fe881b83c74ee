//! Recording steps for exercising the pipeline engine.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::context::{BackwardContext, ForwardContext};
use crate::core::StepResult;
use crate::errors::{BackendError, ProvisionError, Result};
use crate::stages::Step;

#[derive(Debug, Default)]
struct Journal {
    calls: Vec<String>,
    previous: Vec<Option<String>>,
    compensated: Vec<String>,
}

/// Shared journal of every hook invocation across a set of recording steps.
#[derive(Debug, Clone, Default)]
pub struct StepRecorder {
    journal: Arc<Mutex<Journal>>,
}

impl StepRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `forward:<name>`, `backward:<name>` and `on_error:<name>`
    /// entries in invocation order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.journal.lock().calls.clone()
    }

    /// Returns the text of the previous result each forward observed.
    #[must_use]
    pub fn previous_seen(&self) -> Vec<Option<String>> {
        self.journal.lock().previous.clone()
    }

    /// Returns the own-result text each backward received, in call order.
    #[must_use]
    pub fn compensated_results(&self) -> Vec<String> {
        self.journal.lock().compensated.clone()
    }

    fn record(&self, call: String) {
        self.journal.lock().calls.push(call);
    }
}

/// A step that records its hooks and returns its own name as text.
#[derive(Debug)]
pub struct RecordingStep {
    name: String,
    recorder: StepRecorder,
    fail_forward: Option<String>,
    fail_backward: Option<String>,
    min_params: usize,
}

impl RecordingStep {
    /// Creates a succeeding step writing to `recorder`.
    #[must_use]
    pub fn new(name: impl Into<String>, recorder: &StepRecorder) -> Self {
        Self {
            name: name.into(),
            recorder: recorder.clone(),
            fail_forward: None,
            fail_backward: None,
            min_params: 0,
        }
    }

    /// Makes forward fail with a backend error carrying `message`.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_forward = Some(message.into());
        self
    }

    /// Makes backward fail with a backend error carrying `message`.
    #[must_use]
    pub fn failing_backward(mut self, message: impl Into<String>) -> Self {
        self.fail_backward = Some(message.into());
        self
    }

    /// Sets the minimum parameter count.
    #[must_use]
    pub fn with_min_params(mut self, min_params: usize) -> Self {
        self.min_params = min_params;
        self
    }
}

#[async_trait]
impl<P: Send + Sync> Step<P> for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_params(&self) -> usize {
        self.min_params
    }

    async fn forward(&self, ctx: &ForwardContext<'_, P>) -> Result<StepResult> {
        self.recorder.record(format!("forward:{}", self.name));
        self.recorder
            .journal
            .lock()
            .previous
            .push(ctx.previous().and_then(StepResult::as_text).map(str::to_string));

        match &self.fail_forward {
            Some(message) => Err(BackendError::new("forward", &self.name, message).into()),
            None => Ok(StepResult::Text(self.name.clone())),
        }
    }

    async fn backward(&self, ctx: &BackwardContext<'_, P>) -> Result<()> {
        self.recorder.record(format!("backward:{}", self.name));
        if let Some(text) = ctx.result().as_text() {
            self.recorder.journal.lock().compensated.push(text.to_string());
        }

        match &self.fail_backward {
            Some(message) => Err(BackendError::new("backward", &self.name, message).into()),
            None => Ok(()),
        }
    }

    async fn on_error(&self, _ctx: &ForwardContext<'_, P>, _error: &ProvisionError) {
        self.recorder.record(format!("on_error:{}", self.name));
    }
}
