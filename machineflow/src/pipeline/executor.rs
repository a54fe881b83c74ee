//! Sequential pipeline executor with reverse-order compensation.

use crate::context::{BackwardContext, ForwardContext};
use crate::core::StepResult;
use crate::errors::{PreconditionError, ProvisionError, Result};
use crate::stages::Step;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, debug_span, info, info_span, warn, Instrument};

/// An ordered list of steps run with rollback-on-failure semantics.
///
/// A pipeline holds no run state; every [`Pipeline::execute`] call keeps
/// its own ledger of completed steps.
pub struct Pipeline<P: Send + Sync> {
    name: String,
    steps: Vec<Arc<dyn Step<P>>>,
}

impl<P: Send + Sync> Pipeline<P> {
    /// Creates a pipeline from an ordered list of steps.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<Arc<dyn Step<P>>>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step: impl Step<P> + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the step names in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the pipeline has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step in order, threading each result into the next.
    ///
    /// On the first forward failure the failing step's error hook runs,
    /// then every previously completed step is compensated in reverse
    /// order, and the original error is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::EmptyPipeline`] for a pipeline without
    /// steps, a precondition error when `params` is shorter than any
    /// step's minimum (before anything runs), or the failing step's error.
    pub async fn execute(&self, params: &[P]) -> Result<StepResult> {
        if self.steps.is_empty() {
            return Err(ProvisionError::EmptyPipeline(self.name.clone()));
        }
        self.check_params(params)?;

        let span = info_span!("pipeline", pipeline = %self.name, steps = self.steps.len());
        self.run(params).instrument(span).await
    }

    fn check_params(&self, params: &[P]) -> Result<()> {
        for step in &self.steps {
            if params.len() < step.min_params() {
                return Err(PreconditionError::new(step.name(), step.min_params(), params.len()).into());
            }
        }
        Ok(())
    }

    async fn run(&self, params: &[P]) -> Result<StepResult> {
        let started = Instant::now();
        let mut ledger: Vec<(&Arc<dyn Step<P>>, StepResult)> = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            let outcome = {
                let previous = ledger.last().map(|(_, result)| result);
                let ctx = ForwardContext::new(step.name(), params, previous);
                let step_started = Instant::now();

                let span = debug_span!("step", step = step.name(), index);
                match step.forward(&ctx).instrument(span).await {
                    Ok(result) => {
                        debug!(
                            step = step.name(),
                            index,
                            result = result.kind(),
                            duration_ms = step_started.elapsed().as_millis() as u64,
                            "Step completed"
                        );
                        Ok(result)
                    }
                    Err(err) => {
                        warn!(
                            step = step.name(),
                            index,
                            error = %err,
                            completed = ledger.len(),
                            "Step failed, rolling back"
                        );
                        notify_error(&**step, &ctx, &err).await;
                        Err(err)
                    }
                }
            };

            match outcome {
                Ok(result) => ledger.push((step, result)),
                Err(err) => {
                    self.rollback(&ledger, params).await;
                    return Err(err);
                }
            }
        }

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            "Pipeline completed"
        );

        ledger
            .pop()
            .map(|(_, result)| result)
            .ok_or_else(|| ProvisionError::EmptyPipeline(self.name.clone()))
    }

    async fn rollback(&self, ledger: &[(&Arc<dyn Step<P>>, StepResult)], params: &[P]) {
        for (step, result) in ledger.iter().rev() {
            let ctx = BackwardContext::new(step.name(), params, result);
            match AssertUnwindSafe(step.backward(&ctx)).catch_unwind().await {
                Ok(Ok(())) => debug!(step = step.name(), "Step compensated"),
                Ok(Err(err)) => warn!(step = step.name(), error = %err, "Compensation failed"),
                Err(_) => warn!(step = step.name(), "Compensation panicked"),
            }
        }
    }
}

async fn notify_error<P: Send + Sync>(
    step: &dyn Step<P>,
    ctx: &ForwardContext<'_, P>,
    err: &ProvisionError,
) {
    if AssertUnwindSafe(step.on_error(ctx, err))
        .catch_unwind()
        .await
        .is_err()
    {
        warn!(step = step.name(), "Error hook panicked");
    }
}

impl<P: Send + Sync> fmt::Debug for Pipeline<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(|s| format!("{s:?}")).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackendError;
    use crate::stages::{FnStep, NoOpStep};
    use crate::testing::{RecordingStep, StepRecorder};
    use pretty_assertions::assert_eq;

    fn recording(names: &[&str], recorder: &StepRecorder) -> Pipeline<u32> {
        let steps = names
            .iter()
            .map(|name| Arc::new(RecordingStep::new(*name, recorder)) as Arc<dyn Step<u32>>)
            .collect();
        Pipeline::new("test", steps)
    }

    #[tokio::test]
    async fn test_forwards_run_in_order_and_thread_results() {
        let recorder = StepRecorder::new();
        let pipeline = recording(&["a", "b", "c"], &recorder);

        let result = pipeline.execute(&[1]).await.unwrap();

        assert_eq!(result.as_text(), Some("c"));
        assert_eq!(recorder.calls(), vec!["forward:a", "forward:b", "forward:c"]);
        assert_eq!(
            recorder.previous_seen(),
            vec![None, Some("a".to_string()), Some("b".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_reverse() {
        let recorder = StepRecorder::new();
        let pipeline = Pipeline::<u32>::new("test", Vec::new())
            .step(RecordingStep::new("a", &recorder))
            .step(RecordingStep::new("b", &recorder))
            .step(RecordingStep::new("c", &recorder))
            .step(RecordingStep::new("d", &recorder).failing("boom"))
            .step(RecordingStep::new("e", &recorder));

        let err = pipeline.execute(&[1]).await.unwrap_err();

        assert_eq!(err.to_string(), "Backend forward failed for 'd': boom");
        assert_eq!(
            recorder.calls(),
            vec![
                "forward:a",
                "forward:b",
                "forward:c",
                "forward:d",
                "on_error:d",
                "backward:c",
                "backward:b",
                "backward:a",
            ]
        );
    }

    #[tokio::test]
    async fn test_backward_receives_own_result() {
        let recorder = StepRecorder::new();
        let pipeline = Pipeline::<u32>::new("test", Vec::new())
            .step(RecordingStep::new("a", &recorder))
            .step(RecordingStep::new("b", &recorder))
            .step(RecordingStep::new("c", &recorder).failing("boom"));

        pipeline.execute(&[1]).await.unwrap_err();

        assert_eq!(recorder.compensated_results(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_first_step_failure_has_no_rollback() {
        let recorder = StepRecorder::new();
        let pipeline = Pipeline::<u32>::new("test", Vec::new())
            .step(RecordingStep::new("a", &recorder).failing("down"))
            .step(RecordingStep::new("b", &recorder));

        assert!(pipeline.execute(&[1]).await.is_err());
        assert_eq!(recorder.calls(), vec!["forward:a", "on_error:a"]);
    }

    #[tokio::test]
    async fn test_compensation_errors_are_swallowed() {
        let recorder = StepRecorder::new();
        let pipeline = Pipeline::<u32>::new("test", Vec::new())
            .step(RecordingStep::new("a", &recorder))
            .step(RecordingStep::new("b", &recorder).failing_backward("cannot undo"))
            .step(RecordingStep::new("c", &recorder).failing("boom"));

        let err = pipeline.execute(&[1]).await.unwrap_err();

        assert!(err.to_string().contains("boom"));
        assert_eq!(
            recorder.calls(),
            vec!["forward:a", "forward:b", "forward:c", "on_error:c", "backward:b", "backward:a"]
        );
    }

    #[tokio::test]
    async fn test_panicking_compensation_does_not_stop_unwind() {
        let recorder = StepRecorder::new();
        let pipeline = Pipeline::<u32>::new("test", Vec::new())
            .step(RecordingStep::new("a", &recorder))
            .step(
                FnStep::<u32>::new("b", |_| Ok(StepResult::Text("b".into())))
                    .with_backward(|_| panic!("compensation bug")),
            )
            .step(RecordingStep::new("c", &recorder).failing("boom"));

        assert!(pipeline.execute(&[1]).await.is_err());
        assert_eq!(
            recorder.calls(),
            vec!["forward:a", "forward:c", "on_error:c", "backward:a"]
        );
    }

    #[tokio::test]
    async fn test_min_params_checked_before_any_side_effect() {
        let recorder = StepRecorder::new();
        let pipeline = Pipeline::<u32>::new("test", Vec::new())
            .step(RecordingStep::new("a", &recorder))
            .step(RecordingStep::new("b", &recorder).with_min_params(1));

        let err = pipeline.execute(&[]).await.unwrap_err();

        assert!(err.is_precondition());
        assert_eq!(
            err.to_string(),
            "Step 'b' requires at least 1 parameter(s), got 0"
        );
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_pipeline() {
        let pipeline = Pipeline::<u32>::new("nothing", Vec::new());
        let err = pipeline.execute(&[1]).await.unwrap_err();
        assert!(matches!(err, ProvisionError::EmptyPipeline(name) if name == "nothing"));
    }

    #[tokio::test]
    async fn test_pure_step_compensation_is_noop() {
        let recorder = StepRecorder::new();
        let pipeline = Pipeline::<u32>::new("test", Vec::new())
            .step(NoOpStep::new("pure"))
            .step(RecordingStep::new("fails", &recorder).failing("boom"));

        let err = pipeline.execute(&[1]).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Backend(BackendError { .. })));
    }

    #[tokio::test]
    async fn test_pipeline_is_reusable_across_runs() {
        let recorder = StepRecorder::new();
        let pipeline = recording(&["a", "b"], &recorder);

        pipeline.execute(&[1]).await.unwrap();
        pipeline.execute(&[2]).await.unwrap();

        assert_eq!(recorder.calls().len(), 4);
        assert_eq!(pipeline.step_names(), vec!["a", "b"]);
    }
}
