//! Per-invocation parameter bundle shared by every machine step.

use crate::core::{MachineSpec, MachineState, MachineStatus};
use crate::progress::{LogSource, ProgressWriter};
use crate::provisioner::ProvisionerContext;
use std::fmt;
use std::sync::Arc;

/// The single positional parameter handed to every machine step.
///
/// Built once by a top-level operation and never mutated while the
/// pipeline runs.
#[derive(Clone)]
pub struct MachineArgs {
    /// Caller-supplied description of the machine.
    pub spec: MachineSpec,
    /// Progress output sink.
    pub writer: ProgressWriter,
    /// Build or image identifier.
    pub image_id: String,
    /// True for deploy runs.
    pub is_deploy: bool,
    /// Desired status.
    pub status: MachineStatus,
    /// Desired lifecycle state.
    pub state: MachineState,
    /// Tag for progress lines.
    pub source: LogSource,
    /// Collaborators and settings.
    pub provisioner: Arc<ProvisionerContext>,
}

impl MachineArgs {
    /// Creates a bundle targeting `status`, with the machine spec's state and no output.
    #[must_use]
    pub fn new(spec: MachineSpec, status: MachineStatus, provisioner: Arc<ProvisionerContext>) -> Self {
        let state = spec.state;
        Self {
            spec,
            writer: ProgressWriter::discard(),
            image_id: String::new(),
            is_deploy: false,
            status,
            state,
            source: LogSource::Deploy,
            provisioner,
        }
    }

    /// Sets the desired lifecycle state.
    #[must_use]
    pub fn with_state(mut self, state: MachineState) -> Self {
        self.state = state;
        self
    }

    /// Sets the progress writer.
    #[must_use]
    pub fn with_writer(mut self, writer: ProgressWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Sets the image identifier.
    #[must_use]
    pub fn with_image(mut self, image_id: impl Into<String>) -> Self {
        self.image_id = image_id.into();
        self
    }

    /// Sets the progress tag.
    #[must_use]
    pub fn with_source(mut self, source: LogSource) -> Self {
        self.source = source;
        self
    }

    /// Marks the bundle as a deploy run.
    #[must_use]
    pub fn deploying(mut self) -> Self {
        self.is_deploy = true;
        self
    }

    /// Writes an info progress line tagged with this run's source.
    pub fn info(&self, message: impl Into<String>) {
        self.writer.info(self.source, message);
    }

    /// Writes an error progress line tagged with this run's source.
    pub fn error(&self, message: impl Into<String>) {
        self.writer.error(self.source, message);
    }
}

impl fmt::Debug for MachineArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineArgs")
            .field("machine", &self.spec.full_name())
            .field("image_id", &self.image_id)
            .field("is_deploy", &self.is_deploy)
            .field("status", &self.status)
            .field("state", &self.state)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_context, ProgressBuffer};

    #[test]
    fn test_defaults_from_spec() {
        let mut spec = MachineSpec::new("m1", "acc", "web", "example.com");
        spec.state = MachineState::Running;
        let args = MachineArgs::new(spec, MachineStatus::Stopping, fake_context().context);

        assert_eq!(args.state, MachineState::Running);
        assert_eq!(args.status, MachineStatus::Stopping);
        assert!(!args.is_deploy);
        assert!(!args.writer.is_attached());
    }

    #[test]
    fn test_lines_use_source() {
        let buffer = ProgressBuffer::new();
        let args = MachineArgs::new(
            MachineSpec::new("m1", "acc", "web", "example.com"),
            MachineStatus::Starting,
            fake_context().context,
        )
        .with_writer(buffer.writer())
        .with_source(LogSource::Starting);

        args.info("starting");
        args.error("failed");

        let lines = buffer.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.source == LogSource::Starting));
    }
}
