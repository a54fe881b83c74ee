//! Testing utilities for machine pipelines.
//!
//! This module provides:
//! - In-memory fakes of the backend, store, router and billing service
//! - Recording steps for exercising the engine
//! - A capturing progress buffer
//! - Fixtures wiring everything into a provisioner

mod fakes;
mod fixtures;
mod mocks;
mod progress;

pub use crate::events::CollectingPublisher;
pub use fakes::{FakeBackend, FakeBilling, InMemoryRouter, InMemoryStore, StoreRecord};
pub use fixtures::{
    fake_context, run_backward, run_forward, test_settings, test_spec, Fakes, TEST_ROUTER,
};
pub use mocks::{RecordingStep, StepRecorder};
pub use progress::ProgressBuffer;
