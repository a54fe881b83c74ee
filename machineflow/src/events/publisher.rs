//! Event publisher trait and implementations.

use crate::core::{Machine, MachineSpec, MachineStatus};
use crate::errors::PublishError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, Level};

/// Final outcome announced at the end of a top-level operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The operation failed.
    Failure,
    /// The machine was destroyed.
    Destroyed,
    /// The machine is up.
    Launched,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failure => write!(f, "failure"),
            Self::Destroyed => write!(f, "destroyed"),
            Self::Launched => write!(f, "launched"),
        }
    }
}

/// Publishes machine notifications to the rest of the platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Announces the outcome of an operation on the machine.
    async fn done_notify(&self, spec: &MachineSpec, outcome: Outcome) -> Result<(), PublishError>;

    /// Requests a state change for the machine from downstream agents.
    async fn state_changed(
        &self,
        machine: &Machine,
        status: MachineStatus,
    ) -> Result<(), PublishError>;
}

/// A publisher that discards all notifications.
///
/// Used as the default when no publisher is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPublisher;

#[async_trait]
impl EventPublisher for NoOpPublisher {
    async fn done_notify(&self, _spec: &MachineSpec, _outcome: Outcome) -> Result<(), PublishError> {
        Ok(())
    }

    async fn state_changed(
        &self,
        _machine: &Machine,
        _status: MachineStatus,
    ) -> Result<(), PublishError> {
        Ok(())
    }
}

/// A publisher that logs notifications using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingPublisher {
    level: Level,
}

impl Default for LoggingPublisher {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingPublisher {
    /// Creates a new logging publisher with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    fn log(&self, topic: &str, machine: &str, detail: &str) {
        if self.level == Level::DEBUG {
            tracing::debug!(topic, machine, detail, "Notification: {}", topic);
        } else {
            info!(topic, machine, detail, "Notification: {}", topic);
        }
    }
}

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn done_notify(&self, spec: &MachineSpec, outcome: Outcome) -> Result<(), PublishError> {
        self.log("machine.done", &spec.full_name(), &outcome.to_string());
        Ok(())
    }

    async fn state_changed(
        &self,
        machine: &Machine,
        status: MachineStatus,
    ) -> Result<(), PublishError> {
        self.log("machine.state", &machine.name, status.as_str());
        Ok(())
    }
}

/// A notification captured by [`CollectingPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A done notification.
    Done {
        /// Machine full name.
        machine: String,
        /// The announced outcome.
        outcome: Outcome,
    },
    /// A state-change request.
    StateChanged {
        /// Machine full name.
        machine: String,
        /// The requested status.
        status: MachineStatus,
    },
}

/// A collecting publisher for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingPublisher {
    notifications: RwLock<Vec<Notification>>,
    fail_done: bool,
}

impl CollectingPublisher {
    /// Creates a new collecting publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a publisher whose done notifications fail after being recorded.
    #[must_use]
    pub fn failing_done() -> Self {
        Self {
            notifications: RwLock::new(Vec::new()),
            fail_done: true,
        }
    }

    /// Returns all collected notifications.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().clone()
    }

    /// Returns the outcomes of done notifications in order.
    #[must_use]
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.notifications
            .read()
            .iter()
            .filter_map(|n| match n {
                Notification::Done { outcome, .. } => Some(*outcome),
                Notification::StateChanged { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventPublisher for CollectingPublisher {
    async fn done_notify(&self, spec: &MachineSpec, outcome: Outcome) -> Result<(), PublishError> {
        self.notifications.write().push(Notification::Done {
            machine: spec.full_name(),
            outcome,
        });
        if self.fail_done {
            return Err(PublishError::new("machine.done", "queue unavailable"));
        }
        Ok(())
    }

    async fn state_changed(
        &self,
        machine: &Machine,
        status: MachineStatus,
    ) -> Result<(), PublishError> {
        self.notifications.write().push(Notification::StateChanged {
            machine: machine.name.clone(),
            status,
        });
        Ok(())
    }
}
