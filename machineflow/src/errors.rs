//! Error types for machine provisioning.
//!
//! Every collaborator (backend, store, router, billing) has its own error
//! type; [`ProvisionError`] wraps them so a pipeline can surface the first
//! failure verbatim to the caller.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The main error type for provisioning operations.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A step's minimum-parameter requirement was not met.
    #[error("{0}")]
    Precondition(#[from] PreconditionError),

    /// The pipeline was executed without any steps.
    #[error("Pipeline '{0}' has no steps to execute")]
    EmptyPipeline(String),

    /// A step received a previous result of the wrong kind.
    #[error("Step '{step}' expected a {expected} result, got {found}")]
    UnexpectedResult {
        /// The step that rejected the result.
        step: String,
        /// The kind of result it needed.
        expected: &'static str,
        /// The kind of result it received.
        found: &'static str,
    },

    /// The VM backend rejected an operation.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// The persistent store failed a write or read.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The router failed to resolve or update a mapping.
    #[error("{0}")]
    Router(#[from] RouterError),

    /// The billing service refused or failed.
    #[error("{0}")]
    Billing(#[from] BillingError),

    /// The event publisher could not deliver a notification.
    #[error("{0}")]
    Publish(#[from] PublishError),

    /// A polled condition did not hold before the deadline.
    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// What was being waited for.
        what: String,
        /// How long the wait lasted.
        waited: Duration,
    },

    /// The caller supplied an invalid machine spec.
    #[error("Invalid machine spec: {0}")]
    InvalidSpec(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Returns true for minimum-parameter violations.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }

    /// Returns true when the account lacks credit for the operation.
    #[must_use]
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, Self::Billing(BillingError::InsufficientFunds { .. }))
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(what: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            waited,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let kind = match self {
            Self::Precondition(_) => "Precondition",
            Self::EmptyPipeline(_) => "EmptyPipeline",
            Self::UnexpectedResult { .. } => "UnexpectedResult",
            Self::Backend(_) => "Backend",
            Self::Store(_) => "Store",
            Self::Router(_) => "Router",
            Self::Billing(_) => "Billing",
            Self::Publish(_) => "Publish",
            Self::Timeout { .. } => "Timeout",
            Self::InvalidSpec(_) => "InvalidSpec",
            Self::Config(_) => "Config",
            Self::Io(_) => "Io",
        };

        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Raised when a step needs more positional parameters than were supplied.
#[derive(Debug, Clone, Error)]
#[error("Step '{step}' requires at least {required} parameter(s), got {given}")]
pub struct PreconditionError {
    /// The step whose guard failed.
    pub step: String,
    /// The declared minimum.
    pub required: usize,
    /// The number of parameters given.
    pub given: usize,
}

impl PreconditionError {
    /// Creates a new precondition error.
    #[must_use]
    pub fn new(step: impl Into<String>, required: usize, given: usize) -> Self {
        Self {
            step: step.into(),
            required,
            given,
        }
    }
}

/// Error returned by the VM backend.
#[derive(Debug, Clone, Error)]
#[error("Backend {operation} failed for '{machine}': {message}")]
pub struct BackendError {
    /// The backend operation (e.g. "create", "snapshot").
    pub operation: String,
    /// The machine the operation targeted.
    pub machine: String,
    /// Backend-supplied message.
    pub message: String,
}

impl BackendError {
    /// Creates a new backend error.
    #[must_use]
    pub fn new(
        operation: impl Into<String>,
        machine: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            machine: machine.into(),
            message: message.into(),
        }
    }
}

/// Error returned by the persistent store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No record exists for the id.
    #[error("Store record not found: {id}")]
    NotFound {
        /// The missing record id.
        id: String,
    },

    /// A write was rejected.
    #[error("Store write '{field}' failed for {id}: {message}")]
    WriteFailed {
        /// The record id.
        id: String,
        /// The field being written.
        field: String,
        /// Store-supplied message.
        message: String,
    },
}

impl StoreError {
    /// Creates a write failure.
    #[must_use]
    pub fn write_failed(
        id: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::WriteFailed {
            id: id.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error returned by a router.
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    /// No router is registered under the name.
    #[error("Router not found: {0}")]
    NotFound(String),

    /// No mapping exists for the name.
    #[error("No route for '{0}'")]
    NoRoute(String),

    /// The router rejected a mapping update.
    #[error("Router {router} failed to {action} '{name}': {message}")]
    Failed {
        /// The router name.
        router: String,
        /// "set" or "unset".
        action: &'static str,
        /// The mapped name.
        name: String,
        /// Router-supplied message.
        message: String,
    },
}

/// Error returned by the billing service.
#[derive(Debug, Clone, Error)]
pub enum BillingError {
    /// The account cannot pay for the machine.
    #[error("Insufficient funds for account {account_id}: {reason}")]
    InsufficientFunds {
        /// The account.
        account_id: String,
        /// Why the check failed.
        reason: String,
    },

    /// The billing service itself failed.
    #[error("Billing service error: {0}")]
    Service(String),
}

impl BillingError {
    /// Creates an insufficient-funds error.
    #[must_use]
    pub fn insufficient(account_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InsufficientFunds {
            account_id: account_id.into(),
            reason: reason.into(),
        }
    }
}

/// Error returned by an event publisher.
#[derive(Debug, Clone, Error)]
#[error("Publish '{topic}' failed: {message}")]
pub struct PublishError {
    /// The notification topic.
    pub topic: String,
    /// Publisher-supplied message.
    pub message: String,
}

impl PublishError {
    /// Creates a new publish error.
    #[must_use]
    pub fn new(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
