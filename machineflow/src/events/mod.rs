//! Notifications published at the end of top-level operations.
//!
//! Publishing is fire-and-forget: operations log a failed notification
//! and carry on with their own result.

mod publisher;

pub use publisher::{
    CollectingPublisher, EventPublisher, LoggingPublisher, NoOpPublisher, Notification, Outcome,
};

#[cfg(test)]
pub use publisher::MockEventPublisher;
