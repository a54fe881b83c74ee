//! Collaborators and settings shared by every operation of a provisioner.

use crate::backend::{BillingService, MachineStore, Router, VmBackend};
use crate::core::MachineSpec;
use crate::errors::RouterError;
use crate::events::EventPublisher;
use crate::pipeline::PollPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Tunables resolved from configuration at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerSettings {
    /// Platform image used when a deploy names none.
    pub default_image: String,
    /// CPU throttle percentage handed to the backend.
    pub vcpu_throttle: String,
    /// Whether deploys run the balance check.
    pub billing_enabled: bool,
    /// Polling policy for power-state and snapshot waits.
    pub poll: PollPolicy,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            default_image: "ubuntu".to_string(),
            vcpu_throttle: "10".to_string(),
            billing_enabled: false,
            poll: PollPolicy::default(),
        }
    }
}

/// Explicit context object holding every collaborator a step may call.
///
/// Constructed once at startup and shared by reference with each
/// pipeline run through [`crate::context::MachineArgs`].
pub struct ProvisionerContext {
    pub(crate) backend: Arc<dyn VmBackend>,
    pub(crate) store: Arc<dyn MachineStore>,
    pub(crate) billing: Arc<dyn BillingService>,
    pub(crate) publisher: Arc<dyn EventPublisher>,
    pub(crate) routers: HashMap<String, Arc<dyn Router>>,
    pub(crate) default_router: Option<String>,
    pub(crate) settings: ProvisionerSettings,
}

impl ProvisionerContext {
    /// Returns the VM backend.
    #[must_use]
    pub fn backend(&self) -> &dyn VmBackend {
        self.backend.as_ref()
    }

    /// Returns the machine store.
    #[must_use]
    pub fn store(&self) -> &dyn MachineStore {
        self.store.as_ref()
    }

    /// Returns the billing service.
    #[must_use]
    pub fn billing(&self) -> &dyn BillingService {
        self.billing.as_ref()
    }

    /// Returns the event publisher.
    #[must_use]
    pub fn publisher(&self) -> &dyn EventPublisher {
        self.publisher.as_ref()
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    /// Returns the polling policy.
    #[must_use]
    pub fn poll(&self) -> &PollPolicy {
        &self.settings.poll
    }

    /// Returns the names of the registered routers, sorted.
    #[must_use]
    pub fn router_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Looks up a router by name.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotFound`] if no router is registered under `name`.
    pub fn router(&self, name: &str) -> Result<&dyn Router, RouterError> {
        match self.routers.get(name) {
            Some(router) => Ok(router.as_ref()),
            None => Err(RouterError::NotFound(name.to_string())),
        }
    }

    /// Resolves the router handling a machine: the machine spec's own, else the default.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotFound`] when neither names a registered router.
    pub fn router_for(&self, spec: &MachineSpec) -> Result<&dyn Router, RouterError> {
        match spec
            .router
            .as_deref()
            .filter(|r| !r.is_empty())
            .or(self.default_router.as_deref())
        {
            Some(name) => self.router(name),
            None => Err(RouterError::NotFound(format!(
                "no router configured for {}",
                spec.full_name()
            ))),
        }
    }
}

impl fmt::Debug for ProvisionerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionerContext")
            .field("routers", &self.router_names())
            .field("default_router", &self.default_router)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
