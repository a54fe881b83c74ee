//! Builder assembling a [`Provisioner`] from its collaborators.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{Provisioner, ProvisionerContext, ProvisionerSettings};
use crate::backend::{BillingService, MachineStore, Router, UnmeteredBilling, VmBackend};
use crate::config::ProvisionerConfig;
use crate::errors::{ProvisionError, Result};
use crate::events::{EventPublisher, LoggingPublisher};

/// Builder for [`Provisioner`].
///
/// A backend and a store are required. Billing defaults to
/// [`UnmeteredBilling`] and notifications to [`LoggingPublisher`]. The
/// first registered router becomes the default unless one is named.
#[derive(Default)]
pub struct ProvisionerBuilder {
    backend: Option<Arc<dyn VmBackend>>,
    store: Option<Arc<dyn MachineStore>>,
    billing: Option<Arc<dyn BillingService>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    routers: HashMap<String, Arc<dyn Router>>,
    default_router: Option<String>,
    settings: ProvisionerSettings,
}

impl ProvisionerBuilder {
    /// Creates an empty builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder with settings resolved from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] if the configuration is invalid.
    pub fn from_config(config: &ProvisionerConfig) -> Result<Self> {
        Ok(Self::new().settings(config.settings()?))
    }

    /// Sets the VM backend.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn VmBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the machine store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn MachineStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the billing service.
    #[must_use]
    pub fn billing(mut self, billing: Arc<dyn BillingService>) -> Self {
        self.billing = Some(billing);
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Registers a router under its own name. Re-registering a name
    /// replaces the earlier router.
    #[must_use]
    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        let name = router.name().to_string();
        if self.default_router.is_none() {
            self.default_router = Some(name.clone());
        }
        self.routers.insert(name, router);
        self
    }

    /// Names the router used when a spec names none.
    #[must_use]
    pub fn default_router(mut self, name: impl Into<String>) -> Self {
        self.default_router = Some(name.into());
        self
    }

    /// Replaces the settings.
    #[must_use]
    pub fn settings(mut self, settings: ProvisionerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builds the provisioner.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] when the backend or store is
    /// missing, or the default router is not registered.
    pub fn build(self) -> Result<Provisioner> {
        let backend = self
            .backend
            .ok_or_else(|| ProvisionError::Config("no VM backend configured".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| ProvisionError::Config("no machine store configured".to_string()))?;

        if let Some(name) = &self.default_router {
            if !self.routers.contains_key(name) {
                return Err(ProvisionError::Config(format!(
                    "default router '{name}' is not registered"
                )));
            }
        }

        let context = ProvisionerContext {
            backend,
            store,
            billing: self.billing.unwrap_or_else(|| Arc::new(UnmeteredBilling)),
            publisher: self
                .publisher
                .unwrap_or_else(|| Arc::new(LoggingPublisher::default())),
            routers: self.routers,
            default_router: self.default_router,
            settings: self.settings,
        };
        debug!(context = ?context, "Provisioner built");
        Ok(Provisioner::from_context(Arc::new(context)))
    }
}

impl fmt::Debug for ProvisionerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionerBuilder")
            .field("has_backend", &self.backend.is_some())
            .field("has_store", &self.store.is_some())
            .field("routers", &self.routers.keys().collect::<Vec<_>>())
            .field("default_router", &self.default_router)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PollConfig, RegionConfig};
    use crate::testing::{FakeBackend, InMemoryRouter, InMemoryStore};

    fn minimal() -> ProvisionerBuilder {
        ProvisionerBuilder::new()
            .backend(Arc::new(FakeBackend::new()))
            .store(Arc::new(InMemoryStore::new()))
    }

    #[test]
    fn test_build_requires_backend_and_store() {
        let err = ProvisionerBuilder::new().build().unwrap_err();
        assert!(matches!(err, ProvisionError::Config(msg) if msg.contains("backend")));

        let err = ProvisionerBuilder::new()
            .backend(Arc::new(FakeBackend::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Config(msg) if msg.contains("store")));
    }

    #[test]
    fn test_first_router_is_default() {
        let provisioner = minimal()
            .router(Arc::new(InMemoryRouter::new("route53")))
            .router(Arc::new(InMemoryRouter::new("cloudflare")))
            .build()
            .unwrap();
        let ctx = provisioner.context();

        assert_eq!(ctx.router_names(), vec!["cloudflare", "route53"]);
        let spec = crate::testing::test_spec();
        assert_eq!(ctx.router_for(&spec).unwrap().name(), "route53");
    }

    #[test]
    fn test_unknown_default_router_rejected() {
        let err = minimal()
            .router(Arc::new(InMemoryRouter::new("route53")))
            .default_router("cloudflare")
            .build()
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Config(_)));
    }

    #[test]
    fn test_settings_from_config() {
        let config = ProvisionerConfig {
            image: "debian-12".into(),
            billing_enabled: true,
            regions: vec![RegionConfig {
                zone: "eu-west".into(),
                endpoint: "https://one.example.com".into(),
                ..RegionConfig::default()
            }],
            poll: PollConfig::default(),
            ..ProvisionerConfig::default()
        };

        let provisioner = ProvisionerBuilder::from_config(&config)
            .unwrap()
            .backend(Arc::new(FakeBackend::new()))
            .store(Arc::new(InMemoryStore::new()))
            .build()
            .unwrap();

        let settings = provisioner.context().settings();
        assert_eq!(settings.default_image, "debian-12");
        assert!(settings.billing_enabled);
    }

    #[test]
    fn test_startup_message_lists_routers() {
        let provisioner = minimal().build().unwrap();
        assert_eq!(provisioner.startup_message(), "  > provisioner \tready");

        let provisioner = minimal()
            .router(Arc::new(InMemoryRouter::new("route53")))
            .build()
            .unwrap();
        assert!(provisioner.startup_message().ends_with("(routers: route53)"));
    }
}
