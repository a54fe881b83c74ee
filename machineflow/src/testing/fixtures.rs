//! Fixtures wiring the fakes into a provisioner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::fakes::{FakeBackend, FakeBilling, InMemoryRouter, InMemoryStore};
use crate::backend::Router;
use crate::context::{BackwardContext, ForwardContext, MachineArgs};
use crate::core::{MachineSpec, MachineStatus, StepResult};
use crate::errors::Result;
use crate::events::CollectingPublisher;
use crate::pipeline::PollPolicy;
use crate::provisioner::{Provisioner, ProvisionerContext, ProvisionerSettings};
use crate::stages::Step;

/// Name of the router every fixture registers.
pub const TEST_ROUTER: &str = "route53";

/// A provisioner context built from fakes, with handles to each fake.
#[derive(Debug)]
pub struct Fakes {
    /// The VM backend.
    pub backend: Arc<FakeBackend>,
    /// The machine store.
    pub store: Arc<InMemoryStore>,
    /// The default router.
    pub router: Arc<InMemoryRouter>,
    /// The billing service.
    pub billing: Arc<FakeBilling>,
    /// The event publisher.
    pub publisher: Arc<CollectingPublisher>,
    /// The context wired to all of the above.
    pub context: Arc<ProvisionerContext>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self::new()
    }
}

impl Fakes {
    /// Creates fakes with billing disabled and millisecond polling.
    #[must_use]
    pub fn new() -> Self {
        Self::with(FakeBackend::new(), test_settings())
    }

    /// Creates fakes with billing enabled.
    #[must_use]
    pub fn with_billing() -> Self {
        Self::with(
            FakeBackend::new(),
            ProvisionerSettings {
                billing_enabled: true,
                ..test_settings()
            },
        )
    }

    /// Creates fakes around a configured backend and settings.
    #[must_use]
    pub fn with(backend: FakeBackend, settings: ProvisionerSettings) -> Self {
        Self::with_publisher(backend, settings, CollectingPublisher::new())
    }

    /// Creates fakes around a configured backend, settings and publisher.
    #[must_use]
    pub fn with_publisher(
        backend: FakeBackend,
        settings: ProvisionerSettings,
        publisher: CollectingPublisher,
    ) -> Self {
        let backend = Arc::new(backend);
        let store = Arc::new(InMemoryStore::new());
        let router = Arc::new(InMemoryRouter::new(TEST_ROUTER));
        let billing = Arc::new(FakeBilling::new());
        let publisher = Arc::new(publisher);

        let mut routers: HashMap<String, Arc<dyn Router>> = HashMap::new();
        routers.insert(TEST_ROUTER.to_string(), router.clone());

        let context = Arc::new(ProvisionerContext {
            backend: backend.clone(),
            store: store.clone(),
            billing: billing.clone(),
            publisher: publisher.clone(),
            routers,
            default_router: Some(TEST_ROUTER.to_string()),
            settings,
        });

        Self {
            backend,
            store,
            router,
            billing,
            publisher,
            context,
        }
    }

    /// Returns a provisioner sharing this context.
    #[must_use]
    pub fn provisioner(&self) -> Provisioner {
        Provisioner::from_context(Arc::clone(&self.context))
    }

    /// Returns a parameter bundle for `spec` targeting `status`.
    #[must_use]
    pub fn args(&self, spec: MachineSpec, status: MachineStatus) -> MachineArgs {
        MachineArgs::new(spec, status, Arc::clone(&self.context))
    }
}

/// Shorthand for [`Fakes::new`].
#[must_use]
pub fn fake_context() -> Fakes {
    Fakes::new()
}

/// A spec with every identifying field set.
#[must_use]
pub fn test_spec() -> MachineSpec {
    let mut spec = MachineSpec::new("m-1", "acc-1", "web", "example.com");
    spec.carton_id = "c-1".to_string();
    spec.region = "eu-west".to_string();
    spec.storage_type = "ssd".to_string();
    spec
}

/// Settings with polling fast enough for tests.
#[must_use]
pub fn test_settings() -> ProvisionerSettings {
    ProvisionerSettings {
        poll: PollPolicy::fixed(Duration::from_millis(500), Duration::from_millis(1)),
        ..ProvisionerSettings::default()
    }
}

/// Runs a single step's forward with `args` as the only parameter.
pub async fn run_forward<S>(step: &S, args: &MachineArgs, previous: Option<&StepResult>) -> Result<StepResult>
where
    S: Step<MachineArgs> + ?Sized,
{
    let ctx = ForwardContext::new(step.name(), std::slice::from_ref(args), previous);
    step.forward(&ctx).await
}

/// Runs a single step's backward with `args` as the only parameter.
pub async fn run_backward<S>(step: &S, args: &MachineArgs, result: &StepResult) -> Result<()>
where
    S: Step<MachineArgs> + ?Sized,
{
    let ctx = BackwardContext::new(step.name(), std::slice::from_ref(args), result);
    step.backward(&ctx).await
}
