//! End-to-end runs of the provisioner operations against in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::backend::MockBillingService;
use crate::core::{MachineSpec, MachineState, MachineStatus};
use crate::errors::{BillingError, ProvisionError, RouterError};
use crate::events::{CollectingPublisher, MockEventPublisher, Notification, Outcome};
use crate::pipeline::PollPolicy;
use crate::progress::ProgressWriter;
use crate::provisioner::{Provisioner, ProvisionerSettings};
use crate::testing::{
    test_settings, test_spec, FakeBackend, Fakes, InMemoryRouter, InMemoryStore, ProgressBuffer,
};

const IP: &str = "203.0.113.7";

fn existing() -> MachineSpec {
    test_spec().with_instance_id("vm-42")
}

#[tokio::test]
async fn deploy_boots_machine_and_returns_image() {
    let fakes = Fakes::new();
    let buffer = ProgressBuffer::new();

    let image = fakes
        .provisioner()
        .deploy(&test_spec(), "img-1", buffer.writer())
        .await
        .unwrap();

    assert_eq!(image, "img-1");
    assert_eq!(
        fakes.store.statuses("m-1"),
        vec![
            MachineStatus::Launching,
            MachineStatus::VncHostUpdating,
            MachineStatus::VncHostUpdated,
            MachineStatus::VmBooting,
        ]
    );
    assert_eq!(
        fakes.store.milestones("m-1"),
        vec![MachineState::Initializing, MachineState::Initialized]
    );
    assert_eq!(fakes.backend.vms().len(), 1);
    assert!(fakes.store.record("m-1").unwrap().host_address.is_some());
    assert!(fakes.publisher.outcomes().is_empty());

    let messages = buffer.messages();
    assert_eq!(messages.first().unwrap(), "--- deploy box (web.example.com, image:img-1)");
    assert_eq!(messages.last().unwrap(), "--- deploy box (web.example.com, image:img-1) OK");
    assert!(buffer.errors().is_empty());
    assert!(buffer.contents().contains("boot complete"));
}

#[tokio::test]
async fn failed_create_rolls_back_and_announces_failure() {
    let fakes = Fakes::new();
    fakes.backend.fail_on("create");
    let buffer = ProgressBuffer::new();

    let err = fakes
        .provisioner()
        .deploy(&test_spec(), "img-1", buffer.writer())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Backend(_)));
    assert_eq!(fakes.store.status("m-1"), Some(MachineStatus::PreError));
    assert_eq!(
        fakes.store.milestones("m-1"),
        vec![MachineState::Initializing, MachineState::PreError]
    );
    assert_eq!(fakes.backend.calls(), vec!["create:web.example.com"]);
    assert!(fakes.backend.vms().is_empty());
    assert_eq!(fakes.publisher.outcomes(), vec![Outcome::Failure]);

    let errors = buffer.errors();
    assert!(errors.iter().any(|e| e.starts_with("==> ROLLBACK")));
    assert!(errors.last().unwrap().starts_with("--- deploy box (web.example.com, image:img-1) -->"));
}

#[tokio::test]
async fn broken_log_stream_unwinds_deploy() {
    let fakes = Fakes::new();
    fakes.backend.fail_on("logs");
    let buffer = ProgressBuffer::new();

    let err = fakes
        .provisioner()
        .deploy(&test_spec(), "img-1", buffer.writer())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Backend(_)));
    assert!(fakes.backend.calls().contains(&"remove:web.example.com".to_string()));
    assert!(fakes.backend.vms().is_empty());
    assert_eq!(fakes.store.status("m-1"), Some(MachineStatus::PreError));
    assert_eq!(
        fakes.store.milestones("m-1").last(),
        Some(&MachineState::PreError)
    );
    assert_eq!(fakes.publisher.outcomes(), vec![Outcome::Failure]);
    assert!(buffer.errors().iter().any(|e| e.starts_with("==> ROLLBACK")));
}

#[tokio::test]
async fn insufficient_balance_parks_machine() {
    let fakes = Fakes::with_billing();
    fakes.billing.set_insufficient();

    let err = fakes
        .provisioner()
        .deploy(&test_spec(), "img-1", ProgressWriter::discard())
        .await
        .unwrap_err();

    assert!(err.is_insufficient_funds());
    assert_eq!(fakes.store.statuses("m-1"), vec![MachineStatus::InsufficientFund]);
    assert_eq!(fakes.store.milestones("m-1"), vec![MachineState::Parked]);
    assert!(fakes.backend.calls().is_empty());
    assert_eq!(fakes.publisher.outcomes(), vec![Outcome::Failure]);
}

#[tokio::test]
async fn quota_replaces_balance_check() {
    let fakes = Fakes::with_billing();
    fakes.billing.set_insufficient();
    let spec = test_spec().with_quota("q-1");

    fakes
        .provisioner()
        .deploy(&spec, "img-1", ProgressWriter::discard())
        .await
        .unwrap();

    assert!(fakes.billing.checks().is_empty());
    assert_eq!(fakes.store.record("m-1").unwrap().quota.as_deref(), Some("q-1"));
}

#[tokio::test]
async fn billing_check_passes_with_credit() {
    let fakes = Fakes::with_billing();

    fakes
        .provisioner()
        .deploy(&test_spec(), "img-1", ProgressWriter::discard())
        .await
        .unwrap();

    assert_eq!(fakes.billing.checks(), vec!["web.example.com"]);
    assert_eq!(fakes.store.statuses("m-1")[0], MachineStatus::BalanceVerified);
}

#[tokio::test]
async fn destroy_removes_vm_and_route() {
    let fakes = Fakes::new();
    fakes.router.insert("web.example.com", IP);
    let spec = existing().with_public_ip(IP);

    fakes
        .provisioner()
        .destroy(&spec, ProgressWriter::discard())
        .await
        .unwrap();

    assert_eq!(fakes.router.route("web.example.com"), None);
    assert_eq!(
        fakes.store.statuses("m-1"),
        vec![MachineStatus::Destroying, MachineStatus::Destroyed]
    );
    assert_eq!(
        fakes.store.milestones("m-1"),
        vec![MachineState::Destroying, MachineState::Destroyed]
    );
    assert_eq!(fakes.publisher.outcomes(), vec![Outcome::Destroyed]);
}

#[tokio::test]
async fn destroy_unwinds_when_route_removal_fails() {
    let fakes = Fakes::new();
    fakes.router.insert("web.example.com", IP);
    fakes.router.fail_on("unset");
    let buffer = ProgressBuffer::new();
    let spec = existing().with_public_ip(IP);

    let err = fakes
        .provisioner()
        .destroy(&spec, buffer.writer())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Router(RouterError::Failed { .. })));
    assert!(fakes.backend.calls().contains(&"remove:web.example.com".to_string()));
    assert_eq!(
        fakes.store.statuses("m-1"),
        vec![MachineStatus::Destroying, MachineStatus::PreError]
    );
    assert_eq!(
        fakes.store.milestones("m-1"),
        vec![MachineState::Destroying, MachineState::PreError]
    );
    assert!(buffer.errors().iter().any(|e| e.contains("cannot be restored")));
    assert_eq!(fakes.publisher.outcomes(), vec![Outcome::Failure]);
}

#[tokio::test]
async fn destroy_notification_failure_does_not_fail_operation() {
    let fakes = Fakes::with_publisher(
        FakeBackend::new(),
        test_settings(),
        CollectingPublisher::failing_done(),
    );

    fakes
        .provisioner()
        .destroy(&existing(), ProgressWriter::discard())
        .await
        .unwrap();

    assert_eq!(fakes.publisher.outcomes(), vec![Outcome::Destroyed]);
}

#[tokio::test]
async fn destroy_notifies_exactly_once() {
    let mut publisher = MockEventPublisher::new();
    publisher
        .expect_done_notify()
        .withf(|spec, outcome| spec.id == "m-1" && *outcome == Outcome::Destroyed)
        .times(1)
        .returning(|_, _| Ok(()));
    publisher.expect_state_changed().never();

    let provisioner = Provisioner::builder()
        .backend(Arc::new(FakeBackend::new()))
        .store(Arc::new(InMemoryStore::new()))
        .router(Arc::new(InMemoryRouter::new("route53")))
        .publisher(Arc::new(publisher))
        .settings(test_settings())
        .build()
        .unwrap();

    provisioner
        .destroy(&existing(), ProgressWriter::discard())
        .await
        .unwrap();
}

#[tokio::test]
async fn set_state_with_public_ip_adds_route() {
    let fakes = Fakes::new();
    let spec = test_spec().with_public_ip(IP);

    fakes
        .provisioner()
        .set_state(&spec, MachineStatus::Bootstrapped, ProgressWriter::discard())
        .await
        .unwrap();

    assert_eq!(fakes.router.route("web.example.com").as_deref(), Some(IP));
    assert_eq!(
        fakes.store.statuses("m-1"),
        vec![
            MachineStatus::StateUpping,
            MachineStatus::NetworkCreating,
            MachineStatus::NetworkCreated,
            MachineStatus::StateUpped,
        ]
    );
    assert_eq!(
        fakes.publisher.notifications(),
        vec![
            Notification::StateChanged {
                machine: "web.example.com".into(),
                status: MachineStatus::Bootstrapped,
            },
            Notification::Done {
                machine: "web.example.com".into(),
                outcome: Outcome::Launched,
            },
        ]
    );
}

#[tokio::test]
async fn set_state_without_public_ip_skips_network() {
    let fakes = Fakes::new();

    fakes
        .provisioner()
        .set_state(&test_spec(), MachineStatus::Running, ProgressWriter::discard())
        .await
        .unwrap();

    assert_eq!(
        fakes.store.statuses("m-1"),
        vec![
            MachineStatus::StateUpping,
            MachineStatus::NetworkSkipped,
            MachineStatus::StateUpped,
        ]
    );
    assert_eq!(fakes.router.route("web.example.com"), None);
}

#[tokio::test]
async fn snapshot_create_and_delete() {
    let fakes = Fakes::with(FakeBackend::new().settle_after(2), test_settings());
    let provisioner = fakes.provisioner();
    let spec = existing();

    provisioner.save_image(&spec, ProgressWriter::discard()).await.unwrap();
    let record = fakes.store.record("m-1").unwrap();
    assert_eq!(record.snapshots.len(), 1);
    assert_eq!(
        record.statuses,
        vec![MachineStatus::SnapCreating, MachineStatus::Running]
    );
    let ready_probes = fakes
        .backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("snapshot_ready"))
        .count();
    assert_eq!(ready_probes, 2);

    provisioner.delete_image(&spec, ProgressWriter::discard()).await.unwrap();
    let record = fakes.store.record("m-1").unwrap();
    assert_eq!(record.snapshot_statuses, vec![MachineStatus::SnapDeleting]);
    assert_eq!(
        &record.statuses[2..],
        &[MachineStatus::SnapDeleting, MachineStatus::SnapDeleted]
    );
}

#[tokio::test]
async fn snapshot_failure_removes_partial_snapshot() {
    let fakes = Fakes::new();
    fakes.store.fail_on("snapshot");

    let err = fakes
        .provisioner()
        .save_image(&existing(), ProgressWriter::discard())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Store(_)));
    assert!(fakes.backend.calls().contains(&"remove_snapshot:web.example.com".to_string()));
    assert_eq!(fakes.store.record("m-1").unwrap().snapshot_statuses, vec![MachineStatus::Error]);
}

#[tokio::test]
async fn disk_attach_and_detach() {
    let fakes = Fakes::new();
    let provisioner = fakes.provisioner();
    let spec = existing();

    provisioner.attach_disk(&spec, ProgressWriter::discard()).await.unwrap();
    let record = fakes.store.record("m-1").unwrap();
    assert_eq!(record.disks.len(), 1);
    assert_eq!(
        record.statuses,
        vec![MachineStatus::DiskAttaching, MachineStatus::DiskAttached]
    );

    provisioner.detach_disk(&spec, ProgressWriter::discard()).await.unwrap();
    assert_eq!(
        &fakes.store.statuses("m-1")[2..],
        &[MachineStatus::DiskDetaching, MachineStatus::DiskDetached]
    );
    assert!(fakes.backend.calls().contains(&"detach_disk:web.example.com".to_string()));
}

#[tokio::test]
async fn disk_record_failure_detaches_disk() {
    let fakes = Fakes::new();
    fakes.store.fail_on("disk");

    let err = fakes
        .provisioner()
        .attach_disk(&existing(), ProgressWriter::discard())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Store(_)));
    assert!(fakes.backend.calls().contains(&"detach_disk:web.example.com".to_string()));
    assert_eq!(fakes.store.status("m-1"), Some(MachineStatus::PreError));
}

#[tokio::test]
async fn start_waits_for_running() {
    let fakes = Fakes::with(FakeBackend::new().settle_after(3), test_settings());

    fakes
        .provisioner()
        .start(&existing(), ProgressWriter::discard())
        .await
        .unwrap();

    assert_eq!(fakes.backend.power_probes(), 3);
    assert_eq!(
        fakes.store.statuses("m-1"),
        vec![MachineStatus::Starting, MachineStatus::Started]
    );
    assert_eq!(fakes.store.milestones("m-1"), vec![MachineState::Running]);
}

#[tokio::test]
async fn stop_and_restart() {
    let fakes = Fakes::new();
    let provisioner = fakes.provisioner();
    let spec = existing();

    provisioner.stop(&spec, ProgressWriter::discard()).await.unwrap();
    assert_eq!(fakes.store.milestones("m-1"), vec![MachineState::Stopped]);
    assert_eq!(fakes.store.status("m-1"), Some(MachineStatus::Stopped));

    provisioner.restart(&spec, ProgressWriter::discard()).await.unwrap();
    assert_eq!(
        fakes.store.milestones("m-1"),
        vec![MachineState::Stopped, MachineState::Running]
    );
    assert_eq!(fakes.store.status("m-1"), Some(MachineStatus::Running));
}

#[tokio::test]
async fn start_times_out() {
    let settings = ProvisionerSettings {
        poll: PollPolicy::fixed(Duration::from_millis(20), Duration::from_millis(2)),
        ..test_settings()
    };
    let fakes = Fakes::with(FakeBackend::new().settle_after(usize::MAX), settings);
    let buffer = ProgressBuffer::new();

    let err = fakes
        .provisioner()
        .start(&existing(), buffer.writer())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Timeout { .. }));
    assert_eq!(
        fakes.store.statuses("m-1"),
        vec![MachineStatus::Starting, MachineStatus::PreError]
    );
    assert!(!buffer.errors().is_empty());
}

#[tokio::test]
async fn set_box_status_writes_only_status() {
    let fakes = Fakes::new();
    let buffer = ProgressBuffer::new();

    fakes
        .provisioner()
        .set_box_status(&test_spec(), MachineStatus::Error, buffer.writer())
        .await
        .unwrap();

    assert_eq!(fakes.store.statuses("m-1"), vec![MachineStatus::Error]);
    assert!(fakes.backend.calls().is_empty());
    assert_eq!(
        buffer.messages().last().unwrap(),
        &format!("--- status web.example.com box {} OK", MachineStatus::Error)
    );
}

#[tokio::test]
async fn operations_without_sink_succeed() {
    let fakes = Fakes::new();
    let provisioner = fakes.provisioner();
    let spec = existing();

    provisioner.deploy(&test_spec(), "img-1", ProgressWriter::discard()).await.unwrap();
    provisioner.start(&spec, ProgressWriter::discard()).await.unwrap();
    provisioner.destroy(&spec, ProgressWriter::discard()).await.unwrap();
}

#[tokio::test]
async fn invalid_spec_touches_nothing() {
    let fakes = Fakes::new();
    let buffer = ProgressBuffer::new();
    let spec = MachineSpec::new("m-1", "acc-1", "bad_name!", "example.com");

    let err = fakes
        .provisioner()
        .deploy(&spec, "img-1", buffer.writer())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::InvalidSpec(_)));
    assert!(fakes.backend.calls().is_empty());
    assert!(fakes.store.record("m-1").is_none());
    assert!(fakes.publisher.outcomes().is_empty());

    let errors = buffer.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("--- invalid box (bad_name!.example.com) -->"));
    assert!(buffer.messages().iter().all(|m| !m.contains("deploy box")));
}

#[tokio::test]
async fn invalid_spec_is_reported_by_every_operation() {
    let fakes = Fakes::new();
    let provisioner = fakes.provisioner();
    let spec = MachineSpec::new("m-1", "acc-1", "bad_name!", "example.com");
    let buffer = ProgressBuffer::new();

    provisioner.destroy(&spec, buffer.writer()).await.unwrap_err();
    provisioner.start(&spec, buffer.writer()).await.unwrap_err();
    provisioner.save_image(&spec, buffer.writer()).await.unwrap_err();
    provisioner
        .set_state(&spec, MachineStatus::Running, buffer.writer())
        .await
        .unwrap_err();
    provisioner
        .set_box_status(&spec, MachineStatus::Error, buffer.writer())
        .await
        .unwrap_err();
    provisioner
        .image_deploy(&spec, "img-7", buffer.writer())
        .await
        .unwrap_err();

    assert_eq!(buffer.errors().len(), 6);
    assert!(buffer.errors().iter().all(|e| e.starts_with("--- invalid box")));
    assert!(fakes.backend.calls().is_empty());
    assert!(fakes.publisher.outcomes().is_empty());
}

#[tokio::test]
async fn image_lookup_failure_is_reported() {
    let fakes = Fakes::new();
    fakes.store.fail_on("image");
    let buffer = ProgressBuffer::new();

    let err = fakes
        .provisioner()
        .image_deploy(&test_spec(), "img-7", buffer.writer())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Store(_)));
    let errors = buffer.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("--- deploy box (web.example.com, image:img-7) -->"));
    assert!(errors[0].contains("injected failure"));
    assert!(fakes.backend.calls().is_empty());
}

#[tokio::test]
async fn git_deploy_picks_build_image() {
    let fakes = Fakes::new();
    let provisioner = fakes.provisioner();

    let image = provisioner
        .git_deploy(&test_spec(), ProgressWriter::discard())
        .await
        .unwrap();
    assert_eq!(image, "ubuntu");

    let mut spec = test_spec();
    spec.repo.source = "https://git.example.com/acme/app.git".into();
    spec.repo.one_click = true;
    let image = provisioner.git_deploy(&spec, ProgressWriter::discard()).await.unwrap();
    assert_eq!(image, "https://git.example.com/acme/app.git");
}

#[tokio::test]
async fn image_deploy_falls_back_to_build_image() {
    let fakes = Fakes::new();
    fakes.store.register_image("web.example.com", "img-7");
    let provisioner = fakes.provisioner();

    let image = provisioner
        .image_deploy(&test_spec(), "img-7", ProgressWriter::discard())
        .await
        .unwrap();
    assert_eq!(image, "img-7");

    let image = provisioner
        .image_deploy(&test_spec(), "img-unknown", ProgressWriter::discard())
        .await
        .unwrap();
    assert_eq!(image, "ubuntu");
}

#[tokio::test]
async fn addr_and_cnames() {
    let fakes = Fakes::new();
    let provisioner = fakes.provisioner();
    let spec = test_spec();

    assert!(matches!(
        provisioner.addr(&spec).await,
        Err(ProvisionError::Router(RouterError::NoRoute(_)))
    ));

    fakes.router.insert("web.example.com", IP);
    assert_eq!(provisioner.addr(&spec).await.unwrap(), IP);

    provisioner.set_cname(&spec, "www.acme.io").await.unwrap();
    assert_eq!(fakes.router.route("www.acme.io").as_deref(), Some("web.example.com"));

    provisioner.unset_cname(&spec, "www.acme.io").await.unwrap();
    assert_eq!(fakes.router.route("www.acme.io"), None);

    let elsewhere = test_spec().with_router("cloudflare");
    assert!(matches!(
        provisioner.set_cname(&elsewhere, "www.acme.io").await,
        Err(ProvisionError::Router(RouterError::NotFound(_)))
    ));
}

#[tokio::test]
async fn trigger_bills_deducts() {
    let fakes = Fakes::new();

    fakes
        .provisioner()
        .trigger_bills("acc-1", "c-1", "web.example.com")
        .await
        .unwrap();

    assert_eq!(fakes.billing.deductions(), vec!["acc-1/c-1/web.example.com"]);
}

#[tokio::test]
async fn trigger_bills_surfaces_billing_errors() {
    let mut billing = MockBillingService::new();
    billing
        .expect_deduct()
        .times(1)
        .returning(|account, _, _| Err(BillingError::insufficient(account, "no credit")));

    let provisioner = Provisioner::builder()
        .backend(Arc::new(FakeBackend::new()))
        .store(Arc::new(InMemoryStore::new()))
        .billing(Arc::new(billing))
        .build()
        .unwrap();

    let err = provisioner
        .trigger_bills("acc-1", "c-1", "web.example.com")
        .await
        .unwrap_err();
    assert!(err.is_insufficient_funds());
}

#[tokio::test]
async fn metric_envs_reports_progress() {
    let fakes = Fakes::new();
    let provisioner = fakes.provisioner();
    let buffer = ProgressBuffer::new();

    let records = provisioner
        .metric_envs(100, 200, "eu-west", buffer.writer())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["region"], "eu-west");
    assert_eq!(
        buffer.messages(),
        vec![
            "--- pull metrics for the duration (100, 200)",
            "--- pull metrics for the duration (100, 200)OK",
        ]
    );

    fakes.backend.fail_on("showback");
    let failed = ProgressBuffer::new();
    assert!(provisioner
        .metric_envs(100, 200, "eu-west", failed.writer())
        .await
        .is_err());
    assert_eq!(failed.errors().len(), 1);
}
