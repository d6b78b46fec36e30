//! Architectural Contract Test: End-to-End Reconciliation
//!
//! This test walks one resource through its whole life via the Reconciler.
//!
//! Constraints verified:
//! - Trigger 1: Observe→NotExists, Create called, status becomes Ready
//! - Trigger 2: Observe→Exists, status unchanged, no Create/Update call
//! - Trigger 3 (deletion intent): Delete called, tracker entry removed,
//!   a later Observe reports NotExists
//! - Failures are written to the status and surfaced as events

mod common;

use common::*;
use xproc_core::resource::{
    ConditionReason, ConditionStatus, ConditionType, DesiredState, ProcessState, ProviderConfig,
    SecretReference,
};
use xproc_core::traits::{ExternalClient, ExternalConnector, ResourceStore};
use xproc_core::{Error, ReconcileContext, ReconcileEvent, ReconcileOutcome};

#[tokio::test]
async fn three_trigger_lifecycle_of_p1() {
    let harness = Harness::new().await;
    harness
        .resources
        .apply(DesiredState::process("proc-a", "p-1"))
        .await;
    let (reconciler, mut events) = harness.reconciler(fast_config());

    // Trigger 1
    let outcome = reconciler.reconcile("proc-a").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Created);
    assert_eq!(harness.gateway.create_call_count(), 1);

    let after_create = harness.stored("proc-a").await;
    assert!(after_create.status.is_ready());
    assert_eq!(after_create.status.at_provider.state, Some(ProcessState::Ok));
    let synced = after_create.status.condition(ConditionType::Synced).unwrap();
    assert_eq!(synced.status, ConditionStatus::True);

    // Trigger 2
    let outcome = reconciler.reconcile("proc-a").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::UpToDate);
    assert_eq!(harness.gateway.create_call_count(), 1);
    assert_eq!(harness.stored("proc-a").await.status, after_create.status);

    // Trigger 3
    harness.resources.request_deletion("proc-a").await.unwrap();
    let outcome = reconciler.reconcile("proc-a").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Deleted);
    assert_eq!(harness.gateway.delete_call_count(), 1);
    assert!(harness.tracker.is_empty().await);
    assert!(harness.resources.get("proc-a").await.unwrap().is_none());

    let ctx = ReconcileContext::background();
    let mut fresh = DesiredState::process("proc-a", "p-1");
    let client = harness.connector().connect(&ctx, &fresh).await.unwrap();
    assert!(!client.observe(&ctx, &mut fresh).await.unwrap().resource_exists());

    let events = drain_events(&mut events);
    assert_eq!(
        events,
        vec![
            ReconcileEvent::Created {
                name: "proc-a".to_string(),
                external_id: "p-1".to_string(),
            },
            ReconcileEvent::UpToDate {
                name: "proc-a".to_string(),
            },
            ReconcileEvent::Deleted {
                name: "proc-a".to_string(),
                external_id: "p-1".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn connection_details_are_published_and_removed() {
    let harness = Harness::new().await;
    let secret = SecretReference::new("default", "proc-a-conn");
    harness
        .resources
        .apply(DesiredState::process("proc-a", "p-1").with_connection_secret(secret.clone()))
        .await;
    let (reconciler, _events) = harness.reconciler(fast_config());

    reconciler.reconcile("proc-a").await.unwrap();
    let published = harness.secrets.get(&secret).await.expect("details published");
    assert_eq!(published.get("externalID"), Some(&b"p-1".to_vec()));
    assert_eq!(published.get("endpoint"), Some(&b"http://mock:12345".to_vec()));

    harness.resources.request_deletion("proc-a").await.unwrap();
    reconciler.reconcile("proc-a").await.unwrap();
    assert!(harness.secrets.get(&secret).await.is_none());
}

#[tokio::test]
async fn failure_is_written_to_status() {
    let harness = Harness::new().await;
    harness
        .configs
        .apply(
            ProviderConfig::new("lab")
                .with_secret_credentials(SecretReference::new("crossplane", "creds"), "token"),
        )
        .await;
    harness
        .resources
        .apply(DesiredState::process("proc-a", "p-1").with_provider_config("lab"))
        .await;
    let (reconciler, mut events) = harness.reconciler(fast_config());

    let err = reconciler.reconcile("proc-a").await.unwrap_err();
    assert!(matches!(err, Error::CredentialResolutionFailed(_)));

    let stored = harness.stored("proc-a").await;
    let synced = stored.status.condition(ConditionType::Synced).unwrap();
    assert_eq!(synced.status, ConditionStatus::False);
    assert_eq!(synced.reason, ConditionReason::ReconcileError);
    assert!(synced.message.as_deref().unwrap_or_default().contains("credentials"));

    let events = drain_events(&mut events);
    assert!(matches!(
        events.as_slice(),
        [ReconcileEvent::Failed { retryable: true, .. }]
    ));
}

#[tokio::test]
async fn unconfirmed_create_is_never_reported_ready() {
    let harness = Harness::new().await;
    harness.gateway.fail_next_creates(2);
    harness
        .resources
        .apply(DesiredState::process("proc-a", "p-1"))
        .await;
    let (reconciler, _events) = harness.reconciler(fast_config());

    // Pass 1: create fails. Pass 2: the pending entry routes to update,
    // whose re-issued create fails too.
    let first = reconciler.reconcile("proc-a").await.unwrap_err();
    assert!(matches!(first, Error::CreateFailed { .. }), "{first}");
    let second = reconciler.reconcile("proc-a").await.unwrap_err();
    assert!(matches!(second, Error::UpdateFailed { .. }), "{second}");

    assert!(harness.gateway.server_processes().is_empty());
    let stored = harness.stored("proc-a").await;
    assert!(!stored.status.is_ready());
    let ready = stored.status.condition(ConditionType::Ready).unwrap();
    assert_eq!(ready.reason, ConditionReason::Unavailable);
    assert_eq!(stored.status.at_provider.state, Some(ProcessState::Failed));

    // Pass 3 succeeds and only then is the resource Ready
    assert_eq!(
        reconciler.reconcile("proc-a").await.unwrap(),
        ReconcileOutcome::Updated
    );
    let stored = harness.stored("proc-a").await;
    assert!(stored.status.is_ready());
    assert_eq!(stored.status.at_provider.state, Some(ProcessState::Ok));
    assert_eq!(harness.gateway.server_processes(), vec!["p-1"]);
}

#[tokio::test]
async fn changed_identifier_is_inconsistent_and_not_retryable() {
    let harness = Harness::new().await;
    harness
        .resources
        .apply(DesiredState::process("proc-a", "p-1"))
        .await;
    let (reconciler, _events) = harness.reconciler(fast_config());
    reconciler.reconcile("proc-a").await.unwrap();

    let mut changed = harness.stored("proc-a").await;
    changed.spec.for_provider.id = "p-2".to_string();
    harness.resources.apply(changed).await;

    let err = reconciler.reconcile("proc-a").await.unwrap_err();
    assert!(err.is_inconsistent());
    assert!(!err.is_retryable());
    assert_eq!(harness.gateway.create_call_count(), 1);
}

#[tokio::test]
async fn missing_record_is_not_found() {
    let harness = Harness::new().await;
    let (reconciler, _events) = harness.reconciler(fast_config());

    let outcome = reconciler.reconcile("ghost").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::NotFound);
}
