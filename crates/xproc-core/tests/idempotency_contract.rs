//! Architectural Contract Test: At-Least-Once Safety
//!
//! This test verifies that repeated or retried lifecycle calls never
//! produce duplicate remote identities.
//!
//! Constraints verified:
//! - Create invoked twice for one identifier yields one remote process
//! - A restart with a persistent tracker does not re-create
//! - A restart with a fresh tracker re-issues a create the server absorbs
//!
//! If this test fails, retries can leak duplicate processes.

mod common;

use common::*;
use std::sync::Arc;
use xproc_core::resource::DesiredState;
use xproc_core::traits::{ExistenceTracker, ExternalClient, ExternalConnector};
use xproc_core::{
    CommonCredentialExtractor, FileExistenceTracker, ProcessConnector, ReconcileContext,
    ReconcileOutcome,
};

#[tokio::test]
async fn create_twice_yields_single_remote_identity() {
    let harness = Harness::new().await;
    let ctx = ReconcileContext::background();
    let mut desired = DesiredState::process("proc-a", "p-1");
    let client = harness.connector().connect(&ctx, &desired).await.unwrap();

    client.observe(&ctx, &mut desired).await.unwrap();
    client.create(&ctx, &mut desired).await.unwrap();
    client
        .create(&ctx, &mut desired)
        .await
        .expect("duplicate create is absorbed");

    assert_eq!(harness.gateway.create_call_count(), 2);
    assert_eq!(harness.gateway.server_processes(), vec!["p-1"]);
    assert_eq!(harness.tracker.len().await, 1);
}

#[tokio::test]
async fn restart_with_file_tracker_does_not_recreate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tracker.json");
    let gateway = MockGateway::new();

    // First run: create p-1 and persist the tracker
    {
        let harness = Harness::with_gateway(MockGateway::sharing_counters_with(&gateway)).await;
        let tracker = FileExistenceTracker::new(&path).await.unwrap();
        let connector = connector_with_tracker(&harness, Arc::new(tracker));
        let ctx = ReconcileContext::background();
        let mut desired = DesiredState::process("proc-a", "p-1");

        let client = connector.connect(&ctx, &desired).await.unwrap();
        assert!(!client.observe(&ctx, &mut desired).await.unwrap().resource_exists());
        client.create(&ctx, &mut desired).await.unwrap();
    }

    // Second run: the reloaded tracker already knows p-1
    {
        let harness = Harness::with_gateway(MockGateway::sharing_counters_with(&gateway)).await;
        let tracker = FileExistenceTracker::new(&path).await.unwrap();
        assert!(tracker.exists("p-1").await.unwrap());
        let connector = connector_with_tracker(&harness, Arc::new(tracker));
        let ctx = ReconcileContext::background();
        let mut desired = DesiredState::process("proc-a", "p-1");

        let client = connector.connect(&ctx, &desired).await.unwrap();
        let observation = client.observe(&ctx, &mut desired).await.unwrap();
        assert!(observation.resource_up_to_date());
    }

    assert_eq!(gateway.create_call_count(), 1);
}

#[tokio::test]
async fn restart_with_fresh_tracker_recreates_idempotently() {
    let gateway = MockGateway::new();

    for _ in 0..2 {
        let harness = Harness::with_gateway(MockGateway::sharing_counters_with(&gateway)).await;
        harness
            .resources
            .apply(DesiredState::process("proc-a", "p-1"))
            .await;
        let (reconciler, _events) = harness.reconciler(fast_config());

        let outcome = reconciler.reconcile("proc-a").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created);
    }

    assert_eq!(gateway.create_call_count(), 2);
    assert_eq!(gateway.server_processes(), vec!["p-1"]);
}

fn connector_with_tracker(harness: &Harness, tracker: Arc<dyn ExistenceTracker>) -> ProcessConnector {
    ProcessConnector::new(
        Arc::new(harness.configs.clone()),
        Arc::new(harness.usage.clone()),
        Arc::new(CommonCredentialExtractor::new(Arc::new(harness.secrets.clone()))),
        harness.registry.clone(),
        tracker,
    )
}
