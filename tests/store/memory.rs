use std::time::Duration;

use claimbench::{
    store::{MemoryStore, ReservationStore, StoreErrorKind},
    types::{ClaimStatus, IsolationLevel, TEST_LAB_ID},
};
use tokio::time::Instant;

#[tokio::test]
async fn given_seeded_store_when_listing_then_resources_are_available_and_ordered_by_id() {
    let store = MemoryStore::seeded(4, 3);

    assert_eq!(store.count_resources().await.expect("count"), 3);
    assert_eq!(store.eligible_actors().await.expect("actors"), vec![1, 2, 3, 4]);

    let resources = store.list_available_resources().await.expect("list");
    let ids: Vec<i64> = resources.iter().map(|resource| resource.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(resources[0].code, "R-001");
    assert!(resources.iter().all(|resource| resource.available));
}

#[tokio::test]
async fn given_committed_claim_when_reading_active_claims_then_row_has_confirmed_shape() {
    let store = MemoryStore::seeded(2, 2);

    let mut tx = store.begin(IsolationLevel::Repeatable).await.expect("begin");
    assert!(!tx.has_active_claim(1).await.expect("check"));
    assert!(tx.lock_resource_if_available(2).await.expect("lock"));
    tx.bind_resource_and_insert_claim(1, 2).await.expect("bind");
    tx.commit().await.expect("commit");

    let claims = store.active_claims().await.expect("claims");
    assert_eq!(claims.len(), 1);
    let claim = &claims[0];
    assert_eq!(claim.actor_id, 1);
    assert_eq!(claim.resource_id, 2);
    assert_eq!(claim.lab_id, TEST_LAB_ID);
    assert_eq!(claim.status, ClaimStatus::Confirmed);
    assert_eq!(claim.starts_at - claim.requested_at, time::Duration::minutes(30));
    assert_eq!(claim.ends_at - claim.requested_at, time::Duration::minutes(150));

    let available: Vec<i64> = store
        .list_available_resources()
        .await
        .expect("list")
        .into_iter()
        .map(|resource| resource.id)
        .collect();
    assert_eq!(available, vec![1]);
}

#[tokio::test]
async fn given_uncommitted_bind_when_checking_same_actor_then_claim_is_visible_inside_transaction() {
    let store = MemoryStore::seeded(1, 2);

    let mut tx = store.begin(IsolationLevel::Weak).await.expect("begin");
    assert!(tx.lock_resource_if_available(1).await.expect("lock"));
    tx.bind_resource_and_insert_claim(1, 1).await.expect("bind");
    assert!(tx.has_active_claim(1).await.expect("check"));

    let mut other = store.begin(IsolationLevel::Weak).await.expect("begin other");
    assert!(
        !other.has_active_claim(1).await.expect("check other"),
        "uncommitted claims stay private"
    );

    tx.rollback().await.expect("rollback");
    other.rollback().await.expect("rollback other");
    assert_eq!(store.available_count(), 2);
    assert!(store.claim_rows().is_empty());
}

#[tokio::test]
async fn given_unlocked_resource_when_binding_then_invariant_error_is_returned() {
    let store = MemoryStore::seeded(1, 1);

    let mut tx = store.begin(IsolationLevel::Weak).await.expect("begin");
    let err = tx
        .bind_resource_and_insert_claim(1, 1)
        .await
        .expect_err("bind needs the row lock");
    assert_eq!(err.kind, StoreErrorKind::Invariant);
    assert!(!err.is_conflict_abort());
}

#[tokio::test]
async fn given_taken_resource_when_locking_at_any_level_then_it_is_reported_unavailable() {
    let store = MemoryStore::seeded(2, 1);

    let mut tx = store.begin(IsolationLevel::Weak).await.expect("begin");
    assert!(tx.lock_resource_if_available(1).await.expect("lock"));
    tx.bind_resource_and_insert_claim(1, 1).await.expect("bind");
    tx.commit().await.expect("commit");

    for isolation in IsolationLevel::ALL {
        let mut tx = store.begin(isolation).await.expect("begin");
        assert!(
            !tx.lock_resource_if_available(1).await.expect("lock"),
            "{isolation} should see the resource as taken"
        );
        tx.rollback().await.expect("rollback");
    }
}

#[tokio::test(start_paused = true)]
async fn given_op_latency_when_running_a_cycle_then_every_statement_waits() {
    let store = MemoryStore::seeded(1, 1).with_op_latency(Duration::from_millis(40));
    let started = Instant::now();

    let mut tx = store.begin(IsolationLevel::Strict).await.expect("begin");
    assert!(!tx.has_active_claim(1).await.expect("check"));
    assert!(tx.lock_resource_if_available(1).await.expect("lock"));
    tx.bind_resource_and_insert_claim(1, 1).await.expect("bind");
    tx.commit().await.expect("commit");

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(store.available_count(), 0);
}

#[tokio::test]
async fn given_claims_from_a_run_when_resetting_then_store_returns_to_seeded_state() {
    let store = MemoryStore::seeded(3, 3);
    for actor in 1..=3 {
        let mut tx = store.begin(IsolationLevel::Strict).await.expect("begin");
        assert!(tx.lock_resource_if_available(actor).await.expect("lock"));
        tx.bind_resource_and_insert_claim(actor, actor)
            .await
            .expect("bind");
        tx.commit().await.expect("commit");
    }
    assert_eq!(store.available_count(), 0);

    store
        .reset_all_resources_and_purge_test_claims()
        .await
        .expect("reset");

    assert_eq!(store.available_count(), 3);
    assert!(store.active_claims().await.expect("claims").is_empty());

    let mut tx = store.begin(IsolationLevel::Repeatable).await.expect("begin");
    assert!(!tx.has_active_claim(1).await.expect("check"));
    assert!(tx.lock_resource_if_available(1).await.expect("lock after reset"));
}
