use std::{sync::Arc, time::Duration};

use claimbench::{
    harness::{ClaimError, ClaimOutcome, ClaimProtocol, types::ClaimRetryConfig},
    store::{MemoryStore, StoreErrorKind},
    types::IsolationLevel,
};
use tokio::time::Instant;

fn protocol_over(store: &MemoryStore) -> ClaimProtocol {
    ClaimProtocol::new(Arc::new(store.clone()), ClaimRetryConfig::default())
}

#[tokio::test(start_paused = true)]
async fn given_three_conflict_aborts_when_claiming_then_backoff_is_waited_and_claim_binds() {
    let store = MemoryStore::seeded(2, 2);
    store.inject_failures(StoreErrorKind::ConflictAbort, 3);
    let protocol = protocol_over(&store);
    let started = Instant::now();

    let outcome = protocol
        .attempt_claim(1, 1, IsolationLevel::Weak)
        .await
        .expect("claim should succeed on the fourth attempt");

    assert_eq!(outcome, ClaimOutcome::Bound);
    // 20ms x (1 + 4 + 9) before jitter
    assert!(started.elapsed() >= Duration::from_millis(280));
    assert_eq!(store.pending_injected_failures(), 0);
    assert_eq!(store.available_count(), 1);
    assert_eq!(store.claim_rows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn given_conflicts_past_the_ceiling_when_claiming_then_retries_are_exhausted() {
    let store = MemoryStore::seeded(1, 1);
    store.inject_failures(StoreErrorKind::ConflictAbort, 10);
    let protocol = protocol_over(&store);

    let err = protocol
        .attempt_claim(1, 1, IsolationLevel::Repeatable)
        .await
        .expect_err("ten conflicts exhaust the default ceiling");

    match err {
        ClaimError::RetriesExhausted {
            actor_id,
            resource_id,
            attempts,
        } => {
            assert_eq!((actor_id, resource_id, attempts), (1, 1, 10));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.available_count(), 1);
    assert!(!store.is_locked(1), "aborted attempts must release the row");
    assert!(store.claim_rows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn given_strict_isolation_when_claiming_then_retry_ceiling_is_twenty() {
    let store = MemoryStore::seeded(1, 1);
    store.inject_failures(StoreErrorKind::ConflictAbort, 19);
    let protocol = protocol_over(&store);

    let outcome = protocol
        .attempt_claim(1, 1, IsolationLevel::Strict)
        .await
        .expect("nineteen conflicts stay under the strict ceiling");
    assert!(outcome.is_bound());

    let store = MemoryStore::seeded(1, 1);
    store.inject_failures(StoreErrorKind::ConflictAbort, 20);
    let err = protocol_over(&store)
        .attempt_claim(1, 1, IsolationLevel::Strict)
        .await
        .expect_err("twenty conflicts exhaust the strict ceiling");
    assert!(matches!(err, ClaimError::RetriesExhausted { attempts: 20, .. }));
}

#[tokio::test(start_paused = true)]
async fn given_non_conflict_failure_when_claiming_then_error_is_returned_without_retry() {
    let store = MemoryStore::seeded(1, 1);
    store.inject_failures(StoreErrorKind::Query, 1);
    store.inject_failures(StoreErrorKind::ConflictAbort, 1);
    let protocol = protocol_over(&store);

    let err = protocol
        .attempt_claim(1, 1, IsolationLevel::Weak)
        .await
        .expect_err("query failures are fatal");

    match err {
        ClaimError::Store { source, .. } => assert_eq!(source.kind, StoreErrorKind::Query),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        store.pending_injected_failures(),
        1,
        "no second attempt should have been made"
    );
    assert_eq!(store.available_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn given_actor_with_active_claim_when_claiming_again_then_already_served() {
    let store = MemoryStore::seeded(1, 2);
    let protocol = protocol_over(&store);

    let first = protocol
        .attempt_claim(1, 1, IsolationLevel::Weak)
        .await
        .expect("first claim");
    let second = protocol
        .attempt_claim(1, 2, IsolationLevel::Weak)
        .await
        .expect("second claim");

    assert_eq!(first, ClaimOutcome::Bound);
    assert_eq!(second, ClaimOutcome::AlreadyServed);
    assert_eq!(store.available_count(), 1);
    assert!(!store.is_locked(2));
}

#[tokio::test(start_paused = true)]
async fn given_taken_resource_when_another_actor_claims_then_unavailable() {
    let store = MemoryStore::seeded(2, 1);
    let protocol = protocol_over(&store);

    for isolation in IsolationLevel::ALL {
        let outcome = protocol
            .attempt_claim(1, 1, isolation)
            .await
            .expect("claim");
        if isolation == IsolationLevel::Weak {
            assert_eq!(outcome, ClaimOutcome::Bound);
        } else {
            assert_eq!(outcome, ClaimOutcome::AlreadyServed);
        }

        let outcome = protocol
            .attempt_claim(2, 1, isolation)
            .await
            .expect("contested claim");
        assert_eq!(outcome, ClaimOutcome::Unavailable);
    }
    assert_eq!(store.claim_rows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn given_store_slower_than_attempt_timeout_when_claiming_then_each_timeout_spends_an_attempt() {
    let store = MemoryStore::seeded(1, 1).with_op_latency(Duration::from_secs(11));
    let protocol = protocol_over(&store);
    let started = Instant::now();

    let err = protocol
        .attempt_claim(1, 1, IsolationLevel::Weak)
        .await
        .expect_err("every cycle times out");

    assert!(matches!(err, ClaimError::RetriesExhausted { attempts: 10, .. }));
    assert!(started.elapsed() >= Duration::from_secs(100));
    assert_eq!(store.available_count(), 1);
    assert!(store.claim_rows().is_empty());
}
