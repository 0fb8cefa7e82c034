use std::{sync::Arc, time::Duration};

use claimbench::{
    harness::{Harness, HarnessError},
    store::{MemoryStore, ReservationStore},
    types::IsolationLevel,
};

use crate::support::{assert_run_invariants, harness_over, seeded_config};

#[tokio::test(start_paused = true)]
async fn given_one_resource_per_actor_when_running_weak_then_everyone_is_served_from_preferences() {
    let store = MemoryStore::seeded(5, 5);
    let harness = harness_over(&store);

    let summary = harness
        .simulate(5, IsolationLevel::Weak)
        .await
        .expect("run should complete");

    assert_eq!(summary.successes, 5);
    assert_eq!(summary.final_available, 0);
    assert_eq!(summary.served_preferred, 5);
    assert!(summary.all_served());
    assert!((summary.success_rate_pct - 100.0).abs() < f64::EPSILON);
    assert_run_invariants(&store, &summary, 5);
}

#[tokio::test(start_paused = true)]
async fn given_three_resources_and_ten_actors_when_running_strict_then_exactly_three_are_served() {
    let store = MemoryStore::seeded(10, 3);
    let harness = harness_over(&store);

    let summary = harness
        .simulate(10, IsolationLevel::Strict)
        .await
        .expect("run should complete");

    assert_eq!(summary.successes, 3);
    assert_eq!(summary.unserved, 7);
    assert_eq!(summary.final_available, 0);
    assert_eq!(
        summary.served_escalation, 0,
        "30% completion never reaches the escalation threshold"
    );
    assert_run_invariants(&store, &summary, 3);
}

#[tokio::test(start_paused = true)]
async fn given_empty_inventory_when_running_then_summary_reports_zero_without_claims() {
    let store = MemoryStore::seeded(5, 0);
    let harness = harness_over(&store);

    let summary = harness
        .simulate(5, IsolationLevel::Repeatable)
        .await
        .expect("empty inventory is not an error");

    assert_eq!(summary.successes, 0);
    assert_eq!(summary.initial_available, 0);
    assert_eq!(summary.unserved, 5);
    assert!(summary.assignments.is_empty());
    assert!(store.claim_rows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn given_slow_store_when_actors_contend_then_invariants_hold_at_every_isolation_level() {
    let store = MemoryStore::seeded(10, 4).with_op_latency(Duration::from_millis(5));
    let harness = harness_over(&store);

    for isolation in IsolationLevel::ALL {
        harness.reset_state().await.expect("reset");

        let summary = harness
            .simulate(10, isolation)
            .await
            .expect("run should complete");

        assert_eq!(summary.isolation, isolation);
        assert_eq!(summary.successes, 4, "{isolation}: every resource should be claimed");
        assert_run_invariants(&store, &summary, 4);
    }
}

#[tokio::test(start_paused = true)]
async fn given_more_actors_than_resources_when_inventory_runs_out_then_leftover_actors_stay_unserved()
 {
    let mut config = seeded_config();
    config.escalation.min_round = 0;
    config.escalation.completion_threshold = 0.5;
    let store = MemoryStore::seeded(12, 10).with_op_latency(Duration::from_millis(3));
    let harness = Harness::new(Arc::new(store.clone()), config);

    let summary = harness
        .simulate(12, IsolationLevel::Repeatable)
        .await
        .expect("run should complete");

    assert_eq!(summary.successes, 10);
    assert_eq!(summary.unserved, 2);
    assert_eq!(
        summary.served_preferred + summary.served_scan + summary.served_escalation,
        summary.successes
    );
    assert_run_invariants(&store, &summary, 10);
}

#[tokio::test(start_paused = true)]
async fn given_listed_resource_held_by_another_transaction_when_most_actors_are_served_then_last_actor_claims_it_during_escalation()
 {
    let mut config = seeded_config();
    config.scan.preferred_jitter_ms = 0;
    config.scan.jitter_ms = 0;
    config.scan.backoff_unit_ms = 100;
    config.escalation.min_round = 0;
    config.escalation.completion_threshold = 0.5;
    config.escalation.sub_rounds = 20;
    config.escalation.idle_delay_ms = 50;
    let store = MemoryStore::seeded(5, 5);
    let harness = Harness::new(Arc::new(store.clone()), config);

    // Resource 5 stays listed as available but every lock attempt on it is
    // skipped until the holder rolls back. Four actors are served at once;
    // the fifth fails scan rounds 0 and 1 (completion 0.8) and escalates at
    // ~100ms. Escalation polls every 50ms for about a second.
    let mut holder = store
        .begin(IsolationLevel::Weak)
        .await
        .expect("begin holder");
    assert!(holder.lock_resource_if_available(5).await.expect("lock"));
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        holder.rollback().await.expect("release holder");
    });

    let summary = harness
        .simulate(5, IsolationLevel::Weak)
        .await
        .expect("run should complete");
    release.await.expect("holder task");

    assert_eq!(summary.initial_available, 5);
    assert_eq!(summary.successes, 5);
    assert_eq!(summary.served_escalation, 1);
    assert_eq!(summary.served_preferred + summary.served_scan, 4);
    assert!(summary.all_served());
    assert_run_invariants(&store, &summary, 5);
}

#[tokio::test(start_paused = true)]
async fn given_more_requested_actors_than_eligible_when_running_then_count_is_clamped() {
    let store = MemoryStore::seeded(3, 10);
    let harness = harness_over(&store);

    let summary = harness
        .simulate(8, IsolationLevel::Weak)
        .await
        .expect("run should complete");

    assert_eq!(summary.actor_count, 3);
    assert_eq!(summary.successes, 3);
    assert_eq!(summary.final_available, 7);
    assert_run_invariants(&store, &summary, 10);
}

#[tokio::test]
async fn given_invalid_setup_when_running_then_setup_errors_are_returned() {
    let harness = harness_over(&MemoryStore::seeded(3, 3));
    let err = harness
        .simulate(0, IsolationLevel::Weak)
        .await
        .expect_err("zero actors is rejected");
    assert!(matches!(err, HarnessError::InvalidActorCount));

    let harness = harness_over(&MemoryStore::seeded(0, 3));
    let err = harness
        .simulate(2, IsolationLevel::Weak)
        .await
        .expect_err("no eligible actors is rejected");
    assert!(matches!(err, HarnessError::NoEligibleActors));
}

#[tokio::test(start_paused = true)]
async fn given_finished_run_when_resetting_twice_then_next_run_starts_from_full_inventory() {
    let store = MemoryStore::seeded(4, 4);
    let harness = harness_over(&store);

    assert_eq!(harness.check_store().await.expect("check"), 4);
    let first = harness
        .simulate(4, IsolationLevel::Strict)
        .await
        .expect("first run");
    assert_eq!(first.successes, 4);

    harness.reset_state().await.expect("first reset");
    harness.reset_state().await.expect("second reset");
    assert_eq!(store.available_count(), 4);
    assert!(store.claim_rows().is_empty());

    let second = harness
        .simulate(4, IsolationLevel::Strict)
        .await
        .expect("second run");
    assert_eq!(second.initial_available, 4);
    assert_eq!(second.successes, 4);
}
