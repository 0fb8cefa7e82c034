use std::{fs, time::Duration};

use claimbench::{
    harness::RunSummary,
    store::MemoryStore,
    sweep::{SweepConfig, run_sweep},
    types::IsolationLevel,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::support::harness_over;

fn quick_sweep() -> SweepConfig {
    SweepConfig {
        isolation_levels: vec![IsolationLevel::Weak, IsolationLevel::Strict],
        actor_counts: vec![2, 3],
        warmup_ms: 10,
        cooldown_ms: 20,
        strict_cooldown_ms: 40,
        post_reset_pause_ms: 5,
        ..SweepConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn given_sweep_over_counts_and_levels_when_run_then_each_step_starts_from_full_inventory() {
    let store = MemoryStore::seeded(3, 3);
    let harness = harness_over(&store);
    let work_dir = std::env::temp_dir().join(format!("claimbench-sweep-test-{}", Uuid::now_v7()));
    let results_path = work_dir.join("results.json");
    let config = SweepConfig {
        results_path: Some(results_path.clone()),
        ..quick_sweep()
    };

    let summaries = run_sweep(&harness, &config, CancellationToken::new())
        .await
        .expect("sweep should finish");

    let steps: Vec<(usize, IsolationLevel)> = summaries
        .iter()
        .map(|summary| (summary.actor_count, summary.isolation))
        .collect();
    assert_eq!(
        steps,
        vec![
            (2, IsolationLevel::Weak),
            (2, IsolationLevel::Strict),
            (3, IsolationLevel::Weak),
            (3, IsolationLevel::Strict),
        ]
    );
    for summary in &summaries {
        assert_eq!(summary.initial_available, 3);
        assert_eq!(summary.successes, summary.actor_count);
    }
    assert_eq!(store.available_count(), 3, "sweep leaves the store reset");

    let written: Vec<RunSummary> =
        serde_json::from_slice(&fs::read(&results_path).expect("results file should exist"))
            .expect("results should be a summary array");
    assert_eq!(written, summaries);

    let _ = fs::remove_dir_all(&work_dir);
}

#[tokio::test(start_paused = true)]
async fn given_cancelled_token_when_sweep_starts_then_no_run_is_executed() {
    let store = MemoryStore::seeded(3, 3);
    let harness = harness_over(&store);
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let summaries = run_sweep(&harness, &quick_sweep(), shutdown)
        .await
        .expect("cancelled sweep is not an error");

    assert!(summaries.is_empty());
    assert!(store.claim_rows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn given_cancellation_during_warmup_when_sweeping_then_sweep_stops_before_simulating() {
    let store = MemoryStore::seeded(3, 3);
    let harness = harness_over(&store);
    let config = SweepConfig {
        warmup_ms: 60_000,
        ..quick_sweep()
    };
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let summaries = run_sweep(&harness, &config, shutdown)
        .await
        .expect("cancelled sweep is not an error");

    assert!(summaries.is_empty());
    assert_eq!(store.available_count(), 3);
}
