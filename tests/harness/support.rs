use std::{collections::HashSet, sync::Arc};

use claimbench::{
    harness::{Harness, HarnessConfig, RunSummary},
    store::MemoryStore,
};

pub fn seeded_config() -> HarnessConfig {
    HarnessConfig {
        seed: Some(42),
        ..HarnessConfig::default()
    }
}

pub fn harness_over(store: &MemoryStore) -> Harness {
    Harness::new(Arc::new(store.clone()), seeded_config())
}

/// Conservation and uniqueness checks that must hold after any run.
pub fn assert_run_invariants(store: &MemoryStore, summary: &RunSummary, inventory: usize) {
    assert!(summary.is_conserved(), "summary not conserved: {summary:?}");
    assert_eq!(summary.final_available, store.available_count());
    assert_eq!(summary.final_available + summary.successes, inventory);
    assert!(summary.successes <= summary.actor_count);

    let claims = store.claim_rows();
    assert_eq!(claims.len(), summary.successes, "one claim row per success");

    let mut actors = HashSet::new();
    let mut resources = HashSet::new();
    for claim in &claims {
        assert!(actors.insert(claim.actor_id), "actor {} claimed twice", claim.actor_id);
        assert!(
            resources.insert(claim.resource_id),
            "resource {} bound twice",
            claim.resource_id
        );
        assert_eq!(summary.assignments.get(&claim.actor_id), Some(&claim.resource_id));
    }
}
