pub mod admission;
pub mod aggregator;
pub mod backoff;
pub mod claim;
pub mod coordinator;
pub mod distributor;
pub mod error;
pub mod types;

use std::sync::Arc;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tokio::time::Instant;

pub use aggregator::{RunAggregator, RunSummary};
pub use claim::ClaimProtocol;
pub use error::{ClaimError, HarnessError};
pub use types::{ActorReport, ClaimOutcome, ClaimPhase, HarnessConfig};

use crate::{
    harness::{
        admission::AdmissionGate, aggregator::log_summary, coordinator::WorkerPool,
        distributor::PreferencePlan, error::store_failure,
    },
    store::ReservationStore,
    types::{IsolationLevel, ResourceId},
};

/// Entry point of one simulated run. Owns nothing but the store handle and
/// tuning; each `simulate` call builds its own assignment book, gate and
/// worker pool.
pub struct Harness {
    store: Arc<dyn ReservationStore>,
    config: HarnessConfig,
}

impl Harness {
    pub fn new(store: Arc<dyn ReservationStore>, config: HarnessConfig) -> Self {
        Self { store, config }
    }

    /// Confirms the store answers and reports how many resources it holds.
    pub async fn check_store(&self) -> Result<usize, HarnessError> {
        self.store
            .ping()
            .await
            .map_err(store_failure("store connectivity check failed"))?;
        let total = self
            .store
            .count_resources()
            .await
            .map_err(store_failure("failed to count resources"))?;

        tracing::info!(target: "harness", total_resources = total, "store_checked");
        Ok(total)
    }

    #[tracing::instrument(name = "simulate", target = "harness", skip(self))]
    pub async fn simulate(
        &self,
        actor_count: usize,
        isolation: IsolationLevel,
    ) -> Result<RunSummary, HarnessError> {
        if actor_count == 0 {
            return Err(HarnessError::InvalidActorCount);
        }

        let mut rng = self.rng();
        let mut actors = self
            .store
            .eligible_actors()
            .await
            .map_err(store_failure("failed to load eligible actors"))?;
        if actors.is_empty() {
            return Err(HarnessError::NoEligibleActors);
        }

        let actor_count = if actor_count > actors.len() {
            tracing::warn!(
                target: "harness",
                requested = actor_count,
                eligible = actors.len(),
                "actor_count_clamped"
            );
            actors.len()
        } else {
            actor_count
        };
        actors.shuffle(&mut rng);
        actors.truncate(actor_count);

        let started_at = Instant::now();
        tracing::info!(
            target: "harness",
            isolation = %isolation,
            actors = actor_count,
            "run_started"
        );

        let initial = self
            .store
            .list_available_resources()
            .await
            .map_err(store_failure("failed to list available resources"))?;
        if initial.is_empty() {
            tracing::info!(target: "harness", isolation = %isolation, "no resources available");
            return Ok(RunSummary::empty(
                isolation,
                actor_count,
                started_at.elapsed(),
            ));
        }

        let resource_ids: Vec<ResourceId> = initial.iter().map(|resource| resource.id).collect();
        let plan = PreferencePlan::distribute(&actors, &resource_ids, &mut rng);
        let gate = AdmissionGate::for_run(&self.config.admission, isolation, actor_count);
        let claims = Arc::new(ClaimProtocol::new(
            Arc::clone(&self.store),
            self.config.claim.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&self.store),
            claims,
            &self.config,
            isolation,
            actor_count,
        ));

        let aggregator = RunAggregator::new(isolation, actor_count, initial.len(), started_at);
        let reports = Arc::clone(&pool).launch(&plan, &actors, gate);
        let reports = aggregator.collect(reports).await;

        let final_available = self
            .store
            .list_available_resources()
            .await
            .map_err(store_failure("failed to list available resources after run"))?
            .len();

        let summary = aggregator.summarize(&reports, final_available);
        if pool.assignments().len().await != summary.successes {
            tracing::error!(
                target: "harness",
                recorded = pool.assignments().len().await,
                reported = summary.successes,
                "assignment_count_mismatch"
            );
        }
        log_summary(&summary);
        Ok(summary)
    }

    /// Makes every resource available again and purges test-lab claims.
    /// Safe to call repeatedly.
    pub async fn reset_state(&self) -> Result<(), HarnessError> {
        self.store
            .reset_all_resources_and_purge_test_claims()
            .await
            .map_err(store_failure("failed to reset store state"))?;
        tracing::info!(target: "harness", "store_reset");
        Ok(())
    }

    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}
