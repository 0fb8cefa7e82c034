use std::sync::Arc;

use tokio::time::{sleep, timeout};

use crate::{
    harness::{
        backoff::Backoff,
        error::ClaimError,
        types::{ClaimOutcome, ClaimRetryConfig},
    },
    store::{ClaimTransaction, ReservationStore, StoreError, StoreErrorKind},
    types::{ActorId, IsolationLevel, ResourceId},
};

const VERBOSE_RETRY_AFTER: u32 = 10;

/// One atomic attempt to bind an actor to a resource, retried locally on
/// conflict-abort.
pub struct ClaimProtocol {
    store: Arc<dyn ReservationStore>,
    config: ClaimRetryConfig,
    backoff: Backoff,
}

impl ClaimProtocol {
    pub fn new(store: Arc<dyn ReservationStore>, config: ClaimRetryConfig) -> Self {
        let backoff = Backoff::new(config.backoff_unit_ms, config.jitter_ms);
        Self {
            store,
            config,
            backoff,
        }
    }

    /// `AlreadyServed` and `Unavailable` are ordinary outcomes, not errors.
    /// Conflict-aborts and timed-out cycles spend one attempt each; any other
    /// store failure is returned immediately.
    #[tracing::instrument(name = "attempt_claim", target = "claim", skip(self))]
    pub async fn attempt_claim(
        &self,
        actor_id: ActorId,
        resource_id: ResourceId,
        isolation: IsolationLevel,
    ) -> Result<ClaimOutcome, ClaimError> {
        let max_attempts = self.config.max_attempts_for(isolation);
        let attempt_timeout = self.config.attempt_timeout();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt, &mut rand::rng());
                sleep(delay).await;
            }

            let cycle = self.run_cycle(actor_id, resource_id, isolation);
            match timeout(attempt_timeout, cycle).await {
                Ok(Ok(outcome)) => {
                    tracing::trace!(
                        target: "claim",
                        actor_id = actor_id,
                        resource_id = resource_id,
                        attempt = attempt,
                        outcome = ?outcome,
                        "claim_cycle_finished"
                    );
                    return Ok(outcome);
                }
                Ok(Err(err)) if spends_attempt(&err) => {
                    if attempt > VERBOSE_RETRY_AFTER {
                        tracing::info!(
                            target: "claim",
                            actor_id = actor_id,
                            resource_id = resource_id,
                            attempt = attempt,
                            error = %err,
                            "claim_conflict_retry"
                        );
                    } else {
                        tracing::trace!(
                            target: "claim",
                            actor_id = actor_id,
                            resource_id = resource_id,
                            attempt = attempt,
                            error = %err,
                            "claim_conflict_retry"
                        );
                    }
                }
                Ok(Err(source)) => {
                    return Err(ClaimError::Store {
                        actor_id,
                        resource_id,
                        source,
                    });
                }
                Err(_) => {
                    tracing::debug!(
                        target: "claim",
                        actor_id = actor_id,
                        resource_id = resource_id,
                        attempt = attempt,
                        timeout_ms = attempt_timeout.as_millis() as u64,
                        "claim_cycle_timed_out"
                    );
                }
            }
        }

        Err(ClaimError::RetriesExhausted {
            actor_id,
            resource_id,
            attempts: max_attempts,
        })
    }

    async fn run_cycle(
        &self,
        actor_id: ActorId,
        resource_id: ResourceId,
        isolation: IsolationLevel,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut tx = self.store.begin(isolation).await?;
        match stage_claim(tx.as_mut(), actor_id, resource_id).await {
            Ok(ClaimOutcome::Bound) => {
                tx.commit().await?;
                Ok(ClaimOutcome::Bound)
            }
            Ok(outcome) => {
                rollback_quietly(tx).await;
                Ok(outcome)
            }
            Err(err) => {
                rollback_quietly(tx).await;
                Err(err)
            }
        }
    }
}

/// A failed rollback is logged and otherwise ignored; the outcome of the
/// cycle is already decided.
async fn rollback_quietly(tx: Box<dyn ClaimTransaction>) {
    if let Err(err) = tx.rollback().await {
        tracing::debug!(target: "claim", error = %err, "claim_rollback_failed");
    }
}

async fn stage_claim(
    tx: &mut dyn ClaimTransaction,
    actor_id: ActorId,
    resource_id: ResourceId,
) -> Result<ClaimOutcome, StoreError> {
    if tx.has_active_claim(actor_id).await? {
        return Ok(ClaimOutcome::AlreadyServed);
    }
    if !tx.lock_resource_if_available(resource_id).await? {
        return Ok(ClaimOutcome::Unavailable);
    }
    tx.bind_resource_and_insert_claim(actor_id, resource_id)
        .await?;
    Ok(ClaimOutcome::Bound)
}

fn spends_attempt(err: &StoreError) -> bool {
    err.is_conflict_abort() || matches!(err.kind, StoreErrorKind::Timeout)
}
