use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use rand::seq::SliceRandom;
use tokio::{
    sync::{Mutex, mpsc},
    time::sleep,
};

use crate::{
    harness::{
        admission::AdmissionGate,
        backoff::{Backoff, jitter},
        claim::ClaimProtocol,
        distributor::PreferencePlan,
        error::ClaimError,
        types::{ActorReport, ClaimOutcome, ClaimPhase, EscalationConfig, HarnessConfig, ScanConfig},
    },
    store::ReservationStore,
    types::{ActorId, IsolationLevel, ResourceId},
};

/// Successful claims of the current run. Every read and write goes through
/// the same lock, including the completion-rate read behind escalation.
#[derive(Debug, Clone, Default)]
pub struct AssignmentBook {
    inner: Arc<Mutex<HashMap<ActorId, ResourceId>>>,
}

impl AssignmentBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, actor_id: ActorId, resource_id: ResourceId) {
        let mut guard = self.inner.lock().await;
        if let Some((holder, _)) = guard
            .iter()
            .find(|(holder, held)| **held == resource_id && **holder != actor_id)
        {
            tracing::error!(
                target: "coordinator",
                actor_id = actor_id,
                resource_id = resource_id,
                holder = *holder,
                "resource_assigned_twice"
            );
        }
        guard.insert(actor_id, resource_id);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn completion_rate(&self, actor_count: usize) -> f64 {
        if actor_count == 0 {
            return 0.0;
        }
        self.len().await as f64 / actor_count as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActorPhase {
    TryPreferred,
    RetryScan { round: u32 },
    AggressiveEscalation { resume_round: u32 },
    Done,
}

/// Runs one task per actor through
/// `TryPreferred -> RetryScan -> AggressiveEscalation -> Done`.
pub struct WorkerPool {
    store: Arc<dyn ReservationStore>,
    claims: Arc<ClaimProtocol>,
    scan: ScanConfig,
    escalation: EscalationConfig,
    scan_backoff: Backoff,
    isolation: IsolationLevel,
    actor_count: usize,
    assignments: AssignmentBook,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        claims: Arc<ClaimProtocol>,
        config: &HarnessConfig,
        isolation: IsolationLevel,
        actor_count: usize,
    ) -> Self {
        Self {
            store,
            claims,
            scan: config.scan.clone(),
            escalation: config.escalation.clone(),
            scan_backoff: Backoff::new(config.scan.backoff_unit_ms, config.scan.jitter_ms),
            isolation,
            actor_count,
            assignments: AssignmentBook::new(),
        }
    }

    pub fn assignments(&self) -> &AssignmentBook {
        &self.assignments
    }

    /// Spawns every actor task at once; the gate decides when each may start
    /// claiming. The receiver yields one report per actor and closes after the
    /// last task exits.
    pub fn launch(
        self: Arc<Self>,
        plan: &PreferencePlan,
        actors: &[ActorId],
        gate: AdmissionGate,
    ) -> mpsc::Receiver<ActorReport> {
        let (report_tx, report_rx) = mpsc::channel(actors.len().max(1));

        tracing::debug!(
            target: "coordinator",
            actors = actors.len(),
            admission_capacity = gate.capacity(),
            preferred_per_actor = plan.per_actor(),
            isolation = %self.isolation,
            "worker_pool_launch"
        );

        for &actor_id in actors {
            let pool = Arc::clone(&self);
            let gate = gate.clone();
            let report_tx = report_tx.clone();
            let preferred = plan.preferred_for(actor_id).to_vec();
            tokio::spawn(async move {
                let report = match gate.admit().await {
                    Ok(permit) => {
                        let report = pool.run_actor(actor_id, preferred).await;
                        drop(permit);
                        report
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "coordinator",
                            actor_id = actor_id,
                            error = %err,
                            "actor_not_admitted"
                        );
                        ActorReport {
                            actor_id,
                            resource_id: None,
                            phase: None,
                            scan_rounds: 0,
                            claim_errors: 0,
                        }
                    }
                };
                if let Err(err) = report_tx.send(report).await {
                    tracing::debug!(
                        target: "coordinator",
                        actor_id = err.0.actor_id,
                        "actor_report_dropped"
                    );
                }
            });
        }

        report_rx
    }

    async fn run_actor(&self, actor_id: ActorId, preferred: Vec<ResourceId>) -> ActorReport {
        let mut report = ActorReport {
            actor_id,
            resource_id: None,
            phase: None,
            scan_rounds: 0,
            claim_errors: 0,
        };

        let mut phase = ActorPhase::TryPreferred;
        loop {
            phase = match phase {
                ActorPhase::TryPreferred => self.try_preferred(&preferred, &mut report).await,
                ActorPhase::RetryScan { round } => self.retry_scan(round, &mut report).await,
                ActorPhase::AggressiveEscalation { resume_round } => {
                    self.escalate(resume_round, &mut report).await
                }
                ActorPhase::Done => break,
            };
        }

        if !report.served() {
            tracing::info!(
                target: "coordinator",
                actor_id = actor_id,
                scan_rounds = report.scan_rounds,
                claim_errors = report.claim_errors,
                "actor_unserved"
            );
        }
        report
    }

    async fn try_preferred(&self, preferred: &[ResourceId], report: &mut ActorReport) -> ActorPhase {
        let start_jitter = Duration::from_millis(self.scan.preferred_jitter_ms);
        for &resource_id in preferred {
            let pause = jitter(start_jitter, &mut rand::rng());
            sleep(pause).await;

            if self
                .claim_and_record(resource_id, ClaimPhase::Preferred, report)
                .await
            {
                return ActorPhase::Done;
            }
        }
        ActorPhase::RetryScan { round: 0 }
    }

    async fn retry_scan(&self, round: u32, report: &mut ActorReport) -> ActorPhase {
        if round >= self.scan.max_rounds_for(self.isolation) {
            return ActorPhase::Done;
        }
        report.scan_rounds = round + 1;

        if round > 0 {
            let delay = self.scan_backoff.delay(round, &mut rand::rng());
            sleep(delay).await;
        }

        let mut candidates = self.available_ids(report.actor_id).await;
        if candidates.is_empty() {
            return ActorPhase::RetryScan { round: round + 1 };
        }
        candidates.shuffle(&mut rand::rng());

        for resource_id in candidates {
            if self
                .claim_and_record(resource_id, ClaimPhase::Scan, report)
                .await
            {
                return ActorPhase::Done;
            }
        }

        let completion_rate = self.assignments.completion_rate(self.actor_count).await;
        if self.escalation.should_escalate(completion_rate, round) {
            tracing::info!(
                target: "coordinator",
                actor_id = report.actor_id,
                round = round,
                completion_pct = completion_rate * 100.0,
                "escalating_claim_attempts"
            );
            return ActorPhase::AggressiveEscalation {
                resume_round: round + 1,
            };
        }

        ActorPhase::RetryScan { round: round + 1 }
    }

    async fn escalate(&self, resume_round: u32, report: &mut ActorReport) -> ActorPhase {
        let idle_delay = Duration::from_millis(self.escalation.idle_delay_ms);
        for _ in 0..self.escalation.sub_rounds {
            let candidates = self.available_ids(report.actor_id).await;
            if candidates.is_empty() {
                sleep(idle_delay).await;
                continue;
            }

            for resource_id in candidates {
                if self
                    .claim_and_record(resource_id, ClaimPhase::Escalation, report)
                    .await
                {
                    return ActorPhase::Done;
                }
            }
            sleep(idle_delay).await;
        }
        ActorPhase::RetryScan {
            round: resume_round,
        }
    }

    async fn available_ids(&self, actor_id: ActorId) -> Vec<ResourceId> {
        match self.store.list_available_resources().await {
            Ok(resources) => resources.into_iter().map(|resource| resource.id).collect(),
            Err(err) => {
                tracing::debug!(
                    target: "coordinator",
                    actor_id = actor_id,
                    error = %err,
                    "available_resources_query_failed"
                );
                Vec::new()
            }
        }
    }

    async fn claim_and_record(
        &self,
        resource_id: ResourceId,
        phase: ClaimPhase,
        report: &mut ActorReport,
    ) -> bool {
        let actor_id = report.actor_id;
        match self
            .claims
            .attempt_claim(actor_id, resource_id, self.isolation)
            .await
        {
            Ok(ClaimOutcome::Bound) => {
                self.assignments.record(actor_id, resource_id).await;
                report.resource_id = Some(resource_id);
                report.phase = Some(phase);
                tracing::debug!(
                    target: "coordinator",
                    actor_id = actor_id,
                    resource_id = resource_id,
                    phase = ?phase,
                    scan_rounds = report.scan_rounds,
                    "actor_claimed"
                );
                true
            }
            Ok(outcome) => {
                tracing::trace!(
                    target: "coordinator",
                    actor_id = actor_id,
                    resource_id = resource_id,
                    outcome = ?outcome,
                    "claim_not_bound"
                );
                false
            }
            Err(err) => {
                report.claim_errors += 1;
                match &err {
                    ClaimError::RetriesExhausted { .. } => tracing::info!(
                        target: "coordinator",
                        actor_id = actor_id,
                        resource_id = resource_id,
                        error = %err,
                        "claim_retries_exhausted"
                    ),
                    ClaimError::Store { .. } => tracing::warn!(
                        target: "coordinator",
                        actor_id = actor_id,
                        resource_id = resource_id,
                        error = %err,
                        "claim_failed"
                    ),
                }
                false
            }
        }
    }
}
