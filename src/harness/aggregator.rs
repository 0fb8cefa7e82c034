use std::{collections::BTreeMap, time::Duration};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, time::Instant};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    harness::types::{ActorReport, ClaimPhase},
    types::{ActorId, IsolationLevel, ResourceId},
};

/// Outcome of one simulated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub isolation: IsolationLevel,
    pub actor_count: usize,
    pub elapsed_ms: u64,
    pub successes: usize,
    pub unserved: usize,
    pub initial_available: usize,
    pub final_available: usize,
    /// Resources that left the available pool during the run.
    pub reserved: usize,
    pub success_rate_pct: f64,
    pub served_preferred: usize,
    pub served_scan: usize,
    pub served_escalation: usize,
    pub claim_errors: u64,
    pub assignments: BTreeMap<ActorId, ResourceId>,
}

impl RunSummary {
    /// Summary of a run that found nothing to claim; no actor task is started.
    pub fn empty(isolation: IsolationLevel, actor_count: usize, elapsed: Duration) -> Self {
        Self {
            isolation,
            actor_count,
            elapsed_ms: elapsed.as_millis() as u64,
            successes: 0,
            unserved: actor_count,
            initial_available: 0,
            final_available: 0,
            reserved: 0,
            success_rate_pct: 0.0,
            served_preferred: 0,
            served_scan: 0,
            served_escalation: 0,
            claim_errors: 0,
            assignments: BTreeMap::new(),
        }
    }

    pub fn all_served(&self) -> bool {
        self.unserved == 0
    }

    /// Every resource that left the pool is accounted for by exactly one
    /// successful actor.
    pub fn is_conserved(&self) -> bool {
        self.reserved == self.successes && self.assignments.len() == self.successes
    }
}

/// Collects actor reports and turns them into a [`RunSummary`].
#[derive(Debug, Clone, Copy)]
pub struct RunAggregator {
    isolation: IsolationLevel,
    actor_count: usize,
    initial_available: usize,
    started_at: Instant,
}

impl RunAggregator {
    pub fn new(
        isolation: IsolationLevel,
        actor_count: usize,
        initial_available: usize,
        started_at: Instant,
    ) -> Self {
        Self {
            isolation,
            actor_count,
            initial_available,
            started_at,
        }
    }

    /// Waits until every sender is gone, i.e. every actor task has exited.
    pub async fn collect(&self, reports: mpsc::Receiver<ActorReport>) -> Vec<ActorReport> {
        ReceiverStream::new(reports)
            .inspect(|report| {
                tracing::trace!(
                    target: "aggregator",
                    actor_id = report.actor_id,
                    resource_id = ?report.resource_id,
                    phase = ?report.phase,
                    "actor_report_received"
                );
            })
            .collect::<Vec<_>>()
            .await
    }

    /// Actors without a report (a task that panicked) count as unserved.
    pub fn summarize(&self, reports: &[ActorReport], final_available: usize) -> RunSummary {
        let mut assignments = BTreeMap::new();
        let mut served_preferred = 0;
        let mut served_scan = 0;
        let mut served_escalation = 0;
        let mut claim_errors = 0u64;

        for report in reports {
            claim_errors += u64::from(report.claim_errors);
            let Some(resource_id) = report.resource_id else {
                continue;
            };
            assignments.insert(report.actor_id, resource_id);
            match report.phase {
                Some(ClaimPhase::Preferred) => served_preferred += 1,
                Some(ClaimPhase::Scan) => served_scan += 1,
                Some(ClaimPhase::Escalation) => served_escalation += 1,
                None => {}
            }
        }

        let successes = assignments.len();
        let success_rate_pct = if self.actor_count == 0 {
            0.0
        } else {
            successes as f64 * 100.0 / self.actor_count as f64
        };

        RunSummary {
            isolation: self.isolation,
            actor_count: self.actor_count,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            successes,
            unserved: self.actor_count.saturating_sub(successes),
            initial_available: self.initial_available,
            final_available,
            reserved: self.initial_available.saturating_sub(final_available),
            success_rate_pct,
            served_preferred,
            served_scan,
            served_escalation,
            claim_errors,
            assignments,
        }
    }
}

pub fn log_summary(summary: &RunSummary) {
    tracing::info!(
        target: "aggregator",
        isolation = %summary.isolation,
        actors = summary.actor_count,
        elapsed_ms = summary.elapsed_ms,
        successes = summary.successes,
        unserved = summary.unserved,
        initial_available = summary.initial_available,
        final_available = summary.final_available,
        reserved = summary.reserved,
        success_rate_pct = summary.success_rate_pct,
        served_preferred = summary.served_preferred,
        served_scan = summary.served_scan,
        served_escalation = summary.served_escalation,
        claim_errors = summary.claim_errors,
        "run_summary"
    );

    if summary.unserved > 0 {
        tracing::warn!(
            target: "aggregator",
            isolation = %summary.isolation,
            unserved = summary.unserved,
            final_available = summary.final_available,
            "actors_left_unserved"
        );
    }
}
