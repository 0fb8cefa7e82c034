use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ActorId, IsolationLevel, ResourceId};

/// Result of one claim call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Bound,
    /// The actor already holds an active claim.
    AlreadyServed,
    /// Resource taken, or its row is locked by a concurrent transaction.
    Unavailable,
}

impl ClaimOutcome {
    pub fn is_bound(self) -> bool {
        matches!(self, ClaimOutcome::Bound)
    }
}

/// Where in the actor state machine a claim succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPhase {
    Preferred,
    Scan,
    Escalation,
}

/// Terminal message every actor task sends to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorReport {
    pub actor_id: ActorId,
    pub resource_id: Option<ResourceId>,
    pub phase: Option<ClaimPhase>,
    pub scan_rounds: u32,
    pub claim_errors: u32,
}

impl ActorReport {
    pub fn served(&self) -> bool {
        self.resource_id.is_some()
    }
}

fn default_claim_max_attempts() -> u32 {
    10
}

fn default_claim_strict_max_attempts() -> u32 {
    20
}

fn default_claim_backoff_unit_ms() -> u64 {
    20
}

fn default_claim_jitter_ms() -> u64 {
    100
}

fn default_attempt_timeout_ms() -> u64 {
    10_000
}

/// Retry ceiling and backoff of a single claim call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRetryConfig {
    #[serde(default = "default_claim_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_claim_strict_max_attempts")]
    pub strict_max_attempts: u32,
    #[serde(default = "default_claim_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    #[serde(default = "default_claim_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

impl Default for ClaimRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_claim_max_attempts(),
            strict_max_attempts: default_claim_strict_max_attempts(),
            backoff_unit_ms: default_claim_backoff_unit_ms(),
            jitter_ms: default_claim_jitter_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl ClaimRetryConfig {
    pub fn max_attempts_for(&self, isolation: IsolationLevel) -> u32 {
        let attempts = if isolation.is_strict() {
            self.strict_max_attempts
        } else {
            self.max_attempts
        };
        attempts.max(1)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms.max(1))
    }
}

fn default_preferred_jitter_ms() -> u64 {
    300
}

fn default_scan_max_rounds() -> u32 {
    30
}

fn default_scan_strict_max_rounds() -> u32 {
    50
}

fn default_scan_backoff_unit_ms() -> u64 {
    10
}

fn default_scan_jitter_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_preferred_jitter_ms")]
    pub preferred_jitter_ms: u64,
    #[serde(default = "default_scan_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_scan_strict_max_rounds")]
    pub strict_max_rounds: u32,
    #[serde(default = "default_scan_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    #[serde(default = "default_scan_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            preferred_jitter_ms: default_preferred_jitter_ms(),
            max_rounds: default_scan_max_rounds(),
            strict_max_rounds: default_scan_strict_max_rounds(),
            backoff_unit_ms: default_scan_backoff_unit_ms(),
            jitter_ms: default_scan_jitter_ms(),
        }
    }
}

impl ScanConfig {
    pub fn max_rounds_for(&self, isolation: IsolationLevel) -> u32 {
        if isolation.is_strict() {
            self.strict_max_rounds
        } else {
            self.max_rounds
        }
    }
}

fn default_completion_threshold() -> f64 {
    0.8
}

fn default_escalation_min_round() -> u32 {
    10
}

fn default_escalation_sub_rounds() -> u32 {
    20
}

fn default_escalation_idle_delay_ms() -> u64 {
    50
}

/// Late-run tight polling, entered once most actors are served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: f64,
    #[serde(default = "default_escalation_min_round")]
    pub min_round: u32,
    #[serde(default = "default_escalation_sub_rounds")]
    pub sub_rounds: u32,
    #[serde(default = "default_escalation_idle_delay_ms")]
    pub idle_delay_ms: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            completion_threshold: default_completion_threshold(),
            min_round: default_escalation_min_round(),
            sub_rounds: default_escalation_sub_rounds(),
            idle_delay_ms: default_escalation_idle_delay_ms(),
        }
    }
}

impl EscalationConfig {
    /// Both conditions are strict: the rate must exceed the threshold and the
    /// round index must exceed `min_round`.
    pub fn should_escalate(&self, completion_rate: f64, round: u32) -> bool {
        completion_rate > self.completion_threshold && round > self.min_round
    }
}

fn default_admission_capacity() -> usize {
    10
}

fn default_admission_large_run_capacity() -> usize {
    15
}

fn default_admission_strict_capacity() -> usize {
    5
}

fn default_admission_strict_large_run_capacity() -> usize {
    3
}

fn default_large_run_threshold() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_admission_capacity")]
    pub capacity: usize,
    #[serde(default = "default_admission_large_run_capacity")]
    pub large_run_capacity: usize,
    #[serde(default = "default_admission_strict_capacity")]
    pub strict_capacity: usize,
    #[serde(default = "default_admission_strict_large_run_capacity")]
    pub strict_large_run_capacity: usize,
    /// Runs with more actors than this use the large-run capacities.
    #[serde(default = "default_large_run_threshold")]
    pub large_run_threshold: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: default_admission_capacity(),
            large_run_capacity: default_admission_large_run_capacity(),
            strict_capacity: default_admission_strict_capacity(),
            strict_large_run_capacity: default_admission_strict_large_run_capacity(),
            large_run_threshold: default_large_run_threshold(),
        }
    }
}

impl AdmissionConfig {
    pub fn capacity_for(&self, isolation: IsolationLevel, actor_count: usize) -> usize {
        let large_run = actor_count > self.large_run_threshold;
        let capacity = match (isolation.is_strict(), large_run) {
            (true, true) => self.strict_large_run_capacity,
            (true, false) => self.strict_capacity,
            (false, true) => self.large_run_capacity,
            (false, false) => self.capacity,
        };
        capacity.max(1)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub claim: ClaimRetryConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Fixes actor selection and preferred-resource distribution.
    #[serde(default)]
    pub seed: Option<u64>,
}
