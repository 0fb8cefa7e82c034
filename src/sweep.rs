use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    harness::{Harness, RunSummary},
    types::IsolationLevel,
};

fn default_isolation_levels() -> Vec<IsolationLevel> {
    IsolationLevel::ALL.to_vec()
}

fn default_actor_counts() -> Vec<usize> {
    vec![5, 10, 20, 30]
}

fn default_warmup_ms() -> u64 {
    2_000
}

fn default_cooldown_ms() -> u64 {
    20_000
}

fn default_strict_cooldown_ms() -> u64 {
    40_000
}

fn default_large_run_threshold() -> usize {
    20
}

fn default_post_reset_pause_ms() -> u64 {
    5_000
}

/// Outer loop over actor counts and isolation levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_isolation_levels")]
    pub isolation_levels: Vec<IsolationLevel>,
    #[serde(default = "default_actor_counts")]
    pub actor_counts: Vec<usize>,
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_strict_cooldown_ms")]
    pub strict_cooldown_ms: u64,
    /// Runs with more actors than this get a doubled cool-down.
    #[serde(default = "default_large_run_threshold")]
    pub large_run_threshold: usize,
    #[serde(default = "default_post_reset_pause_ms")]
    pub post_reset_pause_ms: u64,
    #[serde(default)]
    pub results_path: Option<PathBuf>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            isolation_levels: default_isolation_levels(),
            actor_counts: default_actor_counts(),
            warmup_ms: default_warmup_ms(),
            cooldown_ms: default_cooldown_ms(),
            strict_cooldown_ms: default_strict_cooldown_ms(),
            large_run_threshold: default_large_run_threshold(),
            post_reset_pause_ms: default_post_reset_pause_ms(),
            results_path: None,
        }
    }
}

impl SweepConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn post_reset_pause(&self) -> Duration {
        Duration::from_millis(self.post_reset_pause_ms)
    }

    pub fn cooldown_for(&self, isolation: IsolationLevel, actor_count: usize) -> Duration {
        let base = if isolation.is_strict() {
            self.strict_cooldown_ms
        } else {
            self.cooldown_ms
        };
        let millis = if actor_count > self.large_run_threshold {
            base.saturating_mul(2)
        } else {
            base
        };
        Duration::from_millis(millis)
    }

    /// Narrows the sweep to the given isolation level and actor counts.
    pub fn with_overrides(
        mut self,
        isolation: Option<IsolationLevel>,
        actor_counts: Option<Vec<usize>>,
    ) -> Self {
        if let Some(isolation) = isolation {
            self.isolation_levels = vec![isolation];
        }
        if let Some(actor_counts) = actor_counts {
            self.actor_counts = actor_counts;
        }
        self
    }

    pub fn step_count(&self) -> usize {
        self.isolation_levels.len() * self.actor_counts.len()
    }
}

/// Runs every `actor_count x isolation` combination in order: reset, warm-up,
/// simulate, cool-down, reset, post-reset pause.
///
/// A failed reset skips its combination. Cancellation is honoured between
/// steps and during pauses; a run that already started is allowed to finish.
/// Summaries collected so far are returned (and written to `results_path`)
/// either way.
pub async fn run_sweep(
    harness: &Harness,
    config: &SweepConfig,
    shutdown: CancellationToken,
) -> Result<Vec<RunSummary>> {
    let mut summaries = Vec::with_capacity(config.step_count());

    tracing::info!(
        target: "sweep",
        steps = config.step_count(),
        isolation_levels = ?config.isolation_levels,
        actor_counts = ?config.actor_counts,
        "sweep_started"
    );

    'sweep: for &actor_count in &config.actor_counts {
        for &isolation in &config.isolation_levels {
            if shutdown.is_cancelled() {
                break 'sweep;
            }

            tracing::info!(
                target: "sweep",
                isolation = %isolation,
                actors = actor_count,
                "sweep_step_started"
            );

            if let Err(err) = harness.reset_state().await {
                tracing::warn!(
                    target: "sweep",
                    isolation = %isolation,
                    actors = actor_count,
                    error = %err,
                    "sweep_step_skipped_after_reset_failure"
                );
                continue;
            }
            if !pause(config.warmup(), &shutdown).await {
                break 'sweep;
            }

            match harness.simulate(actor_count, isolation).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => tracing::warn!(
                    target: "sweep",
                    isolation = %isolation,
                    actors = actor_count,
                    error = %err,
                    "sweep_run_failed"
                ),
            }

            if !pause(config.cooldown_for(isolation, actor_count), &shutdown).await {
                break 'sweep;
            }
            if let Err(err) = harness.reset_state().await {
                tracing::warn!(
                    target: "sweep",
                    isolation = %isolation,
                    actors = actor_count,
                    error = %err,
                    "sweep_post_run_reset_failed"
                );
            }
            if !pause(config.post_reset_pause(), &shutdown).await {
                break 'sweep;
            }
        }
    }

    if shutdown.is_cancelled() {
        tracing::warn!(target: "sweep", completed = summaries.len(), "sweep_cancelled");
    } else {
        tracing::info!(target: "sweep", completed = summaries.len(), "sweep_finished");
    }

    if let Some(path) = &config.results_path {
        write_results(path, &summaries)?;
    }

    Ok(summaries)
}

pub fn write_results(path: &Path, summaries: &[RunSummary]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create results directory {}", parent.display()))?;
    }
    let payload =
        serde_json::to_vec_pretty(summaries).context("failed to serialize run summaries")?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write results to {}", path.display()))?;

    tracing::info!(
        target: "sweep",
        path = %path.display(),
        runs = summaries.len(),
        "sweep_results_written"
    );
    Ok(())
}

/// Returns `false` if the sweep was cancelled before the pause elapsed.
async fn pause(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = sleep(duration) => true,
    }
}
