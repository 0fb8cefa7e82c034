use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use claimbench::{
    cli::cli_options_from_args,
    config::{Config, StoreConfig},
    harness::{Harness, RunSummary},
    logging::init_tracing,
    store::{MemoryStore, ReservationStore},
    sweep::run_sweep,
};

#[tokio::main]
async fn main() -> Result<()> {
    let options = cli_options_from_args()?;
    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "failed to load config from {}",
            options.config_path.display()
        )
    })?;
    let logging_guard = init_tracing(&config.logging)?;

    let store = build_store(&config.store).await?;
    let harness = Harness::new(store, config.harness.clone());

    let total_resources = harness
        .check_store()
        .await
        .context("store is not reachable")?;
    if total_resources == 0 {
        return Err(anyhow!(
            "store holds no resources; seed the inventory before running"
        ));
    }

    let sweep = config
        .sweep
        .clone()
        .with_overrides(options.isolation, options.actor_counts.clone());

    let shutdown = CancellationToken::new();
    let signal_task = tokio::spawn(cancel_on_signal(shutdown.clone()));

    eprintln!(
        "claimbench: {} runs over {} resources ({})",
        sweep.step_count(),
        total_resources,
        started_at_label()
    );
    eprintln!(
        "run {} logging to {}",
        logging_guard.run_id(),
        logging_guard.log_dir().display()
    );
    let summaries = run_sweep(&harness, &sweep, shutdown.clone()).await?;
    signal_task.abort();

    print_summaries(&summaries);
    if shutdown.is_cancelled() {
        eprintln!("claimbench stopped early: {} runs completed", summaries.len());
    }
    Ok(())
}

async fn build_store(config: &StoreConfig) -> Result<Arc<dyn ReservationStore>> {
    match config {
        StoreConfig::Memory(memory) => {
            let store = MemoryStore::seeded(memory.actors, memory.resources)
                .with_op_latency(Duration::from_millis(memory.op_latency_ms));
            Ok(Arc::new(store))
        }
        #[cfg(feature = "postgres")]
        StoreConfig::Postgres(postgres) => {
            let store = claimbench::store::PgStore::connect(postgres)
                .await
                .context("failed to connect to postgres")?;
            if postgres.bootstrap {
                store
                    .bootstrap(postgres.seed_actors, postgres.seed_resources)
                    .await
                    .context("failed to bootstrap postgres schema")?;
            }
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreConfig::Postgres(_) => Err(anyhow!(
            "store.type=postgres requires building with `--features postgres`"
        )),
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) -> Result<()> {
    let mut sigint =
        signal(SignalKind::interrupt()).context("unable to listen for SIGINT (Ctrl+C)")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;

    let signal_name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    eprintln!("received {signal_name}; stopping after the current step");
    tracing::warn!(target: "sweep", signal = signal_name, "shutdown_requested");
    shutdown.cancel();
    Ok(())
}

fn started_at_label() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

fn print_summaries(summaries: &[RunSummary]) {
    println!(
        "{:<11} {:>6} {:>9} {:>8} {:>9} {:>9} {:>6} {:>6} {:>6}  verdict",
        "isolation", "actors", "served", "rate%", "reserved", "elapsed", "pref", "scan", "esc"
    );
    for summary in summaries {
        let verdict = if summary.all_served() {
            "all actors served".to_string()
        } else {
            format!("{} actors unserved", summary.unserved)
        };
        println!(
            "{:<11} {:>6} {:>9} {:>8.1} {:>9} {:>8}ms {:>6} {:>6} {:>6}  {}",
            summary.isolation.label(),
            summary.actor_count,
            summary.successes,
            summary.success_rate_pct,
            summary.reserved,
            summary.elapsed_ms,
            summary.served_preferred,
            summary.served_scan,
            summary.served_escalation,
            verdict
        );
    }
}
