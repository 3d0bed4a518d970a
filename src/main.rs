use anyhow::{bail, Result};
use attendance_ledger::batch::{BatchRunner, CancelSignal};
use attendance_ledger::config;
use attendance_ledger::db::{self, SqliteStore};
use attendance_ledger::reconcile::DayReconciler;
use attendance_ledger::sources::Sources;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Reconcile punches into the daily attendance ledger.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// First day to process (YYYY-MM-DD)
    #[arg(long)]
    from: NaiveDate,

    /// Last day to process, inclusive (defaults to --from)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Restrict the run to these workers (repeatable); all active workers otherwise
    #[arg(long = "worker")]
    workers: Vec<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let to = args.to.unwrap_or(args.from);
    if to < args.from {
        bail!("--to {} is before --from {}", to, args.from);
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let sources = Sources::from_store(Arc::new(SqliteStore::new(pool)));
    let runner = BatchRunner::from_config(DayReconciler::from_config(sources, &cfg), &cfg);

    let cancel = CancelSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current day");
            trigger.cancel();
        }
    });

    info!(from = %args.from, %to, workers = args.workers.len(), "starting reconciliation");
    let report = runner.run_report(&args.workers, args.from, to, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
