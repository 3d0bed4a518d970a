use anyhow::Result;
use attendance_ledger::config;
use attendance_ledger::db::{self, SqliteStore};
use attendance_ledger::edit::EntryEdit;
use attendance_ledger::model::DaySlots;
use attendance_ledger::reconcile::DayReconciler;
use attendance_ledger::sources::Sources;
use chrono::NaiveTime;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Correct the punches of one ledger row and reclassify it.
#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Ledger row id
    #[arg(long)]
    id: i64,

    #[arg(long, value_parser = parse_slot)]
    entry1: Option<NaiveTime>,
    #[arg(long, value_parser = parse_slot)]
    exit1: Option<NaiveTime>,
    #[arg(long, value_parser = parse_slot)]
    entry2: Option<NaiveTime>,
    #[arg(long, value_parser = parse_slot)]
    exit2: Option<NaiveTime>,

    /// Keep the row open to later batch runs instead of locking it
    #[arg(long)]
    unlocked: bool,

    /// Actor recorded on the row
    #[arg(long, default_value = "manual")]
    by: String,
}

fn parse_slot(s: &str) -> Result<NaiveTime, String> {
    db::model::parse_time(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let sources = Sources::from_store(Arc::new(SqliteStore::new(pool)));
    let reconciler = DayReconciler::from_config(sources, &cfg);
    let edit = EntryEdit {
        slots: DaySlots {
            entry1: args.entry1,
            exit1: args.exit1,
            entry2: args.entry2,
            exit2: args.exit2,
        },
        updatable: args.unlocked,
        edited_by: args.by,
    };
    let entry = reconciler.edit_entry(args.id, edit).await?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}
