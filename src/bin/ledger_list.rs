use anyhow::{anyhow, Result};
use attendance_ledger::config;
use attendance_ledger::db::{self, SqliteStore};
use attendance_ledger::model::IncidenceCode;
use attendance_ledger::sources::{LedgerFilter, LedgerStore};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// Print ledger rows, newest first.
#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(long)]
    worker: Option<i64>,

    #[arg(long)]
    from: Option<NaiveDate>,

    #[arg(long)]
    to: Option<NaiveDate>,

    /// Incidence code (A, F, R-, R+, O, ST, J, L)
    #[arg(long)]
    code: Option<String>,

    /// Emit JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let code = args
        .code
        .as_deref()
        .map(|c| IncidenceCode::parse_code(c).ok_or_else(|| anyhow!("unknown code {c:?}")))
        .transpose()?;

    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let store = SqliteStore::new(pool);

    let filter = LedgerFilter {
        worker_id: args.worker,
        date_from: args.from,
        date_to: args.to,
        code,
    };
    let entries = store.list(&filter).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let fmt_slot = |t: Option<chrono::NaiveTime>| {
        t.map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".into())
    };
    for e in &entries {
        let [s1, s2, s3, s4] = e.slots.as_array().map(fmt_slot);
        println!(
            "{:>6} {} {:>6} {:<24} {:<3} {} {} {} {} {:>5} {:>3} {}{}",
            e.id.unwrap_or_default(),
            e.date,
            e.worker_id,
            e.worker_name,
            e.code.as_str(),
            s1,
            s2,
            s3,
            s4,
            e.hours_worked,
            e.minutes_late,
            e.description,
            if e.updatable { "" } else { " [locked]" },
        );
    }
    println!("{} row(s)", entries.len());
    Ok(())
}
