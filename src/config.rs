//! Configuration loader and validator for the attendance ledger engine.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root of the YAML document: process settings plus classification rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub rules: Rules,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Number of workers reconciled concurrently.
    pub concurrency: usize,
    /// Upper bound for every lookup or persistence call of a single day.
    pub lookup_timeout_ms: u64,
    /// Actor stamped onto ledger rows written by the batch.
    pub processed_by: String,
}

/// Tolerance numbers applied by the deduplicator and the classifier.
///
/// Minute thresholds are inclusive upper bounds: with the defaults an entry
/// 10 minutes late is on time and 11 minutes late is a minor late arrival.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Rules {
    /// Consecutive punches at most this far apart belong to one cluster.
    pub duplicate_window_secs: u32,
    /// A cluster whose first and last punch are at most this far apart is a
    /// single effective instant.
    pub collapse_window_secs: u32,
    pub early_arrival_allowance_min: i64,
    pub on_time_tolerance_min: i64,
    pub minor_late_max_min: i64,
    pub major_late_max_min: i64,
    /// Early-exit slack for non-exempt categories.
    pub early_exit_allowance_min: i64,
    pub late_exit_max_min: i64,
    /// Categories with zero early-exit tolerance (instructional staff).
    pub exempt_categories: Vec<String>,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            duplicate_window_secs: 60,
            collapse_window_secs: 0,
            early_arrival_allowance_min: 30,
            on_time_tolerance_min: 10,
            minor_late_max_min: 16,
            major_late_max_min: 30,
            early_exit_allowance_min: 5,
            late_exit_max_min: 30,
            exempt_categories: vec!["DOCENTE".into(), "PROFESOR".into(), "MAESTRO".into()],
        }
    }
}

impl Rules {
    /// Whether a worker category has no early-exit tolerance.
    pub fn is_exempt(&self, category: Option<&str>) -> bool {
        let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) else {
            return false;
        };
        self.exempt_categories
            .iter()
            .any(|c| c.trim().eq_ignore_ascii_case(category))
    }
}

impl App {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    /// Expand a leading `~/` in `data_dir` using `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Config {
    /// Create `app.data_dir` (after `~/` expansion) if it does not exist.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// SQLite URL derived from `DATABASE_URL` or the data directory.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/attendance.db", self.app.resolved_data_dir()))
    }
}

/// Read, parse and validate the YAML config.
/// `None` means `config.yaml` in the working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Check the ranges and orderings serde cannot express.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.concurrency == 0 {
        return Err(ConfigError::Invalid("app.concurrency must be > 0"));
    }
    if cfg.app.lookup_timeout_ms == 0 {
        return Err(ConfigError::Invalid("app.lookup_timeout_ms must be > 0"));
    }
    if cfg.app.processed_by.trim().is_empty() {
        return Err(ConfigError::Invalid("app.processed_by must be non-empty"));
    }

    let r = &cfg.rules;
    if r.collapse_window_secs > r.duplicate_window_secs {
        return Err(ConfigError::Invalid(
            "rules.collapse_window_secs must be <= rules.duplicate_window_secs",
        ));
    }
    let minutes = [
        r.early_arrival_allowance_min,
        r.on_time_tolerance_min,
        r.minor_late_max_min,
        r.major_late_max_min,
        r.early_exit_allowance_min,
        r.late_exit_max_min,
    ];
    if minutes.iter().any(|m| *m < 0) {
        return Err(ConfigError::Invalid("rules minute thresholds must be >= 0"));
    }
    if r.on_time_tolerance_min > r.minor_late_max_min {
        return Err(ConfigError::Invalid(
            "rules.on_time_tolerance_min must be <= rules.minor_late_max_min",
        ));
    }
    if r.minor_late_max_min > r.major_late_max_min {
        return Err(ConfigError::Invalid(
            "rules.minor_late_max_min must be <= rules.major_late_max_min",
        ));
    }
    if r.exempt_categories.iter().any(|c| c.trim().is_empty()) {
        return Err(ConfigError::Invalid("rules.exempt_categories entries must be non-empty"));
    }

    Ok(())
}

/// Returns an example YAML document with the default tolerances.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  concurrency: 4
  lookup_timeout_ms: 5000
  processed_by: "batch"

rules:
  duplicate_window_secs: 60
  collapse_window_secs: 0
  early_arrival_allowance_min: 30
  on_time_tolerance_min: 10
  minor_late_max_min: 16
  major_late_max_min: 30
  early_exit_allowance_min: 5
  late_exit_max_min: 30
  exempt_categories:
    - DOCENTE
    - PROFESOR
    - MAESTRO
"#
}
