/// Run configuration and per-run context.
///
/// Everything that used to be ambient — directories, service endpoints,
/// credentials, the run timestamp — is read once at startup into a
/// `RunContext` and passed explicitly into each component. Components never
/// consult the environment themselves.
///
/// Configuration comes from `slidemon.toml` next to the binaries;
/// credentials come from the environment (optionally via a `.env` file).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::MonitorError;

/// Default configuration file consulted by the no-argument entry points.
pub const CONFIG_FILE: &str = "./slidemon.toml";

// ---------------------------------------------------------------------------
// Run configuration (slidemon.toml)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Root of the persisted window/mask/marker state.
    pub state_dir: PathBuf,
    /// Root of emitted rasters (window sums, daily seals, detections).
    pub output_dir: PathBuf,
    /// Scene library: current downloads plus the historical backfill stock.
    pub scene_dir: PathBuf,

    /// Base URL of the half-hourly precipitation service.
    #[serde(default = "default_precip_base")]
    pub precip_base_url: String,
    /// Base URL of the scene distribution service.
    #[serde(default = "default_scene_base")]
    pub scene_base_url: String,

    /// Alert recipients. Empty list disables notification delivery.
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_mail_from")]
    pub mail_from: String,

    /// Historical scenes consulted per backfill, at most.
    #[serde(default = "default_backfill_depth")]
    pub backfill_depth: usize,
    /// Rolling-sum rasters kept per window output directory.
    #[serde(default = "default_output_retention")]
    pub output_retention: usize,

    /// File stem (under `state_dir`) of the per-cell historical-average
    /// grid used by the percent-deviation diagnostic.
    #[serde(default = "default_threshold_grid")]
    pub threshold_grid_file: String,

    /// When set, the rainfall pipeline replays archived epoch files from
    /// this directory instead of contacting the precipitation service.
    #[serde(default)]
    pub replay_archive: Option<PathBuf>,

    /// Optional log file path; console logging is always on.
    #[serde(default)]
    pub log_file: Option<String>,
}

fn default_precip_base() -> String {
    "https://data.hazard-monitor.example/precip".to_string()
}

fn default_scene_base() -> String {
    "https://data.hazard-monitor.example/scenes".to_string()
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_mail_from() -> String {
    "slidemon-alerts@example.org".to_string()
}

fn default_backfill_depth() -> usize {
    crate::model::BACKFILL_CAP
}

fn default_output_retention() -> usize {
    crate::model::OUTPUT_RETENTION
}

fn default_threshold_grid() -> String {
    "annual_thresholds.asc".to_string()
}

impl RunConfig {
    /// Loads and validates the TOML configuration file.
    pub fn load(path: &Path) -> Result<RunConfig, MonitorError> {
        let text = fs::read_to_string(path).map_err(|e| {
            MonitorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: RunConfig = toml::from_str(&text).map_err(|e| {
            MonitorError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        if config.backfill_depth == 0 {
            return Err(MonitorError::Config(
                "backfill_depth must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Credentials (environment)
// ---------------------------------------------------------------------------

/// Secrets pulled from the environment. `.env` is honored when present,
/// so credentials stay out of the configuration file and the repository.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Account string sent to the precipitation service.
    pub precip_user: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Credentials {
        dotenv::dotenv().ok();
        Credentials {
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            precip_user: env::var("PRECIP_SERVICE_USER").ok(),
        }
    }

    /// Both SMTP values, or `None` when delivery is unconfigured.
    pub fn smtp_pair(&self) -> Option<(&str, &str)> {
        match (&self.smtp_username, &self.smtp_password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Everything one run needs, assembled once at startup.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: RunConfig,
    pub credentials: Credentials,
    pub started_at: DateTime<Utc>,
    /// Timestamp string stamped into output file names for this run.
    pub run_stamp: String,
}

impl RunContext {
    /// Builds the context for a run starting at `now` (injected for
    /// deterministic tests).
    pub fn initialize(config_path: &Path, now: DateTime<Utc>) -> Result<RunContext, MonitorError> {
        let config = RunConfig::load(config_path)?;
        Ok(RunContext {
            config,
            credentials: Credentials::from_env(),
            started_at: now,
            run_stamp: now.format("%Y%m%d-%H%M%S").to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
