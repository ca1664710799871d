/// Rainfall pipeline entry point. No arguments; run half-hourly from cron.
///
/// Exit code 0 means success or "no new epochs"; anything else is an
/// unrecoverable failure with the failing stage in the log.

use std::path::Path;
use std::process;

use chrono::Utc;

use slidemon_service::accumulate::Accumulator;
use slidemon_service::alert::{self, notify};
use slidemon_service::config::{CONFIG_FILE, RunContext};
use slidemon_service::dev_mode::ReplaySource;
use slidemon_service::ingest::gpm;
use slidemon_service::logging::{self, DataSource, LogLevel};
use slidemon_service::model::{EpochKey, MonitorError};
use slidemon_service::raster::Grid;
use slidemon_service::regions::REGION;
use slidemon_service::codec;
use slidemon_service::state::{self, StateLock, StatePaths};

fn main() {
    logging::init_logger(LogLevel::Info, None);
    process::exit(match run() {
        Ok(()) => 0,
        Err(err) => {
            logging::error(DataSource::System, None, &err.to_string());
            1
        }
    });
}

enum EpochSource {
    Live(reqwest::blocking::Client),
    Replay(ReplaySource),
}

impl EpochSource {
    fn new_keys(
        &self,
        ctx: &RunContext,
        marker: Option<&EpochKey>,
    ) -> Result<Vec<EpochKey>, MonitorError> {
        match self {
            EpochSource::Live(client) => gpm::new_keys_since(
                client,
                &ctx.config.precip_base_url,
                marker,
                ctx.started_at.date_naive(),
            ),
            EpochSource::Replay(replay) => replay.new_keys_since(marker),
        }
    }

    fn fetch(&self, ctx: &RunContext, key: &EpochKey) -> Result<Grid, MonitorError> {
        let expected = REGION.precip_footprint();
        match self {
            EpochSource::Live(client) => {
                gpm::fetch_epoch(client, &ctx.config.precip_base_url, key, &expected)
            }
            EpochSource::Replay(replay) => replay.load_epoch(key, &expected),
        }
    }
}

fn run() -> Result<(), MonitorError> {
    let ctx = RunContext::initialize(Path::new(CONFIG_FILE), Utc::now())?;
    logging::init_logger(LogLevel::Info, ctx.config.log_file.as_deref());

    let paths = StatePaths::new(&ctx.config.state_dir);
    let _lock = StateLock::acquire(paths.root())?;
    let marker = state::read_marker(&paths)?;

    let source = match &ctx.config.replay_archive {
        Some(archive) => {
            logging::warn(
                DataSource::System,
                None,
                &format!("replaying archived epochs from {}", archive.display()),
            );
            EpochSource::Replay(ReplaySource::new(archive))
        }
        None => EpochSource::Live(http_client(&ctx)?),
    };

    let keys = source.new_keys(&ctx, marker.as_ref())?;
    if keys.is_empty() {
        logging::info(DataSource::Gpm, None, "no new epochs; nothing to do");
        return Ok(());
    }
    logging::info(
        DataSource::Gpm,
        None,
        &format!(
            "{} new epoch(s) since {}",
            keys.len(),
            marker
                .as_ref()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "first run".to_string())
        ),
    );

    let notifier: Box<dyn notify::Notifier> = build_notifier(&ctx);
    let mut accumulator = Accumulator::open(&paths)?;
    let mut processed = 0;

    for key in &keys {
        let grid = match source.fetch(&ctx, key) {
            Ok(grid) => grid,
            Err(err) => {
                logging::log_gpm_failure(key.as_str(), "epoch fetch", &err);
                return Err(err);
            }
        };
        let outputs = accumulator.ingest(&grid, key)?;
        accumulator.persist()?;
        state::write_marker(&paths, key)?;

        let sum24_path = write_window_outputs(&ctx, key, &outputs)?;

        let outcome = alert::evaluate_epoch(
            &paths,
            &ctx,
            &outputs.sum24,
            key,
            Some(&sum24_path),
            notifier.as_ref(),
        )?;
        if let Some(diagnostic) = outcome.diagnostic {
            let path = ctx
                .config
                .output_dir
                .join("deviation")
                .join(format!("{}.asc", key));
            codec::write_grid(&path, &diagnostic)?;
        }
        if outcome.newly_alerted > 0 {
            logging::info(
                DataSource::System,
                Some(key.as_str()),
                &format!(
                    "{} cell(s) newly alerted, {} recovered",
                    outcome.newly_alerted, outcome.recovered
                ),
            );
        }
        processed += 1;
    }

    logging::log_catchup_summary(DataSource::Gpm, keys.len(), processed, keys.len() - processed);
    Ok(())
}

fn http_client(ctx: &RunContext) -> Result<reqwest::blocking::Client, MonitorError> {
    // The precipitation service identifies callers by a registered
    // account string; anonymous access works but is rate-limited.
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(user) = &ctx.credentials.precip_user {
        let value = reqwest::header::HeaderValue::from_str(user).map_err(|e| {
            MonitorError::Config(format!("PRECIP_SERVICE_USER is not a valid header: {}", e))
        })?;
        headers.insert("x-account-id", value);
    }
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .default_headers(headers)
        .build()
        .map_err(|e| MonitorError::Acquisition(format!("cannot build HTTP client: {}", e)))
}

fn build_notifier(ctx: &RunContext) -> Box<dyn notify::Notifier> {
    match (ctx.credentials.smtp_pair(), ctx.config.recipients.is_empty()) {
        (Some((username, password)), false) => Box::new(notify::SmtpNotifier {
            host: ctx.config.smtp_host.clone(),
            from: ctx.config.mail_from.clone(),
            username: username.to_string(),
            password: password.to_string(),
        }),
        _ => {
            logging::warn(
                DataSource::Smtp,
                None,
                "SMTP credentials or recipients missing; alerts will be logged only",
            );
            Box::new(notify::LogNotifier)
        }
    }
}

/// Writes the four window rasters (and any sealed day) for this epoch and
/// prunes each window's output directory to the configured retention.
/// Returns the 24h raster path for the alert attachment.
fn write_window_outputs(
    ctx: &RunContext,
    key: &EpochKey,
    outputs: &slidemon_service::accumulate::EpochOutputs,
) -> Result<std::path::PathBuf, MonitorError> {
    let out = &ctx.config.output_dir;
    let rasters = [
        ("sum24", &outputs.sum24),
        ("sum48", &outputs.sum48),
        ("sum72", &outputs.sum72),
        ("max16", &outputs.max16),
    ];
    let mut sum24_path = out.join("sum24").join(format!("{}.asc", key));
    for (name, grid) in rasters {
        let dir = out.join(name);
        let path = dir.join(format!("{}.asc", key));
        codec::write_grid(&path, grid)?;
        state::prune_outputs(&dir, ctx.config.output_retention)?;
        if name == "sum24" {
            sum24_path = path;
        }
    }
    if let Some(sealed) = &outputs.sealed_day {
        let path = out
            .join("daily")
            .join(format!("{}.asc", key.date().format("%Y%m%d")));
        codec::write_grid(&path, sealed)?;
    }
    Ok(sum24_path)
}
