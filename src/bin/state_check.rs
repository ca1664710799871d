/// State verification entry point. No arguments.
///
/// Audits the persisted window state and the alert mask, prints a
/// summary, and archives the full report as JSON beside the state.
/// Exits non-zero when any window fails its invariant.

use std::path::Path;
use std::process;

use chrono::Utc;

use slidemon_service::codec;
use slidemon_service::config::{CONFIG_FILE, RunContext};
use slidemon_service::logging::{self, DataSource, LogLevel};
use slidemon_service::model::MonitorError;
use slidemon_service::state::StatePaths;
use slidemon_service::verify;

fn main() {
    logging::init_logger(LogLevel::Info, None);
    process::exit(match run() {
        Ok(code) => code,
        Err(err) => {
            logging::error(DataSource::System, None, &err.to_string());
            2
        }
    });
}

fn run() -> Result<i32, MonitorError> {
    let ctx = RunContext::initialize(Path::new(CONFIG_FILE), Utc::now())?;
    let paths = StatePaths::new(&ctx.config.state_dir);

    let report = verify::verify_state(&paths);
    verify::print_summary(&report);

    let json = serde_json::to_vec_pretty(&report).map_err(|e| MonitorError::Config(format!(
        "cannot serialize verification report: {}",
        e
    )))?;
    let report_path = paths.root().join("state_report.json");
    codec::atomic_write(&report_path, &json)?;

    let healthy = report.summary.windows_failed == 0
        && report.alert_mask.strictly_boolean
        && report.alert_mask.error_message.is_none();
    Ok(if healthy { 0 } else { 1 })
}
