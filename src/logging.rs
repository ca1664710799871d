/// Structured logging for the hazard monitoring service.
///
/// Provides context-rich logging with pipeline stage and grid/scene
/// identifiers, timestamps, and severity levels. Supports both console
/// output and file-based logging for cron operation, where stdout goes
/// to mail or /dev/null and the log file is the record of what a run did.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Half-hourly precipitation service.
    Gpm,
    /// Optical scene service / scene library.
    Scene,
    /// Persisted window/mask state on disk.
    State,
    /// Alert e-mail delivery.
    Smtp,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Gpm => write!(f, "GPM"),
            DataSource::Scene => write!(f, "SCENE"),
            DataSource::State => write!(f, "STATE"),
            DataSource::Smtp => write!(f, "SMTP"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - no overpass today, payload not yet published
    Expected,
    /// Unexpected failure - indicates service degradation or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>) {
        let logger = Logger {
            min_level,
            log_file,
        };
        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    /// Log a message with the global logger
    fn log(&self, level: LogLevel, source: &DataSource, subject: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let subject_part = subject.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format!(
            "{} {} {}{}: {}",
            timestamp, level, source, subject_part, message
        );

        match level {
            LogLevel::Error => eprintln!("{}", log_entry),
            LogLevel::Warning => eprintln!("   {}", log_entry),
            LogLevel::Info => println!("   {}", message),
            LogLevel::Debug => println!("   [DEBUG] {}", message),
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>) {
    Logger::init(min_level, log_file.map(String::from));
}

/// Log a general informational message
pub fn info(source: DataSource, subject: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(LogLevel::Info, &source, subject, message);
        }
    }
}

/// Log a warning message
pub fn warn(source: DataSource, subject: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(LogLevel::Warning, &source, subject, message);
        }
    }
}

/// Log an error message
pub fn error(source: DataSource, subject: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(LogLevel::Error, &source, subject, message);
        }
    }
}

/// Log a debug message
pub fn debug(source: DataSource, subject: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(LogLevel::Debug, &source, subject, message);
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a precipitation service failure based on the error text
pub fn classify_gpm_failure(_epoch: &str, error_message: &str) -> FailureType {
    // The half-hourly product is published with variable latency; a key
    // that is listed but not yet fetchable is routine.
    if error_message.contains("payload not found") || error_message.contains("not yet available") {
        FailureType::Expected
    } else if error_message.contains("HTTP") || error_message.contains("listing") {
        FailureType::Unexpected
    } else if error_message.contains("bad epoch key") || error_message.contains("cell") {
        // Parse failures suggest a product format change
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

/// Classify a scene service failure
pub fn classify_scene_failure(_scene_id: &str, error_message: &str) -> FailureType {
    if error_message.contains("no scene published") {
        // Cloud cover or downlink gaps routinely delay publication
        FailureType::Expected
    } else if error_message.contains("HTTP") || error_message.contains("timeout") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a precipitation acquisition failure with automatic classification
pub fn log_gpm_failure(epoch: &str, operation: &str, err: &dyn std::error::Error) {
    let error_msg = err.to_string();
    let failure_type = classify_gpm_failure(epoch, &error_msg);

    let message = format!("{} failed [{}]: {}", operation, failure_type, error_msg);

    match failure_type {
        FailureType::Expected => debug(DataSource::Gpm, Some(epoch), &message),
        FailureType::Unexpected => error(DataSource::Gpm, Some(epoch), &message),
        FailureType::Unknown => warn(DataSource::Gpm, Some(epoch), &message),
    }
}

/// Log a scene acquisition failure with classification
pub fn log_scene_failure(scene_id: &str, operation: &str, err: &dyn std::error::Error) {
    let error_msg = err.to_string();
    let failure_type = classify_scene_failure(scene_id, &error_msg);

    let message = format!("{} failed [{}]: {}", operation, failure_type, error_msg);

    match failure_type {
        FailureType::Expected => debug(DataSource::Scene, Some(scene_id), &message),
        FailureType::Unexpected => error(DataSource::Scene, Some(scene_id), &message),
        FailureType::Unknown => warn(DataSource::Scene, Some(scene_id), &message),
    }
}

// ---------------------------------------------------------------------------
// Catch-up Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of an epoch catch-up pass
pub fn log_catchup_summary(source: DataSource, total: usize, processed: usize, failed: usize) {
    let message = format!(
        "Catch-up complete: {}/{} epochs processed, {} failed",
        processed, total, failed
    );

    if failed == 0 {
        info(source, None, &message);
    } else if processed == 0 {
        error(source, None, &message);
    } else {
        warn(source, None, &message);
    }
}
