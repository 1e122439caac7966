//! Tracing subscriber setup for binaries that drive sessions.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the embedding program's job. `init` is what the soak driver uses.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{FileLoggingConfig, LogFormat, LogRotation, LoggingConfig};
use crate::paths;

/// Filter directives override verbosity when set, e.g.
/// `AMQP_SESSION_LOG=amqp_session::transport=trace`.
pub const LOG_ENV_VAR: &str = "AMQP_SESSION_LOG";

const LOG_FILE_PREFIX: &str = "amqp-session.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub verbosity: u8,
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8, logging: LoggingConfig) -> Self {
        Self { verbosity, logging }
    }
}

/// Keeps the non-blocking file writer flushing until dropped.
pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(config.verbosity).into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let mut guards = Vec::new();
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.logging.stdout {
        layers.push(stderr_layer(config.logging.stdout_format));
    }

    let mut pruned = None;
    let mut setup_error = None;
    if config.logging.file.enabled {
        let dir = config
            .logging
            .file
            .dir
            .clone()
            .unwrap_or_else(paths::log_dir);
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                let retention = Retention::from_config(&config.logging.file);
                if retention.is_enabled() {
                    match prune_logs(&dir, retention, SystemTime::now()) {
                        Ok(removed) => pruned = Some(removed),
                        Err(err) => setup_error = Some(format!("log retention failed: {err}")),
                    }
                }
                let (layer, guard) = file_layer(&config.logging.file, &dir);
                layers.push(layer);
                guards.push(guard);
            }
            Err(err) => {
                setup_error = Some(format!("log dir init failed for {}: {err}", dir.display()));
            }
        }
    }
    layers.push(Box::new(filter));

    if Registry::default().with(layers).try_init().is_err() {
        tracing::debug!("global subscriber already installed");
    }
    if let Some(removed) = pruned
        && removed > 0
    {
        tracing::info!(removed, "log retention applied");
    }
    if let Some(error) = setup_error {
        tracing::warn!("{error}");
    }

    TelemetryGuard { _guards: guards }
}

fn stderr_layer(format: LogFormat) -> BoxedLayer {
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true);
    match format {
        LogFormat::Tree => Box::new(tracing_tree::HierarchicalLayer::new(2)),
        LogFormat::Pretty => Box::new(fmt.pretty()),
        LogFormat::Compact => Box::new(fmt.compact()),
        LogFormat::Json => Box::new(fmt.json().with_current_span(true)),
    }
}

fn file_layer(
    config: &FileLoggingConfig,
    dir: &Path,
) -> (BoxedLayer, tracing_appender::non_blocking::WorkerGuard) {
    let rotation = match config.rotation {
        LogRotation::Daily => tracing_appender::rolling::Rotation::DAILY,
        LogRotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
        LogRotation::Never => tracing_appender::rolling::Rotation::NEVER,
    };
    let appender =
        tracing_appender::rolling::RollingFileAppender::new(rotation, dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);
    let layer: BoxedLayer = match config.format {
        LogFormat::Json => Box::new(fmt.json().with_current_span(true)),
        LogFormat::Pretty => Box::new(fmt.pretty()),
        LogFormat::Compact | LogFormat::Tree => Box::new(fmt.compact()),
    };
    (layer, guard)
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::WARN,
        1 => tracing::metadata::LevelFilter::INFO,
        2 => tracing::metadata::LevelFilter::DEBUG,
        _ => tracing::metadata::LevelFilter::TRACE,
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Retention {
    max_age: Option<Duration>,
    max_files: Option<usize>,
}

impl Retention {
    fn from_config(config: &FileLoggingConfig) -> Self {
        Self {
            max_age: config
                .retention_max_age_days
                .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60))),
            max_files: config.retention_max_files,
        }
    }

    fn is_enabled(&self) -> bool {
        self.max_age.is_some() || self.max_files.is_some()
    }
}

#[derive(Clone, Debug)]
struct LogFile {
    path: PathBuf,
    modified: SystemTime,
}

fn prune_logs(dir: &Path, retention: Retention, now: SystemTime) -> std::io::Result<usize> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
        let meta = entry.metadata()?;
        if is_log && meta.is_file() {
            files.push(LogFile {
                path,
                modified: meta.modified().unwrap_or(now),
            });
        }
    }
    let mut removed = 0;
    for path in expired(&mut files, retention, now) {
        if fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Splits off files older than `max_age`, then the oldest beyond
/// `max_files`.
fn expired(files: &mut Vec<LogFile>, retention: Retention, now: SystemTime) -> Vec<PathBuf> {
    let mut expired = Vec::new();
    if let Some(max_age) = retention.max_age {
        let (old, keep): (Vec<_>, Vec<_>) = files.drain(..).partition(|file| {
            now.duration_since(file.modified).unwrap_or(Duration::ZERO) > max_age
        });
        expired.extend(old.into_iter().map(|file| file.path));
        *files = keep;
    }
    if let Some(max_files) = retention.max_files {
        files.sort_by_key(|file| file.modified);
        let excess = files.len().saturating_sub(max_files);
        expired.extend(files.drain(..excess).map(|file| file.path));
    }
    expired
}
