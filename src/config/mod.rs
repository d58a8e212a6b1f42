//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, ValueEnum, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::options;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vetrina";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 2000;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1500;
const DEFAULT_SNAPSHOT_DELAYS_MS: [u64; 2] = [300, 1500];
const DEFAULT_MIN_CONTENT_BYTES: usize = 512;

/// Command-line arguments for the preview probe binary.
#[derive(Debug, Parser)]
#[command(
    name = "preview-probe",
    version,
    about = "Drive the preview engine against scripted render routines"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VETRINA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Scripted routine behavior to exercise.
    #[arg(long, value_enum, default_value = "clean")]
    pub scenario: ProbeScenario,

    /// Document to feed the routine instead of the built-in sample payload.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub document: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: PreviewOverrides,
}

/// Misbehavior profiles of the scripted routine, named after what the real
/// library has been observed doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProbeScenario {
    /// Write content, then resolve.
    Clean,
    /// Resolve before any content exists.
    EagerResolve,
    /// Resolve without ever producing content.
    MuteResolve,
    /// Write content but never settle.
    NeverSettles,
    /// Reject after partial output; the full document lands later.
    RejectsLate,
    /// Fault synchronously on every invocation.
    Faulty,
    /// Load a library with no render entry point.
    MissingEntry,
    /// Fail the first two library loads, then behave cleanly.
    FlakyLoad,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PreviewOverrides {
    /// Override the attempt budget per session.
    #[arg(long = "preview-max-retries", value_name = "COUNT")]
    pub max_retries: Option<u32>,

    /// Override the per-attempt deadline in milliseconds.
    #[arg(long = "preview-attempt-timeout-ms", value_name = "MS")]
    pub attempt_timeout_ms: Option<u64>,

    /// Override the delay between attempts in milliseconds.
    #[arg(long = "preview-retry-backoff-ms", value_name = "MS")]
    pub retry_backoff_ms: Option<u64>,

    /// Override the snapshot inspection delays in milliseconds.
    #[arg(
        long = "preview-snapshot-delays-ms",
        value_name = "MS,MS",
        value_delimiter = ','
    )]
    pub snapshot_delays_ms: Option<Vec<u64>>,

    /// Override the content-length cutoff of the completion heuristic.
    #[arg(long = "preview-min-content-bytes", value_name = "BYTES")]
    pub min_content_bytes: Option<usize>,

    /// Override the wrapper class the routine frames output in.
    #[arg(long = "preview-wrapper-class", value_name = "CLASS")]
    pub wrapper_class_name: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub preview: PreviewSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub max_retries: NonZeroU32,
    pub attempt_timeout: Duration,
    pub retry_backoff: Duration,
    pub snapshot_delays: Vec<Duration>,
    pub min_content_bytes: usize,
    pub wrapper_class_name: String,
    pub use_inline_encoding: bool,
    pub paginate: bool,
    pub allow_multi_worker: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VETRINA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for
/// downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    preview: RawPreviewSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &PreviewOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.max_retries {
            self.preview.max_retries = Some(max);
        }
        if let Some(timeout) = overrides.attempt_timeout_ms {
            self.preview.attempt_timeout_ms = Some(timeout);
        }
        if let Some(backoff) = overrides.retry_backoff_ms {
            self.preview.retry_backoff_ms = Some(backoff);
        }
        if let Some(delays) = overrides.snapshot_delays_ms.as_ref() {
            self.preview.snapshot_delays_ms = Some(delays.clone());
        }
        if let Some(cutoff) = overrides.min_content_bytes {
            self.preview.min_content_bytes = Some(cutoff);
        }
        if let Some(class) = overrides.wrapper_class_name.as_ref() {
            self.preview.wrapper_class_name = Some(class.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, preview } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            preview: build_preview_settings(preview)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_preview_settings(preview: RawPreviewSettings) -> Result<PreviewSettings, LoadError> {
    let max_retries_value = preview.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
    let max_retries = NonZeroU32::new(max_retries_value)
        .ok_or_else(|| LoadError::invalid("preview.max_retries", "must be greater than zero"))?;

    let timeout_ms = preview
        .attempt_timeout_ms
        .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "preview.attempt_timeout_ms",
            "must be greater than zero",
        ));
    }
    let attempt_timeout = Duration::from_millis(timeout_ms);

    let retry_backoff =
        Duration::from_millis(preview.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS));

    let delays_ms = preview
        .snapshot_delays_ms
        .unwrap_or_else(|| DEFAULT_SNAPSHOT_DELAYS_MS.to_vec());
    if delays_ms.is_empty() {
        return Err(LoadError::invalid(
            "preview.snapshot_delays_ms",
            "at least one snapshot delay is required",
        ));
    }
    if !delays_ms.is_sorted() || delays_ms.iter().any(|delay| *delay == 0) {
        return Err(LoadError::invalid(
            "preview.snapshot_delays_ms",
            "delays must be nonzero and ascending",
        ));
    }
    let snapshot_delays = delays_ms.into_iter().map(Duration::from_millis).collect();

    let min_content_bytes = preview
        .min_content_bytes
        .unwrap_or(DEFAULT_MIN_CONTENT_BYTES);
    if min_content_bytes == 0 {
        return Err(LoadError::invalid(
            "preview.min_content_bytes",
            "must be greater than zero",
        ));
    }

    let wrapper_class_name = preview
        .wrapper_class_name
        .unwrap_or_else(|| options::DEFAULT_WRAPPER_CLASS.to_string());
    if wrapper_class_name.trim().is_empty() {
        return Err(LoadError::invalid(
            "preview.wrapper_class_name",
            "class must not be empty",
        ));
    }

    Ok(PreviewSettings {
        max_retries,
        attempt_timeout,
        retry_backoff,
        snapshot_delays,
        min_content_bytes,
        wrapper_class_name,
        use_inline_encoding: preview.use_inline_encoding.unwrap_or(true),
        paginate: preview.paginate.unwrap_or(true),
        allow_multi_worker: preview.allow_multi_worker.unwrap_or(false),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPreviewSettings {
    max_retries: Option<u32>,
    attempt_timeout_ms: Option<u64>,
    retry_backoff_ms: Option<u64>,
    snapshot_delays_ms: Option<Vec<u64>>,
    min_content_bytes: Option<usize>,
    wrapper_class_name: Option<String>,
    use_inline_encoding: Option<bool>,
    paginate: Option<bool>,
    allow_multi_worker: Option<bool>,
}
