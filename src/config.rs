//! Engine configuration and the optional JSON config file.
//!
//! [`EngineConfig`] is what the engine runs with. [`FileConfig`] mirrors it
//! with every field optional; the binary layers CLI flags over the file over
//! the defaults.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::api::{ClientFilter, DEFAULT_API_BASE, FilterCriteria, MAX_PAGE_SIZE, Period, RatingFilter, SortOrder};
use crate::classify::CategoryThresholds;
use crate::download::{DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, HttpSettings, RetryPolicy};
use crate::sniff::normalize_type_name;

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 5;

/// Upper bound on workers.
pub const MAX_WORKERS: usize = 100;

/// Default minimum delay between page fetches.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(500);

/// Default page size.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default output root.
pub const DEFAULT_OUTPUT_ROOT: &str = "downloads";

/// Database file name inside the output root.
pub const DATABASE_FILE: &str = "download_history.db";

/// Ledger file name inside the output root.
pub const LEDGER_FILE: &str = "download_log.txt";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of range.
    #[error("invalid value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        /// Offending option.
        field: &'static str,
        /// Value given.
        value: String,
        /// Accepted range or values.
        expected: String,
    },

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`FileConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl fmt::Display, expected: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            value: value.to_string(),
            expected: expected.into(),
        }
    }
}

/// How many success/failed outcomes a run aims for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "TargetRepr")]
pub enum Target {
    /// Stop after this many outcomes.
    Count(u64),
    /// Run until the source is exhausted or the run is stopped.
    #[default]
    Unbounded,
}

impl Target {
    /// The count, when bounded.
    #[must_use]
    pub fn count(self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(n),
            Self::Unbounded => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("endless") || s.eq_ignore_ascii_case("unbounded") {
            return Ok(Self::Unbounded);
        }
        s.parse::<u64>()
            .map(Self::Count)
            .map_err(|_| format!("invalid target '{s}' (expected a number or 'endless')"))
    }
}

impl serde::Serialize for Target {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Count(n) => serializer.serialize_u64(*n),
            Self::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TargetRepr {
    Count(u64),
    Word(String),
}

impl TryFrom<TargetRepr> for Target {
    type Error = String;

    fn try_from(value: TargetRepr) -> Result<Self, Self::Error> {
        match value {
            TargetRepr::Count(n) => Ok(Self::Count(n)),
            TargetRepr::Word(word) => word.parse(),
        }
    }
}

/// Everything one engine instance needs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent transfers, `1..=100`.
    pub workers: usize,
    /// Minimum delay between page fetches.
    pub page_delay: Duration,
    /// Total fetch attempts per item; 0 behaves like 1.
    pub max_retries: u32,
    /// First backoff delay.
    pub retry_base_delay: Duration,
    /// Root of every file the engine writes.
    pub output_root: PathBuf,
    /// Store media under a rating-category folder.
    pub organize_by_category: bool,
    /// Allowed extensions (`png`, `jpg`, `mp4`, ...); `None` allows everything.
    pub allowed_types: Option<Vec<String>>,
    /// Per-item filters applied before dispatch.
    pub client_filter: ClientFilter,
    /// Outcomes to collect.
    pub target: Target,
    /// Requested page size, `1..=200`.
    pub page_size: u32,
    /// Write the raw item JSON next to the media.
    pub save_metadata: bool,
    /// Rating level to category mapping.
    pub thresholds: CategoryThresholds,
    /// Images endpoint.
    pub api_base: String,
    /// Bearer token for the API.
    pub api_key: Option<String>,
    /// Catalog database; defaults to `<output_root>/download_history.db`.
    pub database_path: Option<PathBuf>,
    /// Ledger file; defaults to `<output_root>/download_log.txt`.
    pub ledger_path: Option<PathBuf>,
    /// Install a Ctrl+C handler for the run. Embedded hosts leave this off
    /// and stop runs through the handle.
    pub handle_signals: bool,
    /// Mark items whose retries ran out so later runs skip them.
    pub mark_failed_in_ledger: bool,
    /// HTTP timeouts.
    pub http: HttpSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            page_delay: DEFAULT_PAGE_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_BASE_DELAY,
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            organize_by_category: true,
            allowed_types: None,
            client_filter: ClientFilter::default(),
            target: Target::Unbounded,
            page_size: DEFAULT_PAGE_SIZE,
            save_metadata: true,
            thresholds: CategoryThresholds::default(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            database_path: None,
            ledger_path: None,
            handle_signals: false,
            mark_failed_in_ledger: true,
            http: HttpSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::invalid("workers", self.workers, "1..=100"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ConfigError::invalid("page_size", self.page_size, "1..=200"));
        }
        if self.target == Target::Count(0) {
            return Err(ConfigError::invalid("target", 0, "a positive count or 'endless'"));
        }
        if let Some(types) = &self.allowed_types
            && types.is_empty()
        {
            return Err(ConfigError::invalid(
                "allowed_types",
                "[]",
                "at least one type, or no list to allow all",
            ));
        }
        if !self.thresholds.is_ordered() {
            return Err(ConfigError::invalid(
                "thresholds",
                format!(
                    "mature_from={} adult_from={}",
                    self.thresholds.mature_from, self.thresholds.adult_from
                ),
                "mature_from <= adult_from <= 6",
            ));
        }
        if self.output_root.as_os_str().is_empty() {
            return Err(ConfigError::invalid("output_root", "\"\"", "a directory path"));
        }
        Ok(())
    }

    /// Catalog database path.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.output_root.join(DATABASE_FILE))
    }

    /// Ledger file path.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.output_root.join(LEDGER_FILE))
    }

    /// Retry policy for item and page fetches.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(self.max_retries).with_base_delay(self.retry_base_delay)
    }

    /// True if files with extension `ext` may be stored.
    #[must_use]
    pub fn allows_type(&self, ext: &str) -> bool {
        let ext = normalize_type_name(ext);
        self.allowed_types
            .as_ref()
            .is_none_or(|types| types.iter().any(|t| normalize_type_name(t) == ext))
    }
}

/// JSON config file. Every field is optional; unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub output_root: Option<PathBuf>,
    pub workers: Option<usize>,
    pub page_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub organize_by_category: Option<bool>,
    pub allowed_types: Option<Vec<String>>,
    pub min_resolution: Option<u32>,
    pub adult_only: Option<bool>,
    pub min_reactions: Option<u64>,
    pub target: Option<Target>,
    pub page_size: Option<u32>,
    pub save_metadata: Option<bool>,
    pub mature_from: Option<u8>,
    pub adult_from: Option<u8>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub database_path: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
    pub mark_failed_in_ledger: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub sort: Option<SortOrder>,
    pub period: Option<Period>,
    pub rating: Option<RatingFilter>,
    pub username: Option<String>,
    pub model_id: Option<u64>,
    pub post_id: Option<u64>,
}

impl FileConfig {
    /// Copies every set value onto `config`.
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if let Some(v) = &self.output_root {
            config.output_root.clone_from(v);
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.page_delay_ms {
            config.page_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = self.organize_by_category {
            config.organize_by_category = v;
        }
        if let Some(v) = &self.allowed_types {
            config.allowed_types = Some(v.clone());
        }
        if let Some(v) = self.min_resolution {
            config.client_filter.min_resolution = Some(v);
        }
        if let Some(v) = self.adult_only {
            config.client_filter.adult_only = v;
        }
        if let Some(v) = self.min_reactions {
            config.client_filter.min_reactions = Some(v);
        }
        if let Some(v) = self.target {
            config.target = v;
        }
        if let Some(v) = self.page_size {
            config.page_size = v;
        }
        if let Some(v) = self.save_metadata {
            config.save_metadata = v;
        }
        if let Some(v) = self.mature_from {
            config.thresholds.mature_from = v;
        }
        if let Some(v) = self.adult_from {
            config.thresholds.adult_from = v;
        }
        if let Some(v) = &self.api_base {
            config.api_base.clone_from(v);
        }
        if let Some(v) = &self.api_key {
            config.api_key = Some(v.clone());
        }
        if let Some(v) = &self.database_path {
            config.database_path = Some(v.clone());
        }
        if let Some(v) = &self.ledger_path {
            config.ledger_path = Some(v.clone());
        }
        if let Some(v) = self.mark_failed_in_ledger {
            config.mark_failed_in_ledger = v;
        }
        if let Some(v) = self.connect_timeout_secs {
            config.http.connect_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.read_timeout_secs {
            config.http.read_timeout = Duration::from_secs(v);
        }
    }

    /// Copies the query options onto `criteria`.
    pub fn apply_criteria(&self, criteria: &mut FilterCriteria) {
        if let Some(v) = self.sort {
            criteria.sort = v;
        }
        if let Some(v) = self.period {
            criteria.period = v;
        }
        if let Some(v) = self.rating {
            criteria.rating = Some(v);
        }
        if let Some(v) = &self.username {
            criteria.username = Some(v.clone());
        }
        if let Some(v) = self.model_id {
            criteria.model_id = Some(v);
        }
        if let Some(v) = self.post_id {
            criteria.post_id = Some(v);
        }
    }
}

/// Default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/harvester/config.json`
/// 2. `$HOME/.config/harvester/config.json`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("harvester")
                .join("config.json"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("harvester")
            .join("config.json"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Reads and parses a config file.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Loads `explicit` if given (it must exist), else the default path if a
/// file is there.
///
/// # Errors
///
/// Returns [`ConfigError`] if a file exists but cannot be read or parsed.
pub fn load_config(explicit: Option<&Path>) -> Result<Option<FileConfig>, ConfigError> {
    if let Some(path) = explicit {
        return load_file_config(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path).map(Some),
        _ => Ok(None),
    }
}
