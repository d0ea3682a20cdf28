//! Layered poller configuration using figment.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`FRAG_*` prefix, `__` separates nested keys)
//! 2. The configuration file (`.yaml`/`.yml` as YAML, anything else as TOML)
//! 3. Built-in defaults
//!
//! Figment maps `FRAG_DATABASE__URL` to `database.url` and
//! `FRAG_ASSIGNMENTS__HW01__EVAL` to `assignments.hw01.eval`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml, Yaml};
use figment::Figment;
use frag_store::ConnectionConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::assignment::AssignmentConfig;
use crate::scheduler::{ConfigSource, ScheduleSettings};

/// Interval used when the configuration does not name one.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

const INTERVAL_PATTERN: &str = r"^([0-9]+) *(s|m|h)$";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment extraction or merge error.
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    /// The configuration file does not exist.
    #[error("Could not open config {}", path.display())]
    Missing { path: PathBuf },

    /// A configuration field has an invalid value.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Raw `interval` value: seconds or `"<n> s|m|h"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntervalSpec {
    Seconds(u64),
    Text(String),
}

impl Default for IntervalSpec {
    fn default() -> Self {
        IntervalSpec::Seconds(DEFAULT_INTERVAL_SECS)
    }
}

impl IntervalSpec {
    pub fn to_duration(&self) -> Result<Duration, ConfigError> {
        match self {
            IntervalSpec::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            IntervalSpec::Text(text) => parse_interval(text),
        }
    }
}

/// Parse `"<n>s"`, `"<n> m"` or `"<n>h"`.
pub fn parse_interval(text: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        field: "interval".to_string(),
        reason,
    };

    let re = Regex::new(INTERVAL_PATTERN).map_err(|e| invalid(e.to_string()))?;
    let caps = re.captures(text.trim()).ok_or_else(|| {
        invalid(format!(
            "{text:?} must be an integer followed by s, m or h"
        ))
    })?;
    let amount: u64 = caps[1]
        .parse()
        .map_err(|e| invalid(format!("{text:?}: {e}")))?;
    let unit = match &caps[2] {
        "s" => 1,
        "m" => 60,
        _ => 3600,
    };
    amount
        .checked_mul(unit)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(format!("{text:?} is out of range")))
}

/// The `database` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "DatabaseConfig::default_url")]
    pub url: String,
    #[serde(default = "DatabaseConfig::default_namespace")]
    pub namespace: String,
    /// Database name, defaults to the course name.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub root: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            namespace: Self::default_namespace(),
            database: None,
            username: None,
            password: None,
            root: false,
        }
    }
}

impl DatabaseConfig {
    fn default_url() -> String {
        "mem://".to_string()
    }

    fn default_namespace() -> String {
        "frag".to_string()
    }
}

#[derive(Debug, Deserialize)]
struct RawPollConfig {
    #[serde(default)]
    interval: IntervalSpec,
    course: String,
    #[serde(default)]
    database: DatabaseConfig,
    #[serde(default)]
    inbox: Option<PathBuf>,
    #[serde(default)]
    assignments: BTreeMap<String, AssignmentConfig>,
}

/// Immutable configuration snapshot for one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub course: String,
    pub database: DatabaseConfig,
    pub inbox: Option<PathBuf>,
    pub assignments: BTreeMap<String, AssignmentConfig>,
}

impl PollConfig {
    /// Validate an extracted figment into a snapshot.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let raw: RawPollConfig = figment.extract()?;
        if raw.course.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "course".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if raw.database.username.is_some() != raw.database.password.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "database".to_string(),
                reason: "username and password must be given together".to_string(),
            });
        }
        Ok(Self {
            interval: raw.interval.to_duration()?,
            course: raw.course,
            database: raw.database,
            inbox: raw.inbox,
            assignments: raw.assignments,
        })
    }

    /// Connection settings for the submission store.
    pub fn connection(&self) -> ConnectionConfig {
        let db = &self.database;
        let mut conn = ConnectionConfig::new(db.url.as_str())
            .with_namespace(db.namespace.as_str())
            .with_database(db.database.as_deref().unwrap_or(&self.course))
            .with_root(db.root);
        if let (Some(user), Some(pass)) = (&db.username, &db.password) {
            conn = conn.with_credentials(user.as_str(), pass.as_str());
        }
        conn
    }
}

impl ScheduleSettings for PollConfig {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Loads [`PollConfig`] snapshots from a file plus the environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build the provider chain for the configured file.
    pub fn figment(&self) -> Figment {
        let is_yaml = matches!(
            self.path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let figment = if is_yaml {
            Figment::new().merge(Yaml::file(&self.path))
        } else {
            Figment::new().merge(Toml::file(&self.path))
        };
        figment.merge(Env::prefixed("FRAG_").split("__"))
    }

    pub fn load(&self) -> Result<PollConfig, ConfigError> {
        if !self.path.is_file() {
            return Err(ConfigError::Missing {
                path: self.path.clone(),
            });
        }
        let config = PollConfig::from_figment(&self.figment())?;
        debug!(
            path = %self.path.display(),
            interval_secs = config.interval.as_secs(),
            assignments = config.assignments.len(),
            "configuration loaded"
        );
        Ok(config)
    }
}

impl ConfigSource for ConfigLoader {
    type Snapshot = PollConfig;

    fn reload(&self) -> Result<PollConfig, ConfigError> {
        self.load()
    }
}
