use std::path::{Path, PathBuf};
use std::time::Duration;

use rollcall_core::{DEFAULT_DESCRIPTOR_DIM, RECOGNITION_THRESHOLD};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// Built from defaults, then the optional TOML file named by `ROLLCALL_CONFIG`
/// (or `$XDG_CONFIG_HOME/rollcall/rollcalld.toml` when present), then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the capture widget drops snapshots into.
    pub spool_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Length of every face descriptor.
    pub descriptor_dim: usize,
    /// Maximum Euclidean distance accepted as a match.
    pub recognition_threshold: f32,
    /// Interval between attendance samples.
    pub sample_period_ms: u64,
    /// Optional remote document service mirrored on every write.
    pub remote_url: Option<String>,
    /// Timeout for the remote connectivity probe and requests.
    pub remote_timeout_ms: u64,
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    spool_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    descriptor_dim: Option<usize>,
    recognition_threshold: Option<f32>,
    sample_period_ms: Option<u64>,
    remote_url: Option<String>,
    remote_timeout_ms: Option<u64>,
}

impl Config {
    /// Built-in defaults under `$XDG_DATA_HOME/rollcall`.
    pub fn defaults() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".local/share"))
            .join("rollcall");

        Self {
            spool_dir: data_dir.join("spool"),
            db_path: data_dir.join("rollcall.db"),
            descriptor_dim: DEFAULT_DESCRIPTOR_DIM,
            recognition_threshold: RECOGNITION_THRESHOLD,
            sample_period_ms: 1000,
            remote_url: None,
            remote_timeout_ms: 2000,
        }
    }

    /// Load configuration from file and `ROLLCALL_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Self::defaults();

        if let Some(path) = config_file_path() {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            cfg.merge_toml(&raw)
                .map_err(|source| ConfigError::Parse { path, source })?;
        }

        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn merge_toml(&mut self, raw: &str) -> Result<(), toml::de::Error> {
        let file: FileConfig = toml::from_str(raw)?;
        if let Some(v) = file.spool_dir {
            self.spool_dir = v;
        }
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.descriptor_dim {
            self.descriptor_dim = v;
        }
        if let Some(v) = file.recognition_threshold {
            self.recognition_threshold = v;
        }
        if let Some(v) = file.sample_period_ms {
            self.sample_period_ms = v;
        }
        if file.remote_url.is_some() {
            self.remote_url = file.remote_url;
        }
        if let Some(v) = file.remote_timeout_ms {
            self.remote_timeout_ms = v;
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_SPOOL_DIR") {
            self.spool_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        self.descriptor_dim = env_parse("ROLLCALL_DESCRIPTOR_DIM", self.descriptor_dim);
        self.recognition_threshold =
            env_parse("ROLLCALL_RECOGNITION_THRESHOLD", self.recognition_threshold);
        self.sample_period_ms = env_parse("ROLLCALL_SAMPLE_PERIOD_MS", self.sample_period_ms);
        if let Ok(v) = std::env::var("ROLLCALL_REMOTE_URL") {
            self.remote_url = if v.trim().is_empty() { None } else { Some(v) };
        }
        self.remote_timeout_ms = env_parse("ROLLCALL_REMOTE_TIMEOUT_MS", self.remote_timeout_ms);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.descriptor_dim == 0 {
            return Err(ConfigError::Invalid("descriptor_dim must be greater than zero".into()));
        }
        if !self.recognition_threshold.is_finite() || self.recognition_threshold <= 0.0 {
            return Err(ConfigError::Invalid(
                "recognition_threshold must be a positive finite number".into(),
            ));
        }
        if self.sample_period_ms == 0 {
            return Err(ConfigError::Invalid("sample_period_ms must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("rollcall/rollcalld.toml");
    Path::new(&default).exists().then_some(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
