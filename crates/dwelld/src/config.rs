use dwell_core::tracker::{TrackerConfig, TriggerMode};
use dwell_core::upload::UploadConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// What happens to a captured snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Embed and match against the local profile store.
    Local,
    /// POST to the viewer endpoint.
    Upload,
}

impl Mode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Mode::Local),
            "upload" => Some(Mode::Upload),
            _ => None,
        }
    }
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `DWELL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path, or `synthetic` for the camera-less provider.
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory for temporary snapshots.
    pub capture_dir: PathBuf,
    /// SQLite database holding the profile collection.
    pub db_path: PathBuf,
    /// Minimum continuous presence before a session qualifies.
    pub session_threshold_ms: i64,
    /// Cosine similarity at or above which a capture matches a stored profile.
    pub match_threshold: f32,
    /// Number of operator log lines kept.
    pub log_capacity: usize,
    pub mode: Mode,
    pub api_base: String,
    pub org_id: String,
    pub upload_timeout_secs: u64,
    pub min_upload_duration_secs: i64,
    /// Abandon a capture after this many milliseconds; 0 waits forever.
    pub capture_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("dwell");
        let upload = UploadConfig::default();

        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            capture_dir: std::env::temp_dir().join("dwell-captures"),
            db_path: data_dir.join("profiles.db"),
            session_threshold_ms: dwell_core::tracker::DEFAULT_SESSION_THRESHOLD_MS,
            match_threshold: dwell_core::store::DEFAULT_MATCH_THRESHOLD,
            log_capacity: dwell_core::log::DEFAULT_LOG_CAPACITY,
            mode: Mode::Local,
            api_base: upload.api_base,
            org_id: upload.org_id,
            upload_timeout_secs: upload.timeout.as_secs(),
            min_upload_duration_secs: upload.min_duration_secs,
            capture_timeout_ms: 0,
        }
    }
}

impl Config {
    /// Load from `DWELL_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("DWELL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `lookup`. Unparsable values keep the prior value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("DWELL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("DWELL_CAPTURE_DIR") {
            self.capture_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DWELL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DWELL_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = lookup("DWELL_ORG_ID") {
            self.org_id = v;
        }
        if let Some(mode) = lookup("DWELL_MODE").as_deref().and_then(Mode::parse) {
            self.mode = mode;
        }

        override_parsed(&lookup, "DWELL_CAMERA_WIDTH", &mut self.camera_width);
        override_parsed(&lookup, "DWELL_CAMERA_HEIGHT", &mut self.camera_height);
        override_parsed(&lookup, "DWELL_SESSION_THRESHOLD_MS", &mut self.session_threshold_ms);
        override_parsed(&lookup, "DWELL_MATCH_THRESHOLD", &mut self.match_threshold);
        override_parsed(&lookup, "DWELL_LOG_CAPACITY", &mut self.log_capacity);
        override_parsed(&lookup, "DWELL_UPLOAD_TIMEOUT_SECS", &mut self.upload_timeout_secs);
        override_parsed(
            &lookup,
            "DWELL_MIN_UPLOAD_DURATION_SECS",
            &mut self.min_upload_duration_secs,
        );
        override_parsed(&lookup, "DWELL_CAPTURE_TIMEOUT_MS", &mut self.capture_timeout_ms);
    }

    pub fn uses_synthetic_camera(&self) -> bool {
        self.camera_device == "synthetic"
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            session_threshold_ms: self.session_threshold_ms,
            trigger: match self.mode {
                Mode::Local => TriggerMode::OnExit,
                Mode::Upload => TriggerMode::OnThreshold,
            },
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            api_base: self.api_base.clone(),
            org_id: self.org_id.clone(),
            timeout: Duration::from_secs(self.upload_timeout_secs),
            min_duration_secs: self.min_upload_duration_secs,
        }
    }

    pub fn capture_timeout(&self) -> Option<Duration> {
        (self.capture_timeout_ms > 0).then(|| Duration::from_millis(self.capture_timeout_ms))
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable config value"),
        }
    }
}
