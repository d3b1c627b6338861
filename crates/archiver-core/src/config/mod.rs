//! Configuration parsing and management.
//!
//! The archiver reads a single TOML file with three sections:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! base_path = "/api-tasks"
//! request_timeout_secs = 4
//!
//! [limits]
//! max_active_tasks = 3
//! max_files_per_task = 3
//! max_concurrent_files_per_task = 3
//!
//! [fetch]
//! timeout_secs = 30
//! max_file_bytes = 67108864
//! ```
//!
//! Every field is optional; omitted fields take the defaults shown above.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of tasks that may be active at once.
pub const DEFAULT_MAX_ACTIVE_TASKS: usize = 3;

/// Default number of files that complete a task.
pub const DEFAULT_MAX_FILES_PER_TASK: usize = 3;

/// Default number of file additions that may run concurrently for one task.
pub const DEFAULT_MAX_CONCURRENT_FILES_PER_TASK: usize = 3;

/// Default upper bound on a single fetched file (64 MiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 64 * 1024 * 1024;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for [`ArchiverConfig`].
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered back to TOML.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Top-level archiver configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiverConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission limits for the task registry.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Remote fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl ArchiverConfig {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-field and range constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.limits.validate()?;
        self.fetch.validate()
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,

    /// TCP port to bind.
    pub port: u16,

    /// Prefix for every task route, e.g. `/api-tasks`.
    pub base_path: String,

    /// Deadline applied to each registry operation issued by a request.
    pub request_timeout_secs: u64,

    /// How long in-flight requests may run after a shutdown signal.
    pub shutdown_grace_secs: u64,

    /// Directory that relative archive paths are resolved against.
    ///
    /// When unset, relative paths resolve against the daemon's working
    /// directory.
    pub archive_root: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_path: "/api-tasks".to_string(),
            request_timeout_secs: 4,
            shutdown_grace_secs: 5,
            archive_root: None,
        }
    }
}

impl ServerConfig {
    /// Per-request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Grace period granted to in-flight requests during shutdown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// `host:port` string suitable for binding a listener.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.host must not be empty".to_string(),
            ));
        }
        if !self.base_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "server.base_path must start with '/', got {:?}",
                self.base_path
            )));
        }
        if self.base_path.len() > 1 && self.base_path.ends_with('/') {
            return Err(ConfigError::Validation(format!(
                "server.base_path must not end with '/', got {:?}",
                self.base_path
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "server.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Admission limits enforced by the task registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Tasks that may be created and not yet completed at any moment.
    pub max_active_tasks: usize,

    /// Successful file additions that complete a task.
    pub max_files_per_task: usize,

    /// File additions that may be fetching or writing at once for one task.
    pub max_concurrent_files_per_task: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_active_tasks: DEFAULT_MAX_ACTIVE_TASKS,
            max_files_per_task: DEFAULT_MAX_FILES_PER_TASK,
            max_concurrent_files_per_task: DEFAULT_MAX_CONCURRENT_FILES_PER_TASK,
        }
    }
}

impl LimitsConfig {
    fn validate(self) -> Result<(), ConfigError> {
        let fields = [
            ("limits.max_active_tasks", self.max_active_tasks),
            ("limits.max_files_per_task", self.max_files_per_task),
            (
                "limits.max_concurrent_files_per_task",
                self.max_concurrent_files_per_task,
            ),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "{name} must be at least 1"
                )));
            }
            if value > tokio::sync::Semaphore::MAX_PERMITS {
                return Err(ConfigError::Validation(format!(
                    "{name} must not exceed {}",
                    tokio::sync::Semaphore::MAX_PERMITS
                )));
            }
        }
        Ok(())
    }
}

/// Remote fetch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// TCP/TLS connect timeout.
    pub connect_timeout_secs: u64,

    /// Total timeout for one fetch, including the body.
    pub timeout_secs: u64,

    /// Largest body accepted for a single file.
    pub max_file_bytes: u64,

    /// `User-Agent` header sent with every fetch.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            timeout_secs: 30,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            user_agent: format!("archiver/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl FetchConfig {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Total fetch timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "fetch timeouts must be at least 1 second".to_string(),
            ));
        }
        if self.max_file_bytes == 0 {
            return Err(ConfigError::Validation(
                "fetch.max_file_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
