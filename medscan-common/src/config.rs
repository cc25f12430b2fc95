//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a TOML file. A missing file is not
//! fatal: the service warns and starts with built-in defaults. Command-line
//! arguments and environment variables override TOML values.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "MEDSCAN_CONFIG";

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "MEDSCAN_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "medscan.db";

/// Artifact root directory name inside the root folder
pub const STORAGE_DIR: &str = "storage";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database and artifact storage
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Origin used when building public artifact URLs
    ///
    /// When unset, the origin is derived from the request's Host header.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Request body limit for mask uploads
    #[serde(default = "default_max_mask_bytes")]
    pub max_mask_bytes: usize,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default = "ProcessConfig::default_classifier")]
    pub classifier: ProcessConfig,

    #[serde(default = "ProcessConfig::default_compositor")]
    pub compositor: ProcessConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: default_port(),
            bind_address: default_bind_address(),
            public_base_url: None,
            max_mask_bytes: default_max_mask_bytes(),
            logging: LoggingConfig::default(),
            classifier: ProcessConfig::default_classifier(),
            compositor: ProcessConfig::default_compositor(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// How to launch an external collaborator process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Executable to run (looked up in PATH when not absolute)
    pub program: String,

    /// Arguments placed before the per-call arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Hard limit on process run time; the process is killed on expiry
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts for crashed runs (1 disables retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl ProcessConfig {
    pub fn default_classifier() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["model/model_inference.py".to_string()],
            timeout_secs: 120,
            max_attempts: 2,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }

    pub fn default_compositor() -> Self {
        Self {
            program: "medscan-composite".to_string(),
            args: Vec::new(),
            timeout_secs: 60,
            max_attempts: 1,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::Config(format!("[{}] program must not be empty", section)));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(format!(
                "[{}] timeout_secs must be greater than zero",
                section
            )));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config(format!(
                "[{}] max_attempts must be at least 1",
                section
            )));
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    5780
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_max_mask_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl TomlConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.classifier.validate("classifier")?;
        self.compositor.validate("compositor")?;
        if self.max_mask_bytes == 0 {
            return Err(Error::Config("max_mask_bytes must be greater than zero".to_string()));
        }
        if let Some(base) = &self.public_base_url {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "public_base_url must start with http:// or https://: {}",
                    base
                )));
            }
        }
        Ok(())
    }
}

/// Load configuration with graceful degradation
///
/// Search order: explicit path, `MEDSCAN_CONFIG`, user config dir,
/// `/etc/medscan/medscan.toml`. If nothing is found, defaults are used.
/// A file that exists but cannot be parsed is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let candidate = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => std::env::var(CONFIG_ENV_VAR)
            .ok()
            .map(PathBuf::from)
            .or_else(find_config_file),
    };

    match candidate {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
            let config = TomlConfig::from_toml_str(&content)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Some(path) => {
            warn!(
                "Config file {} not found; using built-in defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            warn!("No config file found; using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Locate the default configuration file for the platform
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("medscan").join("medscan.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/medscan/medscan.toml");
    if cfg!(target_os = "linux") && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Root folder resolution priority:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("medscan"))
        .unwrap_or_else(|| PathBuf::from("./medscan_data"))
}

/// Database and storage locations derived from the root folder
#[derive(Debug, Clone)]
pub struct RootLayout {
    pub root_folder: PathBuf,
}

impl RootLayout {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn storage_root(&self) -> PathBuf {
        self.root_folder.join(STORAGE_DIR)
    }

    /// Create the root folder if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }
}
