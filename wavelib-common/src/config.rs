//! Bootstrap configuration loading and library folder resolution
//!
//! The TOML file is optional. A missing file yields defaults with a warning;
//! a file that exists but does not parse is a startup error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

/// Default bind address
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default throttle window for progress notifications
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Library directory holding `<id>.json` + `<id>.wav` pairs
    #[serde(default)]
    pub library_path: Option<PathBuf>,

    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// External downloader configuration
    #[serde(default)]
    pub downloader: DownloaderConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// External downloader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Explicit yt-dlp binary. When unset the binary lives in the library folder.
    #[serde(default)]
    pub binary: Option<PathBuf>,

    /// Fetch the latest yt-dlp release into the library folder when missing
    #[serde(default = "default_true")]
    pub auto_install: bool,

    /// Minimum interval between progress notifications per job
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_progress_interval_ms() -> u64 {
    DEFAULT_PROGRESS_INTERVAL_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            host: default_host(),
            port: default_port(),
            downloader: DownloaderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            binary: None,
            auto_install: true,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Read the bootstrap TOML file, `None` if it does not exist
///
/// Does not log, so it can run before the tracing subscriber is installed.
/// Unreadable or malformed file → `Error::Config`.
pub fn read_toml_config(path: &Path) -> Result<Option<TomlConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    Ok(Some(config))
}

/// Load the bootstrap TOML file
///
/// Missing file → warning + defaults. Unreadable or malformed file → `Error::Config`.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    match read_toml_config(path)? {
        Some(config) => {
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
    }
}

/// Write a TOML config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Platform config file location: `<config dir>/wavelib/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("wavelib").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("wavelib.toml"))
}

/// Library folder resolution, highest priority first:
/// 1. Command-line argument / environment variable (`cli_arg`)
/// 2. TOML config file
/// 3. OS-dependent compiled default
pub fn resolve_library_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Some(path) = &config.library_path {
        return path.clone();
    }

    default_library_folder()
}

/// OS-dependent default library folder
pub fn default_library_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("wavelib").join("library"))
        .unwrap_or_else(|| PathBuf::from("./wavelib_data/library"))
}
