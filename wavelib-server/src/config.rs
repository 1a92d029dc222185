//! Server settings resolution
//!
//! Priority for every setting: command line / environment → TOML file →
//! compiled default.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use wavelib_common::config::{
    default_config_path, read_toml_config, resolve_library_folder, DownloaderConfig,
};
use wavelib_common::{Error, Result};

/// Command-line arguments for wavelib
#[derive(Parser, Debug, Default)]
#[command(name = "wavelib")]
#[command(about = "Local audio library built from video URLs")]
#[command(version)]
pub struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "WAVELIB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Library folder holding audio and metadata files
    #[arg(short, long, env = "WAVELIB_LIBRARY")]
    pub library: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "WAVELIB_PORT")]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "WAVELIB_HOST")]
    pub host: Option<String>,
}

/// Fully resolved runtime settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Config file consulted, whether or not it existed
    pub config_path: PathBuf,
    /// False when the config file was missing and defaults were used
    pub config_loaded: bool,
    pub library_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub downloader: DownloaderConfig,
    pub log_level: String,
}

impl ServerSettings {
    /// Merge command-line arguments with the TOML config file
    ///
    /// Runs before logging is set up, so nothing is logged here; see
    /// `log_summary`.
    pub fn resolve(args: &Args) -> Result<Self> {
        let config_path = args.config.clone().unwrap_or_else(default_config_path);
        let toml_config = read_toml_config(&config_path)?;
        let config_loaded = toml_config.is_some();
        let toml_config = toml_config.unwrap_or_default();

        let library_path = resolve_library_folder(args.library.as_deref(), &toml_config);
        let host = args.host.clone().unwrap_or(toml_config.host);
        let port = args.port.unwrap_or(toml_config.port);

        if toml_config.downloader.progress_interval_ms == 0 {
            return Err(Error::Config(
                "downloader.progress_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            config_path,
            config_loaded,
            library_path,
            host,
            port,
            downloader: toml_config.downloader,
            log_level: toml_config.logging.level,
        })
    }

    /// Report where the settings came from, once tracing is installed
    pub fn log_summary(&self) {
        if self.config_loaded {
            info!("Loaded configuration from {}", self.config_path.display());
        } else {
            warn!(
                "Config file {} not found, using built-in defaults",
                self.config_path.display()
            );
        }
        info!("Library folder: {}", self.library_path.display());
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.downloader.progress_interval_ms)
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub fn log_filter(&self) -> String {
        let level = &self.log_level;
        format!(
            "wavelib_server={level},wavelib_common={level},tower_http={level}"
        )
    }
}
