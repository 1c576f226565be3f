use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    ReadFailed(std::io::Error),

    #[error("failed to write config file: {0}")]
    WriteFailed(std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no config path available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub probe: Probe,
    pub scheduler: Scheduler,
    pub alert: Alert,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    /// Path of the local libsql database file.
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Probe {
    /// Upper bound on one whole probe (DNS through body read), in seconds.
    pub timeout_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Scheduler {
    /// How often the monitor registry is re-read and reconciled, in seconds.
    pub reload_interval_seconds: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Alert {
    /// Webhook endpoint for downtime notifications. When unset, downtime is
    /// only logged.
    pub webhook_url: Option<String>,
}

impl Default for Database {
    fn default() -> Self {
        Self { path: "uptimer.db".into() }
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self { timeout_seconds: 30 }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self { reload_interval_seconds: 60 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: Database::default(),
            probe: Probe::default(),
            scheduler: Scheduler::default(),
            alert: Alert::default(),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uptimer/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("uptimer/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current Internal Configuration State:")?;
        writeln!(f, "  Database")?;
        writeln!(f, "    Path: {}", self.database.path)?;
        writeln!(f, "  Probe")?;
        writeln!(f, "    Timeout: {}s", self.probe.timeout_seconds)?;
        writeln!(f, "  Scheduler")?;
        writeln!(f, "    Reload Interval: {}s", self.scheduler.reload_interval_seconds)?;
        writeln!(f, "  Alert")?;
        writeln!(
            f,
            "    Webhook: {}",
            self.alert.webhook_url.as_deref().unwrap_or("(log only)")
        )?;
        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uptimer/config.toml
    /// or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        fs::write(path, config_str).map_err(Error::WriteFailed)
    }
}
