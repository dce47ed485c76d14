use cairn_core::DEFAULT_MAX_BACKUPS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: String },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config validation error: {field} - {reason}")]
    Validation { field: String, reason: String },
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub backups: BackupConfig,
    pub api: ApiConfig,
    pub overlay: OverlayConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub on_exit: bool,
    pub before_updates: bool,
    pub max_backups: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            on_exit: true,
            before_updates: true,
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7472".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OverlayConfig {
    pub websocket_port: u16,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            websocket_port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PathsConfig {
    /// User data root. Defaults to the platform data directory.
    pub data_dir: Option<PathBuf>,
    /// Packaged default config files (hotkeys.json, ...).
    pub defaults_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Loads a TOML config file. A missing or unparsable file is an error;
    /// missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::NotFound {
            path: path.display().to_string(),
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path: must load. No path: built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backups.max_backups == 0 {
            return Err(ConfigError::Validation {
                field: "backups.max_backups".into(),
                reason: "must keep at least one backup".into(),
            });
        }
        if self.overlay.websocket_port == 0 {
            return Err(ConfigError::Validation {
                field: "overlay.websocket_port".into(),
                reason: "port must be > 0".into(),
            });
        }
        if self.api.addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation {
                field: "api.addr".into(),
                reason: format!("'{}' is not a host:port address", self.api.addr),
            });
        }
        Ok(())
    }
}
