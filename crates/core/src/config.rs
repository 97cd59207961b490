//! TOML-based configuration for odksync.
//!
//! Every section is optional; a missing file section falls back to its
//! defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

/// Tracing levels accepted in `app.log_level`.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,

    /// How column names and values are shown.
    #[serde(default)]
    pub display: DisplayConfig,

    /// Resolution workflow settings.
    #[serde(default)]
    pub resolution: ResolutionConfig,
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    /// ODK app name; each app gets its own database.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Directory holding the per-app databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_app_name() -> String {
    "default".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/odksync")
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Locale used to pick localized display names, e.g. `en_US`.
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    "en_US".into()
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            locale: default_locale(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Ask before committing a resolution.
    #[serde(default = "default_true")]
    pub require_confirmation: bool,

    /// Save unfinished selections so they can be resumed.
    #[serde(default = "default_true")]
    pub persist_selection: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            require_confirmation: true,
            persist_selection: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let app_name = self.app.app_name.trim();
        if app_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "app.app_name".into(),
                detail: "app name must not be empty".into(),
            });
        }
        if app_name.contains(['/', '\\']) || app_name == "." || app_name == ".." {
            return Err(ConfigError::InvalidValue {
                field: "app.app_name".into(),
                detail: "app name must be a single path component".into(),
            });
        }
        if !LOG_LEVELS.contains(&self.app.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "app.log_level".into(),
                detail: format!(
                    "'{}' is not one of {}",
                    self.app.log_level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        if self.display.locale.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "display.locale".into(),
                detail: "locale must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Database file of the configured app.
    pub fn database_path(&self) -> PathBuf {
        self.app
            .data_dir
            .join(&self.app.app_name)
            .join("odksync.db")
    }

    /// Render as TOML, e.g. for `odksync init`.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}
