//! # Till Configuration
//!
//! Everything the till needs to know about the machine it runs on.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     CAIXA_TERMINAL_ID=caixa-02                                          │
//! │     CAIXA_FISCAL_ENABLED=true                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/pdv/till.toml (Linux)                                     │
//! │     ~/Library/Application Support/br.caixa.pdv/till.toml (macOS)        │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! │     terminal "caixa-01", tolerance R$ 0,10, fiscal disabled             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [terminal]
//! id = "caixa-01"
//! name = "Balcão"
//!
//! [database]
//! path = "/var/lib/caixa/till.db"
//!
//! [settlement]
//! tolerance_cents = 10
//!
//! [fiscal]
//! enabled = true
//! base_url = "https://nfce.example.com/api/v1"
//! api_token = "..."
//! poll_interval_secs = 3
//! poll_timeout_secs = 120
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use caixa_core::money::{Money, DEFAULT_TOLERANCE};
use caixa_fiscal::{FiscalError, FiscalSettings};

// =============================================================================
// Config Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<FiscalError> for ConfigError {
    fn from(err: FiscalError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

/// The physical till this process drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_terminal_id")]
    pub id: String,

    /// Human-readable name shown on reports ("Balcão", "Caixa 2").
    #[serde(default = "default_terminal_name")]
    pub name: String,
}

fn default_terminal_id() -> String {
    "caixa-01".to_string()
}

fn default_terminal_name() -> String {
    "Caixa".to_string()
}

impl Default for TerminalConfig {
    fn default() -> Self {
        TerminalConfig {
            id: default_terminal_id(),
            name: default_terminal_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `till.db` in the platform data dir.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("br", "caixa", "pdv")
        .map(|dirs| dirs.data_dir().join("till.db"))
        .unwrap_or_else(|| PathBuf::from("till.db"))
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSettings {
    /// Remaining balance at or below this is written off and the order
    /// counts as settled.
    #[serde(default = "default_tolerance_cents")]
    pub tolerance_cents: i64,
}

fn default_tolerance_cents() -> i64 {
    DEFAULT_TOLERANCE.cents()
}

impl Default for SettlementSettings {
    fn default() -> Self {
        SettlementSettings {
            tolerance_cents: default_tolerance_cents(),
        }
    }
}

// =============================================================================
// Till Configuration
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TillConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub settlement: SettlementSettings,

    #[serde(default)]
    pub fiscal: FiscalSettings,
}

impl TillConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (till.toml)
    /// 3. `CAIXA_*` environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading till config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// The effective configuration, as a TOML document.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.terminal.id.trim().is_empty() {
            return Err(ConfigError::Invalid("terminal.id must not be empty".into()));
        }
        if self.settlement.tolerance_cents < 0 {
            return Err(ConfigError::Invalid(
                "settlement.tolerance_cents must not be negative".into(),
            ));
        }
        // Anything above R$ 1,00 forgives real money.
        if self.settlement.tolerance_cents > 100 {
            return Err(ConfigError::Invalid(
                "settlement.tolerance_cents must be at most 100".into(),
            ));
        }
        self.fiscal.validate()?;
        Ok(())
    }

    pub fn tolerance(&self) -> Money {
        Money::from_cents(self.settlement.tolerance_cents)
    }

    /// Applies `CAIXA_*` overrides read through `lookup`.
    ///
    /// Unparsable numbers and booleans are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("CAIXA_TERMINAL_ID") {
            debug!(terminal_id = %id, "Overriding terminal id from environment");
            self.terminal.id = id;
        }

        if let Some(path) = lookup("CAIXA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(raw) = lookup("CAIXA_TOLERANCE_CENTS") {
            match raw.trim().parse::<i64>() {
                Ok(cents) => self.settlement.tolerance_cents = cents,
                Err(_) => warn!(value = %raw, "Ignoring CAIXA_TOLERANCE_CENTS"),
            }
        }

        if let Some(raw) = lookup("CAIXA_FISCAL_ENABLED") {
            match parse_flag(&raw) {
                Some(enabled) => self.fiscal.enabled = enabled,
                None => warn!(value = %raw, "Ignoring CAIXA_FISCAL_ENABLED"),
            }
        }

        if let Some(url) = lookup("CAIXA_FISCAL_URL") {
            debug!(url = %url, "Overriding fiscal URL from environment");
            self.fiscal.base_url = Some(url);
        }

        if let Some(token) = lookup("CAIXA_FISCAL_TOKEN") {
            self.fiscal.api_token = Some(token);
        }

        if let Some(raw) = lookup("CAIXA_POLL_INTERVAL_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.fiscal.poll_interval_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring CAIXA_POLL_INTERVAL_SECS"),
            }
        }

        if let Some(raw) = lookup("CAIXA_POLL_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.fiscal.poll_timeout_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring CAIXA_POLL_TIMEOUT_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("br", "caixa", "pdv")
            .map(|dirs| dirs.config_dir().join("till.toml"))
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
