//! # Fiscal Settings
//!
//! The `[fiscal]` section of the till configuration.
//!
//! ```toml
//! [fiscal]
//! enabled = true
//! auto_issue = true
//! base_url = "https://nfce.example.com/api/v1"
//! api_token = "..."
//! poll_interval_secs = 3
//! poll_timeout_secs = 120
//! request_timeout_secs = 15
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::{FiscalError, FiscalResult};
use crate::poller::PollerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalSettings {
    /// Whether settlements produce fiscal invoices at all.
    #[serde(default)]
    pub enabled: bool,

    /// Submit and start polling right after a settlement is confirmed.
    /// When false, invoices wait for a manual submit or a reprocess run.
    #[serde(default = "default_true")]
    pub auto_issue: bool,

    /// Base URL of the authority's REST API.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Wall-clock ceiling for one poll loop.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    3
}

fn default_poll_timeout() -> u64 {
    120
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for FiscalSettings {
    fn default() -> Self {
        FiscalSettings {
            enabled: false,
            auto_issue: default_true(),
            base_url: None,
            api_token: None,
            poll_interval_secs: default_poll_interval(),
            poll_timeout_secs: default_poll_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl FiscalSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval(),
            timeout: self.poll_timeout(),
        }
    }

    /// Parsed base URL. Required once fiscal issuance is enabled.
    pub fn base_url(&self) -> FiscalResult<Url> {
        let raw = self
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| FiscalError::Config("fiscal.base_url is not set".to_string()))?;
        let url = Url::parse(raw.trim())?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(FiscalError::Config(format!(
                "fiscal.base_url must be http or https, got '{}'",
                other
            ))),
        }
    }

    pub fn validate(&self) -> FiscalResult<()> {
        if self.poll_interval_secs == 0 {
            return Err(FiscalError::Config(
                "fiscal.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.poll_timeout_secs < self.poll_interval_secs {
            return Err(FiscalError::Config(
                "fiscal.poll_timeout_secs must not be shorter than the poll interval".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(FiscalError::Config(
                "fiscal.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.enabled {
            self.base_url()?;
        }
        Ok(())
    }
}
