//! Host configuration.
//!
//! [`WamConfig`] is read from a TOML file and then overlaid with the
//! platform's environment variables:
//!
//! | Variable | Field | Notes |
//! |----------|-------|-------|
//! | `WAM_SUSPEND_DELAY_IN_MS` | `suspend_delay_ms` | clamped to at least 1 |
//! | `WAM_KEEP_RTC_CONNECTIONS_ON_SUSPEND` | `keep_rtc_connections_on_suspend` | `"1"` keeps peer connections |
//! | `WAM_CLOSE_CALLBACK_TIMEOUT_MS` | `close_callback_timeout_ms` | |
//! | `WAM_ERROR_PAGE` | `error_page_url` | empty clears it |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crash::CrashResetPolicy;
use crate::error::ConfigError;
use crate::logging::LogConfig;

pub const ENV_SUSPEND_DELAY: &str = "WAM_SUSPEND_DELAY_IN_MS";
pub const ENV_KEEP_RTC_CONNECTIONS: &str = "WAM_KEEP_RTC_CONNECTIONS_ON_SUSPEND";
pub const ENV_CLOSE_CALLBACK_TIMEOUT: &str = "WAM_CLOSE_CALLBACK_TIMEOUT_MS";
pub const ENV_ERROR_PAGE: &str = "WAM_ERROR_PAGE";

/// Smallest deferred DOM-suspend delay.
pub const MIN_SUSPEND_DELAY_MS: u64 = 1;
/// Grace period for an app's `onclose` callback.
pub const DEFAULT_CLOSE_CALLBACK_TIMEOUT_MS: u64 = 10_000;
/// First instance id handed out by a fresh host.
pub const DEFAULT_INSTANCE_ID_BASE: u64 = 1000;

// =============================================================================
// Instance policy
// =============================================================================

/// Whether a second launch of a running app relaunches it or starts another
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstancePolicy {
    /// One instance per app id; repeated launches relaunch it.
    #[default]
    Single,
    /// Every launch creates a fresh instance.
    Multi,
}

impl std::fmt::Display for InstancePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

// =============================================================================
// WamConfig
// =============================================================================

/// Lifecycle host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WamConfig {
    /// Delay between hiding an app and suspending its DOM/script execution.
    pub suspend_delay_ms: u64,
    /// How long a registered close callback may run before forced unload.
    pub close_callback_timeout_ms: u64,
    /// First instance id; ids increase from here and are never reused.
    pub instance_id_base: u64,
    pub instance_policy: InstancePolicy,
    pub crash_reset_policy: CrashResetPolicy,
    /// Keep WebRTC peer connections alive while suspended.
    pub keep_rtc_connections_on_suspend: bool,
    /// Platform error page shown on load failure. `None` leaves the failed
    /// page as the engine rendered it.
    pub error_page_url: Option<String>,
    pub log: LogConfig,
}

impl Default for WamConfig {
    fn default() -> Self {
        Self {
            suspend_delay_ms: MIN_SUSPEND_DELAY_MS,
            close_callback_timeout_ms: DEFAULT_CLOSE_CALLBACK_TIMEOUT_MS,
            instance_id_base: DEFAULT_INSTANCE_ID_BASE,
            instance_policy: InstancePolicy::Single,
            crash_reset_policy: CrashResetPolicy::GlobalOnClose,
            keep_rtc_connections_on_suspend: false,
            error_page_url: None,
            log: LogConfig::default(),
        }
    }
}

impl WamConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Read a TOML file and overlay the process environment.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay environment values supplied by `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_SUSPEND_DELAY) {
            let delay: i64 = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_SUSPEND_DELAY.to_string(),
                value: raw.clone(),
            })?;
            self.suspend_delay_ms = delay.max(MIN_SUSPEND_DELAY_MS as i64) as u64;
        }

        if let Some(raw) = lookup(ENV_KEEP_RTC_CONNECTIONS) {
            self.keep_rtc_connections_on_suspend = raw.trim() == "1";
        }

        if let Some(raw) = lookup(ENV_CLOSE_CALLBACK_TIMEOUT) {
            self.close_callback_timeout_ms =
                raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    key: ENV_CLOSE_CALLBACK_TIMEOUT.to_string(),
                    value: raw.clone(),
                })?;
        }

        if let Some(raw) = lookup(ENV_ERROR_PAGE) {
            let raw = raw.trim();
            self.error_page_url = (!raw.is_empty()).then(|| raw.to_string());
        }

        Ok(())
    }

    /// Effective DOM-suspend delay, never below [`MIN_SUSPEND_DELAY_MS`].
    #[must_use]
    pub fn suspend_delay(&self) -> Duration {
        Duration::from_millis(self.suspend_delay_ms.max(MIN_SUSPEND_DELAY_MS))
    }

    #[must_use]
    pub fn close_callback_timeout(&self) -> Duration {
        Duration::from_millis(self.close_callback_timeout_ms)
    }
}
