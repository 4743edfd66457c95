//! Application descriptors and launch parameters.
//!
//! The descriptor is the immutable metadata the app manager hands over with
//! every launch (id, entry URL, window type, trust level, version). Launch
//! parameters are the free-form JSON object that accompanies a launch or
//! relaunch; only the deep-link and preload keys are interpreted here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::LaunchError;

/// App type served by the built-in page engine when a descriptor omits `type`.
pub const DEFAULT_APP_TYPE: &str = "web";

// =============================================================================
// Window type
// =============================================================================

/// Presentation category of an app's surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    #[default]
    Card,
    Overlay,
    Popup,
    Minimal,
    Floating,
    SystemUi,
}

impl WindowType {
    /// Parse the descriptor's `defaultWindowType`. Unknown strings are cards.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "overlay" => Self::Overlay,
            "popup" => Self::Popup,
            "minimal" => Self::Minimal,
            "floating" => Self::Floating,
            "system_ui" => Self::SystemUi,
            _ => Self::Card,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Overlay => "overlay",
            Self::Popup => "popup",
            Self::Minimal => "minimal",
            Self::Floating => "floating",
            Self::SystemUi => "system_ui",
        }
    }

    /// Only floating windows may keep running while hidden.
    #[must_use]
    pub const fn allows_background_run(self) -> bool {
        matches!(self, Self::Floating)
    }
}

impl std::fmt::Display for WindowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Load error policy
// =============================================================================

/// What to do when the main frame fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadErrorPolicy {
    /// Show the platform error page.
    #[default]
    ErrorPage,
    /// Dispatch a `webOSLoadError` event and let the app handle it.
    Event,
}

impl LoadErrorPolicy {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "event" {
            Self::Event
        } else {
            Self::ErrorPage
        }
    }
}

// =============================================================================
// App descriptor
// =============================================================================

fn default_trust_level() -> String {
    "default".to_string()
}

fn default_app_type() -> String {
    DEFAULT_APP_TYPE.to_string()
}

/// Immutable application metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDescriptor {
    pub id: String,
    /// Entry URL loaded as the app's default page.
    #[serde(alias = "entryPoint")]
    pub main: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_trust_level")]
    pub trust_level: String,
    #[serde(rename = "type", default = "default_app_type")]
    pub app_type: String,
    #[serde(default)]
    pub default_window_type: String,
    #[serde(default)]
    pub handles_deeplinking: bool,
    #[serde(default)]
    pub enable_background_run: bool,
    #[serde(default)]
    pub load_error_policy: String,
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default)]
    pub surface_role: u32,
    #[serde(default)]
    pub panel_type: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl AppDescriptor {
    /// Parse a descriptor from the launch request JSON.
    pub fn from_json(json: &str) -> Result<Self, LaunchError> {
        let desc: Self = serde_json::from_str(json)
            .map_err(|e| LaunchError::InvalidDescriptor(e.to_string()))?;
        if desc.id.trim().is_empty() {
            return Err(LaunchError::InvalidDescriptor("empty app id".to_string()));
        }
        Ok(desc)
    }

    #[must_use]
    pub fn window_type(&self) -> WindowType {
        WindowType::parse(&self.default_window_type)
    }

    #[must_use]
    pub fn load_error_policy(&self) -> LoadErrorPolicy {
        LoadErrorPolicy::parse(&self.load_error_policy)
    }

    /// Background run is honoured for floating windows only.
    #[must_use]
    pub fn background_run(&self) -> bool {
        self.window_type().allows_background_run() && self.enable_background_run
    }
}

/// True when `url` parses with the `file` scheme.
#[must_use]
pub fn is_file_url(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| u.scheme() == "file")
}

// =============================================================================
// Launch parameters
// =============================================================================

/// Who resolves a deep-link `contentTarget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepLinkHandler {
    /// Load the target URL directly.
    Platform,
    /// Deliver it to the running page as an ordinary relaunch.
    App,
    /// Reload the default page (also used for absent or unknown values).
    Default,
}

/// Launch parameters as a JSON object.
///
/// Anything that is not a JSON object (including malformed text) is treated
/// as an empty object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LaunchParams {
    fields: Map<String, Value>,
}

impl LaunchParams {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(fields)) => Self { fields },
            _ => Self::default(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn content_target(&self) -> Option<&str> {
        self.fields.get("contentTarget").and_then(Value::as_str)
    }

    #[must_use]
    pub fn handled_by(&self) -> DeepLinkHandler {
        match self.fields.get("handledBy").and_then(Value::as_str) {
            Some("platform") => DeepLinkHandler::Platform,
            Some("app") => DeepLinkHandler::App,
            _ => DeepLinkHandler::Default,
        }
    }

    /// `preload` counts only when it is a string.
    #[must_use]
    pub fn preload(&self) -> Option<&str> {
        self.fields.get("preload").and_then(Value::as_str)
    }

    #[must_use]
    pub fn launched_hidden(&self) -> bool {
        self.fields
            .get("launchedHidden")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Instance id the caller believes it is relaunching, if any.
    #[must_use]
    pub fn instance_id(&self) -> Option<String> {
        match self.fields.get("instanceId")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// JSON text handed to page scripts as the event `detail`.
    #[must_use]
    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}
