//! Device properties and the host messages that broadcast their changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Device-info key holding the current UI language.
pub const SYSTEM_LANGUAGE: &str = "SystemLanguage";

/// Named device properties exposed to apps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceInfo {
    values: BTreeMap<String, String>,
}

impl DeviceInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `name`. True when the stored value changed.
    pub fn set(&mut self, name: &str, value: &str) -> bool {
        if self.values.get(name).is_some_and(|old| old == value) {
            return false;
        }
        self.values.insert(name.to_string(), value.to_string());
        true
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn system_language(&self) -> Option<&str> {
        self.get(SYSTEM_LANGUAGE)
    }
}

/// Message broadcast to every running app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WebAppMessage {
    /// The named device property changed.
    DeviceInfoChanged(String),
}

impl WebAppMessage {
    /// Build from the wire `(type, payload)` pair. Unknown types yield `None`.
    #[must_use]
    pub fn parse(kind: &str, payload: &str) -> Option<Self> {
        match kind {
            "deviceInfoChanged" | "DeviceInfoChanged" | "device_info_changed" => {
                Some(Self::DeviceInfoChanged(payload.to_string()))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for WebAppMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceInfoChanged(name) => write!(f, "device_info_changed({name})"),
        }
    }
}
