//! Error types for wam-core

use thiserror::Error;

use crate::instance::InstanceId;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wam-core
#[derive(Error, Debug)]
pub enum Error {
    /// Launch request failed before an instance was registered
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Page engine or shell surface call failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Control loop is gone (channel closed, reply dropped)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

// =============================================================================
// Launch errors
// =============================================================================

/// Launch failures, reported to callers as an error code plus message.
///
/// A failed launch leaves no partial instance behind: nothing is inserted into
/// the registry and no version record is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The descriptor JSON could not be parsed or lacks an app id
    #[error("invalid application description: {0}")]
    InvalidDescriptor(String),

    /// No page engine is registered for the descriptor's app type
    #[error("unsupported application type: {0}")]
    UnsupportedType(String),

    /// The factory could not build a page engine for the app
    #[error("failed to create page engine for {app_id}: {reason}")]
    EngineCreateFailed { app_id: String, reason: String },

    /// An instance with this id is already registered
    #[error("instance {0} already registered")]
    DuplicateInstance(InstanceId),

    /// The instance id space is used up
    #[error("no instance ids left")]
    IdsExhausted,
}

impl LaunchError {
    /// Stable numeric code reported alongside the message.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::InvalidDescriptor(_) => -1,
            Self::UnsupportedType(_) => -2,
            Self::EngineCreateFailed { .. } => -3,
            Self::DuplicateInstance(_) => -4,
            Self::IdsExhausted => -5,
        }
    }

    /// Human-readable message reported alongside the code.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

// =============================================================================
// Config errors
// =============================================================================

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

// =============================================================================
// Engine errors
// =============================================================================

/// Failures reported by page engine and shell surface implementations.
///
/// The lifecycle layer never propagates these outward from suspend, resume or
/// teardown paths; they are logged and absorbed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine (or its render process) is gone
    #[error("page engine unavailable: {0}")]
    Unavailable(String),

    /// A specific call was rejected
    #[error("{op} failed: {reason}")]
    CallFailed { op: &'static str, reason: String },
}
