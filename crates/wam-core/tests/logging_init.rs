//! Global subscriber installation.
//!
//! Lives in its own test binary: the subscriber is process-wide, so the first
//! install here must not race with any other test.

use wam_core::logging::{LogConfig, LogError, LogFormat, init_logging, is_logging_initialized};

#[test]
fn second_init_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("wam.log");
    let config = LogConfig {
        level: "debug".to_string(),
        format: LogFormat::Json,
        file: Some(path.clone()),
    };

    assert!(!is_logging_initialized());
    init_logging(&config).unwrap();
    assert!(is_logging_initialized());
    assert!(path.exists());

    let again = init_logging(&LogConfig::default());
    assert!(matches!(again, Err(LogError::AlreadyInitialized)));
    assert!(is_logging_initialized());
}
