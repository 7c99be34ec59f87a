//! Integration tests for logging system

use bridge_traits::time::{ConsoleLogger, LogLevel};
use core_runtime::Error;
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};
use std::sync::Arc;

#[test]
fn test_logging_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}

#[test]
fn test_redaction_of_session_material() {
    assert_eq!(redact_if_sensitive("cookie", "wr_skey=abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("wr_skey", "abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("access_token", "t0k3n"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("Authorization", "Bearer x"), "[REDACTED]");
}

#[test]
fn test_redaction_keeps_ordinary_fields() {
    assert_eq!(redact_if_sensitive("job_key", "weRead:b1"), "weRead:b1");
    assert_eq!(redact_if_sensitive("source", "dedao"), "dedao");
    assert_eq!(redact_if_sensitive("attempt", "2"), "2");
}

#[test]
fn test_format_selection() {
    #[cfg(debug_assertions)]
    assert_eq!(LoggingConfig::default().format, LogFormat::Pretty);

    #[cfg(not(debug_assertions))]
    assert_eq!(LoggingConfig::default().format, LogFormat::Json);
}

#[test]
fn test_invalid_custom_filter_is_rejected() {
    let config = LoggingConfig::default().with_filter("core_sync=notalevel");
    assert!(init_logging(config).is_err());
}

#[test]
fn test_global_subscriber_installs_once() {
    // Only one global subscriber per process; the second call must fail cleanly
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_logger_sink(Arc::new(ConsoleLogger::default()));

    let first = init_logging(config.clone());
    let second = init_logging(config);

    assert!(first.is_ok());
    assert!(matches!(second, Err(Error::LoggingInit(_))));
    tracing::info!(job_key = "goodLinks:a1", "logging installed");
}
