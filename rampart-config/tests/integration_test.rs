//! Integration tests for rampart-config

use rampart_config::*;
use rampart_core::logging::LogLevel;
use rampart_core::{ErrorKind, Resilience, ResilienceEngine, OperationError, AI_PROFILE};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{Builder, NamedTempFile};

fn temp_file(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_toml_file() {
    let file = temp_file(
        ".toml",
        r#"
        [profiles.ai]
        timeout_ms = 45000

        [profiles.ai.circuit_breaker]
        failure_threshold = 3
        reset_timeout_ms = 10000

        [profiles.ai.retry]
        max_attempts = 2
        retry_on = ["transient", "rate_limit"]

        [logging]
        level = "debug"
        format = "compact"
        "#,
    );

    let manager = ConfigManager::new();
    manager.load_file(file.path()).unwrap();
    let settings = manager.settings().unwrap();

    assert_eq!(settings.logging.as_ref().unwrap().level, LogLevel::Debug);

    let registry = settings.to_registry().unwrap();
    let ai = registry.get(AI_PROFILE).unwrap();
    assert_eq!(ai.timeout.unwrap().duration, Duration::from_secs(45));
    assert_eq!(ai.circuit_breaker.unwrap().failure_threshold, 3);

    let retry = ai.retry.unwrap();
    assert_eq!(retry.max_attempts, 2);
    assert!(retry.is_retryable(ErrorKind::RateLimit));
    assert!(!retry.is_retryable(ErrorKind::Timeout));

    // Sections absent from the file are disabled for an overridden profile.
    assert!(ai.bulkhead.is_none());
}

#[test]
fn test_load_json_file_then_env() {
    let file = temp_file(
        ".json",
        r#"{
            "builtin_profiles": false,
            "profiles": {
                "billing": {
                    "bulkhead": {"max_concurrent": 4, "max_queue": 8, "max_wait_ms": 250},
                    "timeout_ms": 1500
                }
            }
        }"#,
    );

    let manager = ConfigManager::new();
    manager.load_file(file.path()).unwrap();
    manager.load_env_from([
        ("RAMPART__PROFILES__BILLING__TIMEOUT_MS", "900"),
        ("RAMPART__PROFILES__BILLING__RETRY__BACKOFF", "fixed"),
        ("UNRELATED", "ignored"),
    ]);

    let registry = manager.build_registry().unwrap();
    assert_eq!(registry.names(), vec!["billing"]);

    let billing = registry.get("billing").unwrap();
    assert_eq!(billing.timeout.unwrap().duration, Duration::from_millis(900));
    assert_eq!(
        billing.bulkhead.unwrap().max_wait,
        Some(Duration::from_millis(250))
    );
    assert_eq!(billing.retry.unwrap().base_delay, Duration::from_millis(100));
}

#[test]
fn test_dotenv_file() {
    let file = temp_file(
        ".env",
        "RAMPART_DOTENV_IT__PROFILES__REPORTS__TIMEOUT_MS=333\n\
         RAMPART_DOTENV_IT__PROFILES__REPORTS__RETRY__JITTER=0.5\n",
    );

    let manager = ConfigManager::with_prefix("RAMPART_DOTENV_IT");
    manager.load_dotenv(Some(file.path())).unwrap();

    let profile: ProfileSettings = manager.get("profiles.reports").unwrap();
    assert_eq!(profile.timeout_ms, Some(333));
    assert_eq!(profile.retry.unwrap().jitter, 0.5);
}

#[test]
fn test_file_errors() {
    let manager = ConfigManager::new();

    assert!(matches!(
        manager.load_file("/nonexistent/rampart.toml"),
        Err(ConfigError::Io(_))
    ));
    assert!(matches!(
        manager.load_file("rampart.yaml"),
        Err(ConfigError::LoadError(_))
    ));
    assert!(matches!(
        manager.load_dotenv(Some(std::path::Path::new("/nonexistent/.env"))),
        Err(ConfigError::LoadError(_))
    ));

    let broken = temp_file(".json", "{ not json");
    assert!(matches!(
        manager.load_file(broken.path()),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_unknown_key_rejected() {
    let manager = ConfigManager::new();
    manager.set("profiles.ai.retries", 3).unwrap();

    assert!(matches!(
        manager.settings(),
        Err(ConfigError::DeserializationError(_))
    ));
}

#[test]
fn test_config_error_display() {
    let err = ConfigError::ParseError("bad toml".to_string());
    assert!(err.to_string().contains("bad toml"));

    let err = ConfigError::from(rampart_core::PolicyError::ProfileNotFound("x".to_string()));
    assert!(err.to_string().contains("x"));
}

#[test]
fn test_configured_engine_runs_operation() {
    let manager = ConfigManager::new();
    manager
        .load_str(
            r#"
            [profiles.quick]
            timeout_ms = 1000

            [profiles.quick.retry]
            max_attempts = 3
            backoff = "fixed"
            base_delay_ms = 1
            "#,
            FileFormat::Toml,
        )
        .unwrap();
    let engine = ResilienceEngine::with_registry(manager.build_registry().unwrap());

    let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter = attempts.clone();
    let policy: Resilience<&str, OperationError> = engine.policy("reports.render", "quick").unwrap();

    let result = tokio_test::block_on(policy.call(move || {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
                Err(OperationError::transient("warming up"))
            } else {
                Ok("rendered")
            }
        }
    }));

    assert_eq!(result.unwrap(), "rendered");
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
}
