// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! File-based loading: environment overrides and file diagnostics.
//!
//! Tests that touch process environment run serially.

use std::io::Write;

use serial_test::serial;
use tollgate_config::diagnostic::ConfigError;
use tollgate_config::load_and_validate_path;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[test]
#[serial]
fn env_vars_override_file_values() {
    let file = write_config(
        r#"
[engine]
flush_interval_secs = 30

[log]
level = "info"
"#,
    );

    // SAFETY: serialized with every other env-mutating test in this binary.
    unsafe {
        std::env::set_var("TOLLGATE_ENGINE_FLUSH_INTERVAL_SECS", "7");
        std::env::set_var("TOLLGATE_LOG_LEVEL", "debug");
    }
    let loaded = load_and_validate_path(file.path());
    unsafe {
        std::env::remove_var("TOLLGATE_ENGINE_FLUSH_INTERVAL_SECS");
        std::env::remove_var("TOLLGATE_LOG_LEVEL");
    }

    let config = loaded.expect("config should load");
    assert_eq!(config.engine.flush_interval_secs, 7);
    assert_eq!(config.log.level, "debug");
}

#[test]
#[serial]
fn invalid_env_value_is_reported() {
    let file = write_config("");
    unsafe {
        std::env::set_var("TOLLGATE_ENGINE_FLUSH_INTERVAL_SECS", "0");
    }
    let loaded = load_and_validate_path(file.path());
    unsafe {
        std::env::remove_var("TOLLGATE_ENGINE_FLUSH_INTERVAL_SECS");
    }

    let errors = loaded.expect_err("zero interval should fail validation");
    assert!(errors.iter().any(|e| matches!(
        e,
        ConfigError::Validation { message } if message.contains("flush_interval_secs")
    )));
}

#[test]
#[serial]
fn unknown_key_in_file_is_diagnosed() {
    let content = "[engine]\ncurrency = \"EUR\"\ncache_discont = 0.25\n";
    let file = write_config(content);

    let errors = load_and_validate_path(file.path()).expect_err("typo should fail");
    let (span, suggestion) = errors
        .iter()
        .find_map(|e| match e {
            ConfigError::UnknownKey {
                key,
                span,
                suggestion,
                ..
            } if key == "cache_discont" => Some((*span, suggestion.clone())),
            _ => None,
        })
        .expect("unknown key diagnostic");

    assert_eq!(suggestion.as_deref(), Some("cache_discount"));
    // Figment only attributes the error to the file when the table came from it.
    if let Some(span) = span {
        assert_eq!(
            &content[span.offset()..span.offset() + span.len()],
            "cache_discont"
        );
    }
}
