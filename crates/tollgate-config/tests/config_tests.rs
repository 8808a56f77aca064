// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Tollgate configuration system.

use tollgate_config::diagnostic::ConfigError;
use tollgate_config::model::TollgateConfig;
use tollgate_config::{load_and_validate_str, load_config_from_str};
use tollgate_core::PeriodKind;

/// Valid TOML with all known sections deserializes successfully.
#[test]
fn valid_toml_deserializes_into_tollgate_config() {
    let toml = r#"
[engine]
currency = "EUR"
cache_discount = 0.9
flush_interval_secs = 15
flush_failure_escalation = 5
history_retention_days = 30

[pricing.models."acme-large"]
input_per_mtok = 4.0
output_per_mtok = 12.0
cache_discount = 0.75

[[budgets]]
name = "global-monthly"
limit = 500.0
period = "monthly"

[[budgets]]
name = "alice-daily"
limit = 5.0
period = "daily"
thresholds = [50, 100]
user_id = "alice"
hard_limit = true

[analytics]
trend_period = "weekly"
trend_periods = 4
anomaly_z_threshold = 3.0

[storage]
database_path = "/tmp/tollgate-test.db"
wal_mode = false

[log]
level = "debug"
json = true

[prometheus]
enabled = true
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.engine.currency, "EUR");
    assert!((config.engine.cache_discount - 0.9).abs() < f64::EPSILON);
    assert_eq!(config.engine.flush_interval_secs, 15);
    assert_eq!(config.engine.flush_failure_escalation, 5);
    assert_eq!(config.engine.history_retention_days, Some(30));

    let acme = &config.pricing.models["acme-large"];
    assert!((acme.input_per_mtok - 4.0).abs() < f64::EPSILON);
    assert_eq!(acme.cache_discount, Some(0.75));
    // Shipped defaults are kept alongside additions.
    assert!(config.pricing.models.contains_key("gpt-4o-mini"));

    assert_eq!(config.budgets.len(), 2);
    assert_eq!(config.budgets[0].period, PeriodKind::Monthly);
    assert_eq!(config.budgets[0].thresholds, vec![75.0, 90.0, 100.0]);
    assert!(!config.budgets[0].hard_limit);
    assert_eq!(config.budgets[1].user_id.as_deref(), Some("alice"));
    assert_eq!(config.budgets[1].thresholds, vec![50.0, 100.0]);
    assert!(config.budgets[1].hard_limit);

    assert_eq!(config.analytics.trend_period, PeriodKind::Weekly);
    assert_eq!(config.analytics.trend_periods, 4);
    assert_eq!(config.storage.database_path, "/tmp/tollgate-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.log.level, "debug");
    assert!(config.log.json);
    assert!(config.prometheus.enabled);
}

/// Missing optional sections use defaults without error.
#[test]
fn missing_optional_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should use defaults");

    assert_eq!(config.engine.currency, "USD");
    assert!((config.engine.cache_discount - 0.5).abs() < f64::EPSILON);
    assert_eq!(config.engine.flush_interval_secs, 60);
    assert_eq!(config.engine.flush_failure_escalation, 3);
    assert!(config.engine.history_retention_days.is_none());
    assert!(config.budgets.is_empty());
    assert_eq!(config.analytics.trend_period, PeriodKind::Daily);
    assert_eq!(config.analytics.trend_periods, 7);
    assert!((config.analytics.anomaly_z_threshold - 2.0).abs() < f64::EPSILON);
    assert!((config.analytics.trend_dead_zone_percent - 5.0).abs() < f64::EPSILON);
    assert!(config.storage.wal_mode);
    assert_eq!(config.log.level, "info");
    assert!(!config.prometheus.enabled);
}

/// The shipped pricing table contains the low-cost reference model.
#[test]
fn default_pricing_table_is_populated() {
    let config = TollgateConfig::default();
    let flash = &config.pricing.models["gemini-1.5-flash"];
    assert!((flash.input_per_mtok - 0.075).abs() < f64::EPSILON);
    assert!((flash.output_per_mtok - 0.30).abs() < f64::EPSILON);
    let embed = &config.pricing.models["text-embedding-3-small"];
    assert_eq!(embed.embedding_per_mtok, Some(0.02));
}

/// Environment-style dotted overrides win over TOML.
#[test]
fn dotted_override_wins_over_toml() {
    use figment::{
        providers::{Format, Serialized, Toml},
        Figment,
    };

    let toml_content = r#"
[engine]
flush_interval_secs = 30
"#;

    let config: TollgateConfig = Figment::new()
        .merge(Serialized::defaults(TollgateConfig::default()))
        .merge(Toml::string(toml_content))
        .merge(("engine.flush_interval_secs", 5))
        .extract()
        .expect("should merge override");

    assert_eq!(config.engine.flush_interval_secs, 5);
}

/// Missing config files are silently skipped (Figment's Toml::file() behavior).
#[test]
fn missing_config_files_silently_skipped() {
    use figment::{
        providers::{Format, Serialized, Toml},
        Figment,
    };

    let config: TollgateConfig = Figment::new()
        .merge(Serialized::defaults(TollgateConfig::default()))
        .merge(Toml::file("/nonexistent/path/tollgate.toml"))
        .extract()
        .expect("missing file should be silently skipped");

    assert_eq!(config.engine.currency, "USD");
}

/// Unknown field in [engine] is rejected.
#[test]
fn unknown_field_in_engine_produces_error() {
    let toml = r#"
[engine]
curency = "USD"
"#;

    let err = load_config_from_str(toml).expect_err("should reject unknown field");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("curency"),
        "error should mention unknown field, got: {err_str}"
    );
}

/// Unknown top-level section is rejected by deny_unknown_fields.
#[test]
fn deny_unknown_fields_at_top_level() {
    let toml = r#"
[metrics]
enabled = true
"#;

    assert!(load_config_from_str(toml).is_err());
}

/// Unknown key inside a budget entry becomes an UnknownKey diagnostic with a suggestion.
#[test]
fn unknown_budget_key_gets_suggestion() {
    let toml = r#"
[[budgets]]
name = "team"
limt = 10.0
"#;

    let errors = load_and_validate_str(toml).expect_err("should fail");
    let suggestion = errors.iter().find_map(|e| match e {
        ConfigError::UnknownKey { key, suggestion, .. } if key == "limt" => suggestion.clone(),
        _ => None,
    });
    assert_eq!(suggestion.as_deref(), Some("limit"));
}

/// A budget without a limit is reported as a missing key.
#[test]
fn budget_without_limit_is_missing_key() {
    let toml = r#"
[[budgets]]
name = "team"
"#;

    let errors = load_and_validate_str(toml).expect_err("should fail");
    assert!(errors.iter().any(
        |e| matches!(e, ConfigError::MissingKey { key } if key.ends_with("limit"))
    ));
}

/// Invalid period names are rejected at deserialization time.
#[test]
fn invalid_period_is_rejected() {
    let toml = r#"
[[budgets]]
name = "team"
limit = 10.0
period = "fortnightly"
"#;

    assert!(load_config_from_str(toml).is_err());
}

/// Semantic validation runs after successful deserialization.
#[test]
fn validation_errors_are_collected() {
    let toml = r#"
[engine]
cache_discount = 2.0

[[budgets]]
name = "team"
limit = -1.0
"#;

    let errors = load_and_validate_str(toml).expect_err("should fail validation");
    assert_eq!(errors.len(), 2, "got: {errors:?}");
}

/// Budget config converts into engine creation parameters.
#[test]
fn budget_config_to_spec() {
    let toml = r#"
[[budgets]]
name = "search"
limit = 20.0
period = "weekly"
feature = "search"
"#;

    let config = load_and_validate_str(toml).expect("valid");
    let spec = config.budgets[0].to_spec();
    assert_eq!(spec.name, "search");
    assert_eq!(spec.period, PeriodKind::Weekly);
    assert_eq!(spec.scope.feature.as_deref(), Some("search"));
    assert!(spec.scope.user_id.is_none());
}
