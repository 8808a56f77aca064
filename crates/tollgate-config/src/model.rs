// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed shape of `tollgate.toml`.
//!
//! Every section denies unknown fields so a misspelt key fails loading
//! instead of being ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tollgate_core::{BudgetScope, BudgetSpec, PeriodKind, PricingEntry};

/// Top-level Tollgate configuration.
///
/// Every section may be omitted; missing sections take their defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TollgateConfig {
    /// Engine-wide settings (currency, cache discount, flush cadence).
    #[serde(default)]
    pub engine: EngineConfig,

    /// Model pricing table.
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Budgets created at startup.
    #[serde(default)]
    pub budgets: Vec<BudgetConfig>,

    /// Trend, forecast, and anomaly settings.
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// SQLite storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Prometheus metrics settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

/// Engine-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Currency code stamped on every cost record. No conversion is performed.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Fraction of the input price waived for cached prompt tokens.
    #[serde(default = "default_cache_discount")]
    pub cache_discount: f64,

    /// Seconds between background flushes to storage.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Consecutive flush failures before an operator-visible error is logged.
    #[serde(default = "default_flush_failure_escalation")]
    pub flush_failure_escalation: u32,

    /// Days of flushed cost records kept in memory. `None` keeps everything.
    #[serde(default)]
    pub history_retention_days: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            cache_discount: default_cache_discount(),
            flush_interval_secs: default_flush_interval_secs(),
            flush_failure_escalation: default_flush_failure_escalation(),
            history_retention_days: None,
        }
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_cache_discount() -> f64 {
    0.5
}

fn default_flush_interval_secs() -> u64 {
    60
}

fn default_flush_failure_escalation() -> u32 {
    3
}

/// Model pricing table, keyed by model identifier.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    #[serde(default = "default_models")]
    pub models: BTreeMap<String, PricingEntry>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
        }
    }
}

/// Shipped pricing table (USD per million tokens).
///
/// These are configuration values, overridable per deployment.
fn default_models() -> BTreeMap<String, PricingEntry> {
    let mut models = BTreeMap::new();
    models.insert(
        "claude-opus-4".to_string(),
        PricingEntry::new(15.0, 75.0),
    );
    models.insert(
        "claude-sonnet-4".to_string(),
        PricingEntry::new(3.0, 15.0),
    );
    models.insert(
        "claude-haiku-3.5".to_string(),
        PricingEntry::new(0.80, 4.0),
    );
    models.insert("gpt-4o".to_string(), PricingEntry::new(2.50, 10.0));
    models.insert("gpt-4o-mini".to_string(), PricingEntry::new(0.15, 0.60));
    models.insert(
        "gemini-1.5-flash".to_string(),
        PricingEntry::new(0.075, 0.30),
    );
    models.insert(
        "text-embedding-3-small".to_string(),
        PricingEntry {
            input_per_mtok: 0.02,
            output_per_mtok: 0.0,
            embedding_per_mtok: Some(0.02),
            cache_discount: None,
        },
    );
    models
}

/// A budget declared in configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// Unique budget name.
    pub name: String,

    /// Spending limit per period, in the engine currency.
    pub limit: f64,

    /// Period the limit applies to.
    #[serde(default = "default_period")]
    pub period: PeriodKind,

    /// Alert thresholds as percentages of the limit.
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<f64>,

    /// Restrict the budget to a single user.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Restrict the budget to a feature tag (or operation kind name).
    #[serde(default)]
    pub feature: Option<String>,

    /// Refuse further spend once the limit is reached.
    #[serde(default)]
    pub hard_limit: bool,
}

impl BudgetConfig {
    /// Convert to the engine's creation parameters.
    pub fn to_spec(&self) -> BudgetSpec {
        BudgetSpec {
            name: self.name.clone(),
            limit: self.limit,
            period: self.period,
            thresholds: self.thresholds.clone(),
            scope: BudgetScope {
                user_id: self.user_id.clone(),
                feature: self.feature.clone(),
            },
            hard_limit: self.hard_limit,
        }
    }
}

fn default_period() -> PeriodKind {
    PeriodKind::Monthly
}

/// Default alert thresholds: 75%, 90%, 100%.
pub fn default_thresholds() -> Vec<f64> {
    vec![75.0, 90.0, 100.0]
}

/// Trend, forecast, and anomaly settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyticsConfig {
    /// Bucket width used by `report` trend analysis.
    #[serde(default = "default_trend_period")]
    pub trend_period: PeriodKind,

    /// Number of buckets used by `report` trend analysis.
    #[serde(default = "default_trend_periods")]
    pub trend_periods: u32,

    /// Standard deviations from the mean before a bucket is anomalous.
    #[serde(default = "default_anomaly_z_threshold")]
    pub anomaly_z_threshold: f64,

    /// Percentage change inside which a trend is reported as flat.
    #[serde(default = "default_trend_dead_zone_percent")]
    pub trend_dead_zone_percent: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            trend_period: default_trend_period(),
            trend_periods: default_trend_periods(),
            anomaly_z_threshold: default_anomaly_z_threshold(),
            trend_dead_zone_percent: default_trend_dead_zone_percent(),
        }
    }
}

fn default_trend_period() -> PeriodKind {
    PeriodKind::Daily
}

fn default_trend_periods() -> u32 {
    7
}

fn default_anomaly_z_threshold() -> f64 {
    2.0
}

fn default_trend_dead_zone_percent() -> f64 {
    5.0
}

/// Where and how cost state is persisted.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// SQLite file, created on first use.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Open the database in write-ahead-log journal mode.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("tollgate").join("tollgate.db"))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tollgate.db".to_string())
}

fn default_wal_mode() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON-formatted log lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    /// Install the Prometheus recorder at startup.
    #[serde(default)]
    pub enabled: bool,
}
