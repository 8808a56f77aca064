// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Range and consistency checks that serde cannot express.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::TollgateConfig;

/// Check every section and report all violations together.
pub fn validate_config(config: &TollgateConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let engine = &config.engine;
    if engine.currency.trim().is_empty() {
        errors.push(ConfigError::validation("engine.currency must not be empty"));
    }
    if !(0.0..=1.0).contains(&engine.cache_discount) {
        errors.push(ConfigError::validation(format!(
            "engine.cache_discount must be within [0, 1], got {}",
            engine.cache_discount
        )));
    }
    if engine.flush_interval_secs == 0 {
        errors.push(ConfigError::validation(
            "engine.flush_interval_secs must be greater than 0",
        ));
    }
    if engine.flush_failure_escalation == 0 {
        errors.push(ConfigError::validation(
            "engine.flush_failure_escalation must be at least 1",
        ));
    }

    for (model, entry) in &config.pricing.models {
        let prices = [
            ("input_per_mtok", Some(entry.input_per_mtok)),
            ("output_per_mtok", Some(entry.output_per_mtok)),
            ("embedding_per_mtok", entry.embedding_per_mtok),
        ];
        for (field, value) in prices {
            if let Some(v) = value
                && (!v.is_finite() || v < 0.0)
            {
                errors.push(ConfigError::validation(format!(
                    "pricing.models.\"{model}\".{field} must be a non-negative number, got {v}"
                )));
            }
        }
        if let Some(discount) = entry.cache_discount
            && !(0.0..=1.0).contains(&discount)
        {
            errors.push(ConfigError::validation(format!(
                "pricing.models.\"{model}\".cache_discount must be within [0, 1], got {discount}"
            )));
        }
    }

    let mut seen_names = HashSet::new();
    for (i, budget) in config.budgets.iter().enumerate() {
        if budget.name.trim().is_empty() {
            errors.push(ConfigError::validation(format!(
                "budgets[{i}].name must not be empty"
            )));
        } else if !seen_names.insert(budget.name.as_str()) {
            errors.push(ConfigError::validation(format!(
                "duplicate budget name `{}` in [[budgets]] array",
                budget.name
            )));
        }
        if !budget.limit.is_finite() || budget.limit <= 0.0 {
            errors.push(ConfigError::validation(format!(
                "budgets[{i}].limit must be greater than 0, got {}",
                budget.limit
            )));
        }
        for threshold in &budget.thresholds {
            if !(*threshold > 0.0 && *threshold <= 100.0) {
                errors.push(ConfigError::validation(format!(
                    "budgets[{i}].thresholds must be within (0, 100], got {threshold}"
                )));
            }
        }
    }

    if config.analytics.trend_periods == 0 {
        errors.push(ConfigError::validation(
            "analytics.trend_periods must be at least 1",
        ));
    }
    if !(config.analytics.anomaly_z_threshold > 0.0) {
        errors.push(ConfigError::validation(format!(
            "analytics.anomaly_z_threshold must be greater than 0, got {}",
            config.analytics.anomaly_z_threshold
        )));
    }
    if !(config.analytics.trend_dead_zone_percent >= 0.0) {
        errors.push(ConfigError::validation(format!(
            "analytics.trend_dead_zone_percent must be non-negative, got {}",
            config.analytics.trend_dead_zone_percent
        )));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
