// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared fixtures: a small pricing table, configs, events and records.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use tollgate_config::TollgateConfig;
use tollgate_core::{
    Budget, BudgetScope, CostRecord, OperationKind, PeriodKind, PricingEntry, TokenUsage,
    TokenUsageEvent,
};

/// Monday 2026-03-02 00:00:00 UTC. Aligned to every period kind except yearly.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// A pricing table with a cheap model, an expensive model and an embedding model.
///
/// `model-a` is priced at 0.075 / 0.30 per million tokens.
pub fn pricing_table() -> BTreeMap<String, PricingEntry> {
    let mut models = BTreeMap::new();
    models.insert("model-a".to_string(), PricingEntry::new(0.075, 0.30));
    models.insert("model-b".to_string(), PricingEntry::new(3.0, 15.0));
    models.insert(
        "model-c".to_string(),
        PricingEntry {
            cache_discount: Some(0.9),
            ..PricingEntry::new(10.0, 30.0)
        },
    );
    models.insert(
        "embed-small".to_string(),
        PricingEntry {
            input_per_mtok: 0.10,
            output_per_mtok: 0.0,
            embedding_per_mtok: Some(0.02),
            cache_discount: None,
        },
    );
    models
}

/// A config using [`pricing_table`] and no configured budgets.
pub fn test_config() -> TollgateConfig {
    let mut config = TollgateConfig::default();
    config.pricing.models = pricing_table();
    config.engine.flush_interval_secs = 1;
    config
}

/// A generation event with no cached tokens.
pub fn usage_event(
    model: &str,
    prompt_tokens: u64,
    completion_tokens: u64,
    at: DateTime<Utc>,
) -> TokenUsageEvent {
    TokenUsageEvent::new(
        model,
        OperationKind::Generation,
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            cached_tokens: 0,
        },
        at,
    )
}

/// A pre-priced record for store tests.
pub fn cost_record(model: &str, total_cost: f64, at: DateTime<Utc>) -> CostRecord {
    CostRecord {
        id: format!("rec-{model}-{}", at.timestamp_nanos_opt().unwrap_or_default()),
        model: model.to_string(),
        operation: OperationKind::Generation,
        prompt_tokens: 1000,
        completion_tokens: 500,
        cached_tokens: 0,
        prompt_cost: total_cost / 2.0,
        completion_cost: total_cost / 2.0,
        cache_savings: 0.0,
        total_cost,
        currency: "USD".to_string(),
        user_id: None,
        session_id: None,
        feature: None,
        timestamp: at,
    }
}

/// A global monthly budget with default thresholds and no spend.
pub fn budget(name: &str, limit: f64, now: DateTime<Utc>) -> Budget {
    Budget {
        name: name.to_string(),
        limit,
        period: PeriodKind::Monthly,
        scope: BudgetScope::global(),
        thresholds: vec![75.0, 90.0, 100.0],
        hard_limit: false,
        period_start: PeriodKind::Monthly.start_of(now),
        current_spend: 0.0,
        fired_thresholds: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}
