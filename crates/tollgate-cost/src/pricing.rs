// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Model pricing and cost calculation.
//!
//! The pricing table is configuration: it is loaded at startup and can be
//! replaced at runtime as a whole. Readers always see either the old or the
//! new table, never a mix.
//!
//! Formula, per million tokens:
//! `(prompt - cached) * in + cached * in * (1 - discount) + completion * out`.
//! The discount covers prompt context only; completion tokens are always
//! billed at the full output rate.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use tollgate_core::{
    CostRecord, OperationKind, PricingEntry, TokenUsage, TokenUsageEvent, TollgateError,
};

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// Average billing days in a month, for linear projections.
pub const DAYS_PER_MONTH: f64 = 30.0;

/// The cost of one call, split by token class.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quote {
    /// Prompt tokens after the cache discount.
    pub input_cost: f64,
    pub output_cost: f64,
    /// Amount the cache discount saved.
    pub cache_savings: f64,
    pub total_cost: f64,
}

/// Linear monthly extrapolation. An estimate, not a guarantee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyProjection {
    pub model: String,
    pub daily_requests: u64,
    pub cost_per_request: f64,
    pub daily_cost: f64,
    pub monthly_cost: f64,
}

/// Stateless pricing over a hot-swappable model table.
pub struct CostCalculator {
    models: ArcSwap<BTreeMap<String, PricingEntry>>,
    default_cache_discount: f64,
    currency: String,
}

impl CostCalculator {
    pub fn new(
        models: BTreeMap<String, PricingEntry>,
        default_cache_discount: f64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            models: ArcSwap::from_pointee(models),
            default_cache_discount,
            currency: currency.into(),
        }
    }

    /// Replace the whole pricing table.
    ///
    /// Entries are checked first; on error the current table stays in place.
    pub fn swap(&self, models: BTreeMap<String, PricingEntry>) -> Result<(), TollgateError> {
        validate_table(&models)?;
        let count = models.len();
        self.models.store(Arc::new(models));
        tracing::info!(models = count, "pricing table replaced");
        Ok(())
    }

    /// The current pricing table.
    pub fn models(&self) -> Arc<BTreeMap<String, PricingEntry>> {
        self.models.load_full()
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Price a call with explicit token counts.
    ///
    /// Fails with `UnknownModel` when the table has no entry and with
    /// `InvalidUsage` when `cached > prompt`.
    pub fn price(
        &self,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        cached_tokens: u64,
    ) -> Result<Quote, TollgateError> {
        let usage = TokenUsage::new(prompt_tokens, completion_tokens, cached_tokens)?;
        self.quote(model, OperationKind::Generation, &usage)
    }

    /// Price a generation call without cache hits.
    pub fn estimate(
        &self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<Quote, TollgateError> {
        self.price(model, input_tokens, output_tokens, 0)
    }

    /// Price a call of the given operation kind.
    pub fn quote(
        &self,
        model: &str,
        operation: OperationKind,
        usage: &TokenUsage,
    ) -> Result<Quote, TollgateError> {
        usage.validate()?;
        let models = self.models.load();
        let entry = models
            .get(model)
            .ok_or_else(|| TollgateError::UnknownModel {
                model: model.to_string(),
            })?;
        let quote = compute(entry, operation, usage, self.default_cache_discount);
        if !quote.total_cost.is_finite() {
            return Err(TollgateError::InvalidUsage(format!(
                "pricing `{model}` produced a non-finite cost"
            )));
        }
        Ok(quote)
    }

    /// Price a usage event into an immutable cost record.
    pub fn price_event(&self, event: &TokenUsageEvent) -> Result<CostRecord, TollgateError> {
        let quote = self.quote(&event.model, event.operation, &event.usage)?;
        Ok(CostRecord {
            id: uuid::Uuid::new_v4().to_string(),
            model: event.model.clone(),
            operation: event.operation,
            prompt_tokens: event.usage.prompt_tokens,
            completion_tokens: event.usage.completion_tokens,
            cached_tokens: event.usage.cached_tokens,
            prompt_cost: quote.input_cost,
            completion_cost: quote.output_cost,
            cache_savings: quote.cache_savings,
            total_cost: quote.total_cost,
            currency: self.currency.clone(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            feature: event.feature.clone(),
            timestamp: event.timestamp,
        })
    }

    /// What the same call would have cost on every known model.
    pub fn compare_models(
        &self,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> BTreeMap<String, f64> {
        let usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
            cached_tokens: 0,
        };
        self.models
            .load()
            .iter()
            .map(|(model, entry)| {
                let quote = compute(
                    entry,
                    OperationKind::Generation,
                    &usage,
                    self.default_cache_discount,
                );
                (model.clone(), quote.total_cost)
            })
            .collect()
    }

    /// Extrapolate a month of spend from an average daily request profile.
    pub fn project_monthly(
        &self,
        daily_requests: u64,
        avg_prompt_tokens: u64,
        avg_completion_tokens: u64,
        model: &str,
    ) -> Result<MonthlyProjection, TollgateError> {
        let per_request = self.estimate(model, avg_prompt_tokens, avg_completion_tokens)?;
        let daily_cost = per_request.total_cost * daily_requests as f64;
        Ok(MonthlyProjection {
            model: model.to_string(),
            daily_requests,
            cost_per_request: per_request.total_cost,
            daily_cost,
            monthly_cost: daily_cost * DAYS_PER_MONTH,
        })
    }
}

fn compute(
    entry: &PricingEntry,
    operation: OperationKind,
    usage: &TokenUsage,
    default_discount: f64,
) -> Quote {
    let input_rate = match (operation, entry.embedding_per_mtok) {
        (OperationKind::Embedding, Some(rate)) => rate,
        _ => entry.input_per_mtok,
    };
    let discount = entry.cache_discount.unwrap_or(default_discount);

    let billed = usage.prompt_tokens.saturating_sub(usage.cached_tokens) as f64;
    let cached = usage.cached_tokens as f64;
    let input_cost =
        (billed * input_rate + cached * input_rate * (1.0 - discount)) / TOKENS_PER_UNIT;
    let cache_savings = cached * input_rate * discount / TOKENS_PER_UNIT;
    let output_cost = usage.completion_tokens as f64 * entry.output_per_mtok / TOKENS_PER_UNIT;

    Quote {
        input_cost,
        output_cost,
        cache_savings,
        total_cost: input_cost + output_cost,
    }
}

/// Reject negative or non-finite prices and out-of-range discounts.
pub fn validate_table(models: &BTreeMap<String, PricingEntry>) -> Result<(), TollgateError> {
    for (model, entry) in models {
        validate_entry(model, entry)?;
    }
    Ok(())
}

fn validate_entry(model: &str, entry: &PricingEntry) -> Result<(), TollgateError> {
    let rates = [
        Some(entry.input_per_mtok),
        Some(entry.output_per_mtok),
        entry.embedding_per_mtok,
    ];
    if rates
        .into_iter()
        .flatten()
        .any(|r| !r.is_finite() || r < 0.0)
    {
        return Err(TollgateError::InvalidConfiguration(format!(
            "pricing for `{model}` must be finite and non-negative"
        )));
    }
    if let Some(d) = entry.cache_discount
        && !(0.0..=1.0).contains(&d)
    {
        return Err(TollgateError::InvalidConfiguration(format!(
            "cache_discount for `{model}` must be within [0, 1], got {d}"
        )));
    }
    Ok(())
}
