// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics. Without an installed recorder every call
//! is a no-op.

use metrics::{describe_counter, describe_gauge};

use tollgate_core::{AlertSeverity, CostRecord};

/// Register all Tollgate metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "tollgate_cost_usd_total",
        "Total priced cost in micro-units of the engine currency"
    );
    describe_counter!("tollgate_requests_total", "Total usage events recorded");
    describe_counter!("tollgate_tokens_total", "Total tokens recorded");
    describe_gauge!(
        "tollgate_budget_spend_usd",
        "Current-period spend per budget"
    );
    describe_counter!(
        "tollgate_budget_alerts_total",
        "Budget threshold alerts fired"
    );
    describe_gauge!(
        "tollgate_flush_failures",
        "Consecutive failed flushes to storage"
    );
}

/// Record one priced usage event.
///
/// Counters are integral, so cost is recorded in millionths of a currency unit.
pub fn record_cost(record: &CostRecord) {
    let model = record.model.clone();
    let operation = record.operation.to_string();
    let micros = (record.total_cost * 1_000_000.0).round().max(0.0) as u64;

    metrics::counter!("tollgate_cost_usd_total", "model" => model.clone()).increment(micros);
    metrics::counter!(
        "tollgate_requests_total",
        "model" => model.clone(),
        "operation" => operation
    )
    .increment(1);
    metrics::counter!("tollgate_tokens_total", "model" => model.clone(), "type" => "prompt")
        .increment(record.prompt_tokens);
    metrics::counter!("tollgate_tokens_total", "model" => model.clone(), "type" => "completion")
        .increment(record.completion_tokens);
    metrics::counter!("tollgate_tokens_total", "model" => model, "type" => "cached")
        .increment(record.cached_tokens);
}

/// Set a budget's current-period spend.
pub fn set_budget_spend(budget: &str, spend: f64) {
    metrics::gauge!("tollgate_budget_spend_usd", "budget" => budget.to_string()).set(spend);
}

/// Record a fired threshold alert.
pub fn record_alert(budget: &str, severity: AlertSeverity) {
    metrics::counter!(
        "tollgate_budget_alerts_total",
        "budget" => budget.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}

/// Set the consecutive flush failure count.
pub fn set_flush_failures(count: u32) {
    metrics::gauge!("tollgate_flush_failures").set(f64::from(count));
}
