// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cost aggregation, budget enforcement and trend analysis for Tollgate.
//!
//! This crate provides:
//! - **Pricing**: per-model cost calculation with cache discounts over a hot-swappable table
//! - **Tracker**: atomic ingestion of usage events into running metrics and history
//! - **Budgets**: per-budget locked state machine with lazy rollover and exactly-once alerts
//! - **Analyzer**: breakdowns, trend direction, linear forecast and anomaly flags
//! - **Engine**: the lifecycle facade that owns the periodic flush to a `CostStore`

pub mod analyzer;
pub mod budget;
pub mod engine;
pub mod flush;
pub mod pricing;
pub mod tracker;

pub use analyzer::{Anomaly, CostBreakdown, CostReport, TrendAnalysis, TrendBucket, TrendDirection};
pub use budget::{AlertFilter, BudgetManager, PendingChanges};
pub use engine::CostEngine;
pub use flush::{FlushReport, FlushWorker};
pub use pricing::{CostCalculator, MonthlyProjection, Quote};
pub use tracker::{AggregateMetrics, BreakdownEntry, CostTracker, MetricsFilter, Recorded};
