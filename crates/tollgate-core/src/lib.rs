// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Tollgate cost engine.
//!
//! This crate provides the error taxonomy, the shared data model (usage
//! events, priced cost records, budgets, alerts, calendar periods) and the
//! collaborator traits (`Clock`, `CostStore`) the engine is wired against.

pub mod budget;
pub mod error;
pub mod period;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use budget::{AlertSeverity, Budget, BudgetAlert, BudgetScope, BudgetSpec, BudgetStatus};
pub use error::TollgateError;
pub use period::PeriodKind;
pub use traits::{Clock, CostStore, FlushBatch, RestoredState, SystemClock};
pub use types::{
    CostRecord, OperationKind, PricingEntry, SpendDimensions, TokenUsage, TokenUsageEvent,
};
