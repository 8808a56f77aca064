// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence hook for the background flush.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::{Budget, BudgetAlert};
use crate::error::TollgateError;
use crate::types::CostRecord;

/// Everything one flush hands to durable storage.
///
/// `records` is append-only: only records not yet persisted are included.
/// `budgets` and `alerts` are full current snapshots that overwrite the
/// stored ones. `deleted_budgets` names budgets removed since the last
/// successful flush.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlushBatch {
    pub records: Vec<CostRecord>,
    pub budgets: Vec<Budget>,
    pub alerts: Vec<BudgetAlert>,
    pub deleted_budgets: Vec<String>,
    pub flushed_at: Option<DateTime<Utc>>,
}

impl FlushBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
            && self.budgets.is_empty()
            && self.alerts.is_empty()
            && self.deleted_budgets.is_empty()
    }
}

/// State loaded from durable storage at process start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoredState {
    /// Cost records in timestamp order.
    pub records: Vec<CostRecord>,
    pub budgets: Vec<Budget>,
    pub alerts: Vec<BudgetAlert>,
}

/// A durable store for cost records, budget snapshots, and alerts.
///
/// Implementations must not corrupt previously persisted data when a
/// `persist` call fails part way (transactional or append-only writes).
#[async_trait]
pub trait CostStore: Send + Sync {
    /// Human-readable store name for logs.
    fn name(&self) -> &str;

    /// Durably write one flush batch.
    async fn persist(&self, batch: &FlushBatch) -> Result<(), TollgateError>;

    /// Load everything previously persisted.
    async fn restore(&self) -> Result<RestoredState, TollgateError>;
}
