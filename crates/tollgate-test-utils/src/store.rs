// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory `CostStore` implementations for flush and restore tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use tollgate_core::{CostStore, FlushBatch, RestoredState, TollgateError};

/// A store that keeps every persisted batch in memory.
///
/// `restore` folds the batches the same way a durable store would:
/// records are appended, budget snapshots overwrite by name, alerts
/// overwrite by id and deleted budgets are dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    batches: Arc<Mutex<Vec<FlushBatch>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch persisted so far, oldest first.
    pub async fn batches(&self) -> Vec<FlushBatch> {
        self.batches.lock().await.clone()
    }

    /// Number of successful `persist` calls.
    pub async fn persist_count(&self) -> usize {
        self.batches.lock().await.len()
    }

    /// Preload state as if an earlier process had flushed it.
    pub async fn seed(&self, batch: FlushBatch) {
        self.batches.lock().await.push(batch);
    }
}

#[async_trait]
impl CostStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn persist(&self, batch: &FlushBatch) -> Result<(), TollgateError> {
        self.batches.lock().await.push(batch.clone());
        Ok(())
    }

    async fn restore(&self) -> Result<RestoredState, TollgateError> {
        let batches = self.batches.lock().await;
        let mut state = RestoredState::default();
        for batch in batches.iter() {
            for record in &batch.records {
                if !state.records.iter().any(|r| r.id == record.id) {
                    state.records.push(record.clone());
                }
            }
            for budget in &batch.budgets {
                state.budgets.retain(|b| b.name != budget.name);
                state.budgets.push(budget.clone());
            }
            for name in &batch.deleted_budgets {
                state.budgets.retain(|b| &b.name != name);
            }
            for alert in &batch.alerts {
                state.alerts.retain(|a| a.id != alert.id);
                state.alerts.push(alert.clone());
            }
        }
        state.records.sort_by_key(|r| r.timestamp);
        state.budgets.sort_by(|a, b| a.name.cmp(&b.name));
        state.alerts.sort_by_key(|a| a.timestamp);
        Ok(state)
    }
}

/// A store whose first `failures` persist calls fail, then delegates to
/// an inner [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct FailingStore {
    remaining_failures: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
    inner: MemoryStore,
}

impl FailingStore {
    pub fn new(failures: u32) -> Self {
        Self {
            remaining_failures: Arc::new(AtomicU32::new(failures)),
            attempts: Arc::new(AtomicU32::new(0)),
            inner: MemoryStore::new(),
        }
    }

    /// A store that never succeeds.
    pub fn always() -> Self {
        Self::new(u32::MAX)
    }

    /// Total persist calls, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The store that receives batches once failures are exhausted.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl CostStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn persist(&self, batch: &FlushBatch) -> Result<(), TollgateError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            tracing::debug!("failing store rejecting batch");
            return Err(TollgateError::persistence(std::io::Error::other(
                "storage unreachable",
            )));
        }
        self.inner.persist(batch).await
    }

    async fn restore(&self) -> Result<RestoredState, TollgateError> {
        self.inner.restore().await
    }
}
