// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic hand-off of engine state to a [`CostStore`].
//!
//! A flush collects the records, budgets and alerts changed since the last
//! successful flush, read at one point in time, and hands them to the store
//! in one batch. Nothing is marked persisted until the store accepts the
//! batch, so a failed flush is retried in full on the next tick. Ingestion
//! never waits on a flush.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tollgate_core::{Clock, CostStore, FlushBatch, TollgateError};

use crate::budget::BudgetManager;
use crate::tracker::CostTracker;

/// What one successful flush wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub records: usize,
    pub budgets: usize,
    pub alerts: usize,
    pub deleted_budgets: usize,
    /// In-memory records dropped by the retention window afterwards.
    pub pruned: usize,
}

/// Owns the flush cursor bookkeeping and the failure counter.
pub struct FlushWorker {
    store: Arc<dyn CostStore>,
    tracker: Arc<CostTracker>,
    budgets: Arc<BudgetManager>,
    clock: Arc<dyn Clock>,
    escalate_after: u32,
    retention: Option<chrono::Duration>,
    consecutive_failures: AtomicU32,
    in_flight: tokio::sync::Mutex<()>,
}

impl FlushWorker {
    pub fn new(
        store: Arc<dyn CostStore>,
        tracker: Arc<CostTracker>,
        budgets: Arc<BudgetManager>,
        clock: Arc<dyn Clock>,
        escalate_after: u32,
        retention_days: Option<u32>,
    ) -> Self {
        Self {
            store,
            tracker,
            budgets,
            clock,
            escalate_after: escalate_after.max(1),
            retention: retention_days.map(|d| chrono::Duration::days(i64::from(d))),
            consecutive_failures: AtomicU32::new(0),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Failed flushes since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Persist everything that changed since the last successful flush.
    ///
    /// Concurrent callers are serialized; each sees the state left by the
    /// previous one.
    pub async fn flush(&self) -> Result<FlushReport, TollgateError> {
        let _guard = self.in_flight.lock().await;

        let (records, changes) = self.tracker.pending_batch()?;
        let batch = FlushBatch {
            records,
            budgets: changes.budgets.clone(),
            alerts: changes.alerts.clone(),
            deleted_budgets: changes.deleted.clone(),
            flushed_at: Some(self.clock.now()),
        };
        if batch.is_empty() {
            debug!("nothing to flush");
            return Ok(FlushReport::default());
        }

        if let Err(e) = self.store.persist(&batch).await {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= self.escalate_after {
                error!(
                    store = self.store.name(),
                    failures,
                    error = %e,
                    "cost flush keeps failing; in-memory state is not being persisted"
                );
            } else {
                warn!(
                    store = self.store.name(),
                    failures,
                    error = %e,
                    "cost flush failed, retrying next interval"
                );
            }
            #[cfg(feature = "prometheus")]
            tollgate_prometheus::set_flush_failures(failures);
            return Err(e);
        }

        self.tracker.mark_flushed(batch.records.len())?;
        self.budgets.settle(&changes)?;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        #[cfg(feature = "prometheus")]
        tollgate_prometheus::set_flush_failures(0);

        let pruned = match self.retention {
            Some(window) => self.tracker.prune(self.clock.now() - window)?,
            None => 0,
        };

        let report = FlushReport {
            records: batch.records.len(),
            budgets: batch.budgets.len(),
            alerts: batch.alerts.len(),
            deleted_budgets: batch.deleted_budgets.len(),
            pruned,
        };
        info!(
            store = self.store.name(),
            records = report.records,
            budgets = report.budgets,
            alerts = report.alerts,
            "cost state flushed"
        );
        Ok(report)
    }

    /// Flush every `period` until `cancel` fires.
    ///
    /// The first tick is skipped. A flush already running when the token is
    /// cancelled is allowed to finish.
    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Failures are logged inside flush() and retried next tick.
                    let _ = self.flush().await;
                }
                _ = cancel.cancelled() => {
                    info!("flush task shutting down");
                    break;
                }
            }
        }
    }
}
