// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory cost aggregation and the historical record store.
//!
//! `record_operation` prices an event, then under one lock forwards the
//! spend to the budget manager and applies the record to the running
//! metrics and history. Lock order is always tracker state, then budgets.
//!
//! History is kept in sealed, shared chunks plus an open tail. Readers copy
//! the chunk list under the lock and filter after releasing it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tollgate_core::{
    BudgetAlert, CostRecord, OperationKind, SpendDimensions, TokenUsageEvent, TollgateError,
};

use crate::budget::{BudgetManager, PendingChanges};
use crate::pricing::CostCalculator;

/// Records per sealed history chunk.
const CHUNK_LEN: usize = 1024;

/// Totals for one breakdown key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub cost: f64,
    pub requests: u64,
    pub tokens: u64,
}

impl BreakdownEntry {
    fn add(&mut self, record: &CostRecord) {
        self.cost += record.total_cost;
        self.requests += 1;
        self.tokens += record.total_tokens();
    }
}

/// Running totals plus breakdowns by model, user and operation kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub total_cost: f64,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
    /// Events with at least one cached prompt token.
    pub cache_hits: u64,
    /// `cache_hits / total_requests`, 0 when there are no requests.
    pub cache_hit_rate: f64,
    pub cache_savings: f64,
    pub by_model: BTreeMap<String, BreakdownEntry>,
    /// Only events that carry a user id.
    pub by_user: BTreeMap<String, BreakdownEntry>,
    pub by_operation: BTreeMap<OperationKind, BreakdownEntry>,
}

impl AggregateMetrics {
    /// Fold a sequence of records into fresh metrics.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CostRecord>) -> Self {
        let mut metrics = Self::default();
        for record in records {
            metrics.apply(record);
        }
        metrics
    }

    /// Count one record into every total and breakdown.
    pub fn apply(&mut self, record: &CostRecord) {
        self.total_cost += record.total_cost;
        self.total_requests += 1;
        self.total_tokens += record.total_tokens();
        self.prompt_tokens += record.prompt_tokens;
        self.completion_tokens += record.completion_tokens;
        self.cached_tokens += record.cached_tokens;
        self.cache_savings += record.cache_savings;
        if record.is_cache_hit() {
            self.cache_hits += 1;
        }
        self.cache_hit_rate = self.cache_hits as f64 / self.total_requests as f64;

        self.by_model
            .entry(record.model.clone())
            .or_default()
            .add(record);
        if let Some(user) = &record.user_id {
            self.by_user.entry(user.clone()).or_default().add(record);
        }
        self.by_operation
            .entry(record.operation)
            .or_default()
            .add(record);
    }

    /// Mean cost per request, 0 when there are no requests.
    pub fn average_cost_per_request(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_cost / self.total_requests as f64
        }
    }
}

/// Narrows a metrics snapshot. An empty filter returns the running totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsFilter {
    /// Inclusive lower bound on record timestamps.
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound on record timestamps.
    pub end: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
}

impl MetricsFilter {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.user_id.is_none()
    }

    fn matches(&self, record: &CostRecord) -> bool {
        self.start.is_none_or(|s| record.timestamp >= s)
            && self.end.is_none_or(|e| record.timestamp < e)
            && self
                .user_id
                .as_deref()
                .is_none_or(|u| record.user_id.as_deref() == Some(u))
    }
}

/// A priced event and the alerts its spend fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recorded {
    pub record: CostRecord,
    pub alerts: Vec<BudgetAlert>,
}

/// Append-only record history in arrival order.
#[derive(Debug, Clone, Default)]
struct History {
    sealed: Vec<Arc<[CostRecord]>>,
    tail: Vec<CostRecord>,
    len: usize,
}

impl History {
    fn from_records(records: impl IntoIterator<Item = CostRecord>) -> Self {
        let mut history = Self::default();
        for record in records {
            history.push(record);
        }
        history
    }

    fn push(&mut self, record: CostRecord) {
        self.tail.push(record);
        self.len += 1;
        if self.tail.len() >= CHUNK_LEN {
            let full = std::mem::take(&mut self.tail);
            self.sealed.push(full.into());
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn chunks(&self) -> impl Iterator<Item = &[CostRecord]> {
        self.sealed
            .iter()
            .map(|c| &c[..])
            .chain(std::iter::once(&self.tail[..]))
    }

    fn iter(&self) -> impl Iterator<Item = &CostRecord> {
        self.chunks().flatten()
    }

    /// Copy of the records at positions `from..`.
    fn copy_from(&self, from: usize) -> Vec<CostRecord> {
        let mut out = Vec::with_capacity(self.len.saturating_sub(from));
        let mut skip = from;
        for chunk in self.chunks() {
            if skip >= chunk.len() {
                skip -= chunk.len();
                continue;
            }
            out.extend_from_slice(&chunk[skip..]);
            skip = 0;
        }
        out
    }
}

#[derive(Default)]
struct TrackerState {
    metrics: AggregateMetrics,
    history: History,
    /// Positions `..flushed` have been persisted.
    flushed: usize,
}

/// Owns the process-lifetime metrics and the in-memory record history.
pub struct CostTracker {
    calculator: Arc<CostCalculator>,
    budgets: Arc<BudgetManager>,
    state: Mutex<TrackerState>,
}

impl CostTracker {
    pub fn new(calculator: Arc<CostCalculator>, budgets: Arc<BudgetManager>) -> Self {
        Self {
            calculator,
            budgets,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Price an event and apply it to metrics, history and budgets as one step.
    ///
    /// Pricing failures (`UnknownModel`, `InvalidUsage`) leave every piece
    /// of state untouched.
    pub fn record_operation(&self, event: &TokenUsageEvent) -> Result<Recorded, TollgateError> {
        let record = self.calculator.price_event(event)?;
        let dims = SpendDimensions::from(event);

        let mut state = self.lock()?;
        let alerts = self.budgets.apply_spend(record.total_cost, &dims)?;
        state.metrics.apply(&record);
        state.history.push(record.clone());
        drop(state);

        debug!(
            model = %record.model,
            operation = %record.operation,
            cost = record.total_cost,
            alerts = alerts.len(),
            "operation recorded"
        );
        #[cfg(feature = "prometheus")]
        tollgate_prometheus::record_cost(&record);

        Ok(Recorded { record, alerts })
    }

    /// A point-in-time copy of the metrics.
    ///
    /// With an empty filter this is the running totals; otherwise the
    /// metrics are recomputed from the in-memory history.
    pub fn snapshot(&self, filter: &MetricsFilter) -> Result<AggregateMetrics, TollgateError> {
        let history = {
            let state = self.lock()?;
            if filter.is_empty() {
                return Ok(state.metrics.clone());
            }
            state.history.clone()
        };
        Ok(AggregateMetrics::from_records(
            history.iter().filter(|r| filter.matches(r)),
        ))
    }

    /// Records with `start <= timestamp < end`, in timestamp order.
    pub fn records_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CostRecord>, TollgateError> {
        let history = self.lock()?.history.clone();
        let mut records: Vec<CostRecord> = history
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp < end)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    /// Records not yet handed to a successful flush.
    pub fn pending(&self) -> Result<Vec<CostRecord>, TollgateError> {
        let state = self.lock()?;
        Ok(state.history.copy_from(state.flushed))
    }

    /// Unflushed records and pending budget changes, read under one lock.
    ///
    /// No operation can land between the two reads, so the budget spend in
    /// the batch covers exactly the records persisted up to and with it.
    pub fn pending_batch(&self) -> Result<(Vec<CostRecord>, PendingChanges), TollgateError> {
        let state = self.lock()?;
        let records = state.history.copy_from(state.flushed);
        let changes = self.budgets.pending_changes()?;
        Ok((records, changes))
    }

    /// Mark the next `count` pending records as persisted.
    pub fn mark_flushed(&self, count: usize) -> Result<(), TollgateError> {
        let mut state = self.lock()?;
        state.flushed = (state.flushed + count).min(state.history.len());
        Ok(())
    }

    /// Replay persisted records into metrics and history.
    ///
    /// Spend is not forwarded to budgets; budget state is restored from its
    /// own snapshot.
    pub fn restore(&self, records: Vec<CostRecord>) -> Result<(), TollgateError> {
        let mut state = self.lock()?;
        let count = records.len();
        for record in &records {
            state.metrics.apply(record);
        }
        let live = std::mem::take(&mut state.history);
        state.history = History::from_records(records.into_iter().chain(live.iter().cloned()));
        state.flushed += count;
        info!(records = count, "cost history restored");
        Ok(())
    }

    /// Drop persisted records older than `cutoff`. Running totals are kept.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, TollgateError> {
        let mut state = self.lock()?;
        let flushed = state.flushed;
        let expired = state
            .history
            .iter()
            .take(flushed)
            .filter(|r| r.timestamp < cutoff)
            .count();
        if expired == 0 {
            return Ok(0);
        }
        let kept: Vec<CostRecord> = state
            .history
            .iter()
            .take(flushed)
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect();
        state.flushed = kept.len();
        let pending = state.history.copy_from(flushed);
        state.history = History::from_records(kept.into_iter().chain(pending));
        debug!(removed = expired, "pruned cost history");
        Ok(expired)
    }

    /// Number of records held in memory.
    pub fn history_len(&self) -> Result<usize, TollgateError> {
        Ok(self.lock()?.history.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, TrackerState>, TollgateError> {
        self.state
            .lock()
            .map_err(|_| TollgateError::Internal("cost tracker lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tollgate_core::{BudgetScope, BudgetSpec, PeriodKind, TokenUsage};
    use tollgate_test_utils::{ManualClock, fixtures};

    fn tracker() -> (Arc<BudgetManager>, CostTracker) {
        let clock = Arc::new(ManualClock::new(fixtures::epoch()));
        let calculator = Arc::new(CostCalculator::new(fixtures::pricing_table(), 0.5, "USD"));
        let budgets = Arc::new(BudgetManager::new(clock));
        let tracker = CostTracker::new(calculator, Arc::clone(&budgets));
        (budgets, tracker)
    }

    fn event(model: &str, user: &str, minutes: i64) -> TokenUsageEvent {
        fixtures::usage_event(
            model,
            1_000_000,
            0,
            fixtures::epoch() + Duration::minutes(minutes),
        )
        .with_user(user)
    }

    #[test]
    fn record_updates_totals_and_breakdowns() {
        let (_, t) = tracker();
        t.record_operation(&event("model-a", "alice", 1)).unwrap();
        t.record_operation(&event("model-b", "alice", 2)).unwrap();
        t.record_operation(&event("model-b", "bob", 3)).unwrap();

        let m = t.snapshot(&MetricsFilter::default()).unwrap();
        assert_eq!(m.total_requests, 3);
        assert!((m.total_cost - (0.075 + 3.0 + 3.0)).abs() < 1e-9);
        assert_eq!(m.by_model["model-b"].requests, 2);
        assert!((m.by_user["alice"].cost - 3.075).abs() < 1e-9);
        assert_eq!(m.by_operation[&OperationKind::Generation].requests, 3);
        assert_eq!(m.total_tokens, 3_000_000);
        assert!((m.average_cost_per_request() - 6.075 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn cache_hit_rate_counts_events_with_cached_tokens() {
        let (_, t) = tracker();
        let mut cached = fixtures::usage_event("model-a", 100, 10, fixtures::epoch());
        cached.usage = TokenUsage::new(100, 10, 40).unwrap();
        t.record_operation(&cached).unwrap();
        t.record_operation(&fixtures::usage_event("model-a", 100, 10, fixtures::epoch()))
            .unwrap();

        let m = t.snapshot(&MetricsFilter::default()).unwrap();
        assert_eq!(m.cache_hits, 1);
        assert!((m.cache_hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(m.cached_tokens, 40);
        assert!(m.cache_savings > 0.0);
    }

    #[test]
    fn empty_metrics_are_neutral() {
        let (_, t) = tracker();
        let m = t.snapshot(&MetricsFilter::default()).unwrap();
        assert_eq!(m.total_requests, 0);
        assert_eq!(m.cache_hit_rate, 0.0);
        assert_eq!(m.average_cost_per_request(), 0.0);
    }

    #[test]
    fn filtered_snapshot_uses_history() {
        let (_, t) = tracker();
        t.record_operation(&event("model-a", "alice", 1)).unwrap();
        t.record_operation(&event("model-a", "bob", 10)).unwrap();
        t.record_operation(&event("model-a", "alice", 20)).unwrap();

        let alice = t
            .snapshot(&MetricsFilter {
                user_id: Some("alice".into()),
                ..MetricsFilter::default()
            })
            .unwrap();
        assert_eq!(alice.total_requests, 2);

        let window = t
            .snapshot(&MetricsFilter {
                start: Some(fixtures::epoch() + Duration::minutes(5)),
                end: Some(fixtures::epoch() + Duration::minutes(20)),
                user_id: None,
            })
            .unwrap();
        assert_eq!(window.total_requests, 1);
        assert!(window.by_user.contains_key("bob"));
    }

    #[test]
    fn unknown_model_mutates_nothing() {
        let (budgets, t) = tracker();
        budgets
            .create_budget(BudgetSpec {
                name: "all".into(),
                limit: 10.0,
                period: PeriodKind::Monthly,
                thresholds: vec![],
                scope: BudgetScope::global(),
                hard_limit: false,
            })
            .unwrap();
        let err = t
            .record_operation(&event("unknown", "alice", 1))
            .unwrap_err();
        assert!(matches!(err, TollgateError::UnknownModel { .. }));
        assert_eq!(t.history_len().unwrap(), 0);
        assert_eq!(budgets.status("all").unwrap().current_spend, 0.0);
    }

    #[test]
    fn spend_is_forwarded_to_matching_budgets() {
        let (budgets, t) = tracker();
        budgets
            .create_budget(BudgetSpec {
                name: "search".into(),
                limit: 1.0,
                period: PeriodKind::Daily,
                thresholds: vec![50.0],
                scope: BudgetScope {
                    user_id: None,
                    feature: Some("search".into()),
                },
                hard_limit: false,
            })
            .unwrap();

        let recorded = t
            .record_operation(&event("model-b", "alice", 1).with_feature("search"))
            .unwrap();
        assert_eq!(recorded.alerts.len(), 1);
        t.record_operation(&event("model-b", "alice", 2)).unwrap();
        assert!((budgets.status("search").unwrap().current_spend - 3.0).abs() < 1e-9);
    }

    #[test]
    fn flush_cursor_and_prune() {
        let (_, t) = tracker();
        t.record_operation(&event("model-a", "alice", 0)).unwrap();
        t.record_operation(&event("model-a", "alice", 60)).unwrap();
        assert_eq!(t.pending().unwrap().len(), 2);

        t.mark_flushed(2).unwrap();
        t.record_operation(&event("model-a", "alice", 5)).unwrap();
        assert_eq!(t.pending().unwrap().len(), 1);

        // Only flushed records older than the cutoff go.
        let removed = t
            .prune(fixtures::epoch() + Duration::minutes(30))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(t.history_len().unwrap(), 2);
        assert_eq!(t.pending().unwrap().len(), 1);
        // Running totals survive pruning.
        assert_eq!(
            t.snapshot(&MetricsFilter::default())
                .unwrap()
                .total_requests,
            3
        );
    }

    #[test]
    fn history_spans_chunk_boundaries() {
        let (_, t) = tracker();
        let n = CHUNK_LEN + 5;
        for i in 0..n {
            let user = if i % 2 == 0 { "alice" } else { "bob" };
            t.record_operation(&event("model-a", user, i as i64)).unwrap();
        }
        assert_eq!(t.history_len().unwrap(), n);

        let at = |minutes: usize| fixtures::epoch() + Duration::minutes(minutes as i64);
        t.mark_flushed(CHUNK_LEN - 2).unwrap();
        let pending = t.pending().unwrap();
        assert_eq!(pending.len(), 7);
        assert_eq!(pending[0].timestamp, at(CHUNK_LEN - 2));
        assert_eq!(pending[6].timestamp, at(n - 1));

        let between = t
            .records_between(at(CHUNK_LEN - 3), at(CHUNK_LEN + 2))
            .unwrap();
        let stamps: Vec<_> = between.iter().map(|r| r.timestamp).collect();
        assert_eq!(
            stamps,
            (CHUNK_LEN - 3..CHUNK_LEN + 2).map(at).collect::<Vec<_>>()
        );

        let alice = t
            .snapshot(&MetricsFilter {
                user_id: Some("alice".into()),
                ..MetricsFilter::default()
            })
            .unwrap();
        assert_eq!(alice.total_requests, n.div_ceil(2) as u64);

        assert_eq!(t.prune(at(10)).unwrap(), 10);
        assert_eq!(t.history_len().unwrap(), n - 10);
        let pending = t.pending().unwrap();
        assert_eq!(pending.len(), 7);
        assert_eq!(pending[0].timestamp, at(CHUNK_LEN - 2));
        assert_eq!(t.records_between(at(0), at(n)).unwrap()[0].timestamp, at(10));
    }

    #[test]
    fn restore_replays_without_touching_budgets() {
        let (budgets, t) = tracker();
        budgets
            .create_budget(BudgetSpec {
                name: "all".into(),
                limit: 10.0,
                period: PeriodKind::Monthly,
                thresholds: vec![],
                scope: BudgetScope::global(),
                hard_limit: false,
            })
            .unwrap();
        let records = vec![
            fixtures::cost_record("model-a", 1.0, fixtures::epoch()),
            fixtures::cost_record("model-b", 2.0, fixtures::epoch() + Duration::hours(1)),
        ];
        t.restore(records).unwrap();

        let m = t.snapshot(&MetricsFilter::default()).unwrap();
        assert_eq!(m.total_requests, 2);
        assert!((m.total_cost - 3.0).abs() < 1e-9);
        assert!(t.pending().unwrap().is_empty());
        assert_eq!(budgets.status("all").unwrap().current_spend, 0.0);

        let between = t
            .records_between(fixtures::epoch(), fixtures::epoch() + Duration::hours(2))
            .unwrap();
        assert_eq!(between.len(), 2);
    }

    #[test]
    fn concurrent_recording_loses_no_updates() {
        let (budgets, t) = tracker();
        budgets
            .create_budget(BudgetSpec {
                name: "all".into(),
                limit: 1_000_000.0,
                period: PeriodKind::Monthly,
                thresholds: vec![100.0],
                scope: BudgetScope::global(),
                hard_limit: false,
            })
            .unwrap();
        let t = Arc::new(t);

        let workers = 8;
        let per_worker = 250;
        let handles: Vec<_> = (0..workers)
            .map(|w| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || {
                    for i in 0..per_worker {
                        // 1M prompt tokens on model-b costs exactly 3.0.
                        t.record_operation(&event("model-b", &format!("u{w}"), i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let total = (workers * per_worker) as f64 * 3.0;
        let m = t.snapshot(&MetricsFilter::default()).unwrap();
        assert_eq!(m.total_requests, (workers * per_worker) as u64);
        assert_eq!(m.total_cost, total);
        assert_eq!(budgets.status("all").unwrap().current_spend, total);
    }
}
