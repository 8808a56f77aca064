// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The engine facade and its lifecycle.
//!
//! One `CostEngine` is built at process start and shared by handle. Its
//! lifecycle is explicit: `new` wires the components, `restore` loads
//! persisted state, `start` spawns the periodic flush, `shutdown` stops it
//! and writes a final flush.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tollgate_config::TollgateConfig;
use tollgate_config::model::AnalyticsConfig;
use tollgate_core::{
    Budget, BudgetAlert, BudgetSpec, BudgetStatus, Clock, CostRecord, CostStore, PeriodKind,
    PricingEntry, SpendDimensions, SystemClock, TokenUsageEvent, TollgateError,
};

use crate::analyzer::{self, Anomaly, CostBreakdown, CostReport, TrendAnalysis};
use crate::budget::{AlertFilter, BudgetManager};
use crate::flush::{FlushReport, FlushWorker};
use crate::pricing::{self, CostCalculator, MonthlyProjection, Quote};
use crate::tracker::{AggregateMetrics, CostTracker, MetricsFilter, Recorded};

/// Cost aggregation and budget engine.
pub struct CostEngine {
    clock: Arc<dyn Clock>,
    calculator: Arc<CostCalculator>,
    budgets: Arc<BudgetManager>,
    tracker: Arc<CostTracker>,
    flusher: Arc<FlushWorker>,
    store: Arc<dyn CostStore>,
    analytics: AnalyticsConfig,
    flush_interval: Duration,
    task: Mutex<Option<FlushTask>>,
}

/// The running periodic flush and the token that stops it.
struct FlushTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl CostEngine {
    /// Wire the engine from configuration. Budgets declared in config are created.
    pub fn new(
        config: &TollgateConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn CostStore>,
    ) -> Result<Self, TollgateError> {
        pricing::validate_table(&config.pricing.models)?;
        let calculator = Arc::new(CostCalculator::new(
            config.pricing.models.clone(),
            config.engine.cache_discount,
            config.engine.currency.clone(),
        ));
        let budgets = Arc::new(BudgetManager::new(Arc::clone(&clock)));
        let tracker = Arc::new(CostTracker::new(
            Arc::clone(&calculator),
            Arc::clone(&budgets),
        ));
        let flusher = Arc::new(FlushWorker::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            Arc::clone(&budgets),
            Arc::clone(&clock),
            config.engine.flush_failure_escalation,
            config.engine.history_retention_days,
        ));

        for budget in &config.budgets {
            budgets.create_budget(budget.to_spec())?;
        }

        Ok(Self {
            clock,
            calculator,
            budgets,
            tracker,
            flusher,
            store,
            analytics: config.analytics.clone(),
            flush_interval: Duration::from_secs(config.engine.flush_interval_secs.max(1)),
            task: Mutex::new(None),
        })
    }

    /// Wire the engine against wall-clock time.
    pub fn with_system_clock(
        config: &TollgateConfig,
        store: Arc<dyn CostStore>,
    ) -> Result<Self, TollgateError> {
        Self::new(config, Arc::new(SystemClock), store)
    }

    /// Load records, budgets and alerts from the store.
    ///
    /// Call before ingesting anything.
    pub async fn restore(&self) -> Result<(), TollgateError> {
        let state = self.store.restore().await?;
        self.tracker.restore(state.records)?;
        self.budgets.restore(state.budgets, state.alerts)?;
        Ok(())
    }

    /// Spawn the periodic flush onto the current Tokio runtime.
    ///
    /// May be called again after `shutdown`.
    pub fn start(&self) -> Result<(), TollgateError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TollgateError::Internal(format!("no tokio runtime: {e}")))?;
        let mut task = self.lock_task()?;
        if task.is_some() {
            warn!("flush task already running");
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let flusher = Arc::clone(&self.flusher);
        let handle = runtime.spawn(flusher.run(self.flush_interval, cancel.clone()));
        *task = Some(FlushTask { handle, cancel });
        info!(
            store = self.flusher.store_name(),
            interval_secs = self.flush_interval.as_secs(),
            "cost engine started"
        );
        Ok(())
    }

    /// Stop the periodic flush and persist whatever is left.
    pub async fn shutdown(&self) -> Result<FlushReport, TollgateError> {
        let task = self.lock_task()?.take();
        if let Some(task) = task {
            task.cancel.cancel();
            task.handle
                .await
                .map_err(|e| TollgateError::Internal(format!("flush task failed: {e}")))?;
        }
        let report = self.flusher.flush().await?;
        info!("cost engine stopped");
        Ok(report)
    }

    /// Flush now, outside the schedule.
    pub async fn flush(&self) -> Result<FlushReport, TollgateError> {
        self.flusher.flush().await
    }

    pub fn consecutive_flush_failures(&self) -> u32 {
        self.flusher.consecutive_failures()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // --- pricing ---

    pub fn estimate(
        &self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<Quote, TollgateError> {
        self.calculator.estimate(model, input_tokens, output_tokens)
    }

    pub fn price(
        &self,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        cached_tokens: u64,
    ) -> Result<Quote, TollgateError> {
        self.calculator
            .price(model, prompt_tokens, completion_tokens, cached_tokens)
    }

    pub fn compare_models(
        &self,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> BTreeMap<String, f64> {
        self.calculator.compare_models(prompt_tokens, completion_tokens)
    }

    pub fn project_monthly(
        &self,
        daily_requests: u64,
        avg_prompt_tokens: u64,
        avg_completion_tokens: u64,
        model: &str,
    ) -> Result<MonthlyProjection, TollgateError> {
        self.calculator
            .project_monthly(daily_requests, avg_prompt_tokens, avg_completion_tokens, model)
    }

    /// Replace the pricing table without pausing ingestion.
    pub fn swap_pricing(
        &self,
        models: BTreeMap<String, PricingEntry>,
    ) -> Result<(), TollgateError> {
        self.calculator.swap(models)
    }

    // --- ingestion ---

    pub fn record_operation(&self, event: &TokenUsageEvent) -> Result<Recorded, TollgateError> {
        self.tracker.record_operation(event)
    }

    pub fn metrics(&self, filter: &MetricsFilter) -> Result<AggregateMetrics, TollgateError> {
        self.tracker.snapshot(filter)
    }

    /// History with `start <= timestamp < end`, oldest first.
    pub fn records(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CostRecord>, TollgateError> {
        self.tracker.records_between(start, end)
    }

    // --- budgets ---

    pub fn create_budget(&self, spec: BudgetSpec) -> Result<Budget, TollgateError> {
        self.budgets.create_budget(spec)
    }

    pub fn delete_budget(&self, name: &str) -> Result<(), TollgateError> {
        self.budgets.delete_budget(name)
    }

    pub fn list_budgets(&self) -> Result<Vec<Budget>, TollgateError> {
        self.budgets.list_budgets()
    }

    pub fn budget_status(&self, name: &str) -> Result<BudgetStatus, TollgateError> {
        self.budgets.status(name)
    }

    pub fn record_spend(
        &self,
        amount: f64,
        dims: &SpendDimensions,
    ) -> Result<Vec<BudgetAlert>, TollgateError> {
        self.budgets.record_spend(amount, dims)
    }

    pub fn check(&self, dims: &SpendDimensions) -> Result<(), TollgateError> {
        self.budgets.check(dims)
    }

    pub fn alerts(&self, filter: AlertFilter) -> Result<Vec<BudgetAlert>, TollgateError> {
        self.budgets.alerts(filter)
    }

    pub fn acknowledge(&self, alert_id: &str) -> Result<BudgetAlert, TollgateError> {
        self.budgets.acknowledge(alert_id)
    }

    // --- analytics ---

    pub fn breakdown(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CostBreakdown, TollgateError> {
        let records = self.tracker.records_between(start, end)?;
        Ok(analyzer::breakdown(&records, start, end))
    }

    /// Trend over `num_periods` buckets ending now.
    pub fn trend(
        &self,
        period: PeriodKind,
        num_periods: u32,
    ) -> Result<TrendAnalysis, TollgateError> {
        let now = self.clock.now();
        let records = self
            .tracker
            .records_between(period.rewind(now, num_periods), DateTime::<Utc>::MAX_UTC)?;
        Ok(analyzer::trend(
            &records,
            period,
            num_periods,
            now,
            self.analytics.trend_dead_zone_percent,
        ))
    }

    /// Anomalies in `series`, using the configured threshold unless one is given.
    pub fn anomalies(&self, series: &[f64], z_threshold: Option<f64>) -> Vec<Anomaly> {
        analyzer::anomalies(
            series,
            z_threshold.unwrap_or(self.analytics.anomaly_z_threshold),
        )
    }

    pub fn report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CostReport, TollgateError> {
        let trend_start = self
            .analytics
            .trend_period
            .rewind(end, self.analytics.trend_periods);
        let records = self
            .tracker
            .records_between(start.min(trend_start), DateTime::<Utc>::MAX_UTC)?;
        Ok(analyzer::report(&records, start, end, &self.analytics))
    }

    fn lock_task(&self) -> Result<MutexGuard<'_, Option<FlushTask>>, TollgateError> {
        self.task
            .lock()
            .map_err(|_| TollgateError::Internal("engine task lock poisoned".into()))
    }
}
