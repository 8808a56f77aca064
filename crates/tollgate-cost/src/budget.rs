// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Budget state machine with lazy calendar-aligned rollover.
//!
//! Each budget sits behind its own lock, so spend against unrelated budgets
//! never serializes. A spend that matches several budgets locks them in name
//! order, applies the amount to all of them, and only then releases them.
//!
//! A budget is always `ACTIVE(period)`. The first spend, status read or
//! check after `period_end` moves it to the period containing "now", with
//! spend reset to zero and every threshold re-armed.
//!
//! Every change to a budget or alert bumps a revision in a change log. A
//! flush takes the changed entries with their revisions and, once stored,
//! settles only the revisions it saw.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tollgate_core::{
    AlertSeverity, Budget, BudgetAlert, BudgetScope, BudgetSpec, BudgetStatus, Clock,
    SpendDimensions, TollgateError,
};

/// Slack for floating-point sums landing a hair under a threshold.
const PERCENT_EPSILON: f64 = 1e-9;

/// Filter for [`BudgetManager::alerts`]. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub acknowledged: Option<bool>,
    pub severity: Option<AlertSeverity>,
}

struct BudgetSlot {
    scope: BudgetScope,
    state: Mutex<Budget>,
}

impl BudgetSlot {
    fn new(budget: Budget) -> Self {
        Self {
            scope: budget.scope.clone(),
            state: Mutex::new(budget),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Budget>, TollgateError> {
        self.state
            .lock()
            .map_err(|_| TollgateError::Internal("budget lock poisoned".into()))
    }
}

/// Keys changed since they were last persisted.
#[derive(Debug, Default)]
struct ChangeLog {
    revision: u64,
    changed: HashMap<String, u64>,
}

impl ChangeLog {
    fn mark(&mut self, key: &str) {
        self.revision += 1;
        self.changed.insert(key.to_string(), self.revision);
    }

    fn marks(&self) -> Vec<(String, u64)> {
        self.changed
            .iter()
            .map(|(k, rev)| (k.clone(), *rev))
            .collect()
    }

    /// Forget keys not changed again since `persisted` was taken.
    fn settle(&mut self, persisted: &[(String, u64)]) {
        for (key, revision) in persisted {
            if self.changed.get(key) == Some(revision) {
                self.changed.remove(key);
            }
        }
    }
}

#[derive(Debug, Default)]
struct AlertLog {
    entries: Vec<BudgetAlert>,
    changes: ChangeLog,
}

/// Budgets, alerts and deletions not yet accepted by the store.
#[derive(Debug, Clone, Default)]
pub struct PendingChanges {
    pub budgets: Vec<Budget>,
    pub alerts: Vec<BudgetAlert>,
    pub deleted: Vec<String>,
    budget_revisions: Vec<(String, u64)>,
    alert_revisions: Vec<(String, u64)>,
}

/// Owns every named budget and the alert log.
pub struct BudgetManager {
    clock: Arc<dyn Clock>,
    budgets: DashMap<String, Arc<BudgetSlot>>,
    alerts: Mutex<AlertLog>,
    changed: Mutex<ChangeLog>,
    deleted: Mutex<Vec<String>>,
}

impl BudgetManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            budgets: DashMap::new(),
            alerts: Mutex::new(AlertLog::default()),
            changed: Mutex::new(ChangeLog::default()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Create a budget whose first period is the one containing "now".
    pub fn create_budget(&self, spec: BudgetSpec) -> Result<Budget, TollgateError> {
        let thresholds = validate_spec(&spec)?;
        let now = self.clock.now();
        let budget = Budget {
            name: spec.name.clone(),
            limit: spec.limit,
            period: spec.period,
            scope: spec.scope,
            thresholds,
            hard_limit: spec.hard_limit,
            period_start: spec.period.start_of(now),
            current_spend: 0.0,
            fired_thresholds: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        match self.budgets.entry(spec.name.clone()) {
            Entry::Occupied(_) => return Err(TollgateError::DuplicateBudget { name: spec.name }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(BudgetSlot::new(budget.clone())));
            }
        }
        lock(&self.deleted)?.retain(|n| n != &budget.name);
        self.mark_changed(&budget.name)?;

        info!(
            budget = %budget.name,
            limit = budget.limit,
            period = %budget.period,
            "budget created"
        );
        Ok(budget)
    }

    /// Remove a budget. Its alerts stay in the log.
    pub fn delete_budget(&self, name: &str) -> Result<(), TollgateError> {
        if self.budgets.remove(name).is_none() {
            return Err(TollgateError::BudgetNotFound {
                name: name.to_string(),
            });
        }
        lock(&self.deleted)?.push(name.to_string());
        info!(budget = %name, "budget deleted");
        Ok(())
    }

    /// Every budget, rolled forward to the current period, sorted by name.
    pub fn list_budgets(&self) -> Result<Vec<Budget>, TollgateError> {
        let now = self.clock.now();
        let mut out = Vec::with_capacity(self.budgets.len());
        for slot in self.slots(|_| true) {
            let mut budget = slot.lock()?;
            if roll_over(&mut budget, now) {
                self.mark_changed(&budget.name)?;
            }
            out.push(budget.clone());
        }
        Ok(out)
    }

    /// Current-period status. Rolls the period forward first.
    pub fn status(&self, name: &str) -> Result<BudgetStatus, TollgateError> {
        let slot = self
            .budgets
            .get(name)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| TollgateError::BudgetNotFound {
                name: name.to_string(),
            })?;
        let mut budget = slot.lock()?;
        if roll_over(&mut budget, self.clock.now()) {
            self.mark_changed(&budget.name)?;
        }
        Ok(budget.status())
    }

    /// Apply spend to every budget whose scope matches `dims`.
    ///
    /// Returns the alerts fired by this call across all matching budgets.
    pub fn record_spend(
        &self,
        amount: f64,
        dims: &SpendDimensions,
    ) -> Result<Vec<BudgetAlert>, TollgateError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(TollgateError::InvalidUsage(format!(
                "spend amount must be finite and non-negative, got {amount}"
            )));
        }
        self.apply_spend(amount, dims)
    }

    /// Spend application without input checks.
    ///
    /// Every matching budget is locked before any of them changes, so a
    /// poisoned lock leaves all state untouched.
    pub(crate) fn apply_spend(
        &self,
        amount: f64,
        dims: &SpendDimensions,
    ) -> Result<Vec<BudgetAlert>, TollgateError> {
        let now = self.clock.now();
        let slots = self.slots(|scope| scope.matches(dims));
        if slots.is_empty() {
            return Ok(Vec::new());
        }
        let mut guards = slots
            .iter()
            .map(|slot| slot.lock())
            .collect::<Result<Vec<_>, _>>()?;
        let mut alert_log = lock(&self.alerts)?;
        let mut changed = lock(&self.changed)?;

        let mut fired = Vec::new();
        for budget in guards.iter_mut() {
            roll_over(budget, now);
            budget.current_spend += amount;
            budget.updated_at = now;
            changed.mark(&budget.name);
            fire_thresholds(budget, now, &mut fired);

            debug!(
                budget = %budget.name,
                amount,
                spend = budget.current_spend,
                "spend applied"
            );
            #[cfg(feature = "prometheus")]
            tollgate_prometheus::set_budget_spend(&budget.name, budget.current_spend);
        }
        for alert in &fired {
            alert_log.changes.mark(&alert.id);
            alert_log.entries.push(alert.clone());
        }
        Ok(fired)
    }

    /// Pre-flight enforcement for hard-limit budgets.
    ///
    /// Fails with `BudgetExhausted` when any matching hard-limit budget has
    /// spent its whole limit in the current period. Soft budgets only alert.
    pub fn check(&self, dims: &SpendDimensions) -> Result<(), TollgateError> {
        let now = self.clock.now();
        for slot in self.slots(|scope| scope.matches(dims)) {
            let mut budget = slot.lock()?;
            if !budget.hard_limit {
                continue;
            }
            if roll_over(&mut budget, now) {
                self.mark_changed(&budget.name)?;
            }
            if budget.current_spend >= budget.limit {
                return Err(TollgateError::BudgetExhausted {
                    name: budget.name.clone(),
                    message: format!(
                        "{:.2} of {:.2} spent this {} period, resets at {}",
                        budget.current_spend,
                        budget.limit,
                        budget.period,
                        budget.period_end().to_rfc3339()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Alerts matching `filter`, oldest first.
    pub fn alerts(&self, filter: AlertFilter) -> Result<Vec<BudgetAlert>, TollgateError> {
        Ok(lock(&self.alerts)?
            .entries
            .iter()
            .filter(|a| filter.acknowledged.is_none_or(|ack| a.acknowledged == ack))
            .filter(|a| filter.severity.is_none_or(|sev| a.severity == sev))
            .cloned()
            .collect())
    }

    /// Mark an alert as acknowledged. Idempotent.
    pub fn acknowledge(&self, id: &str) -> Result<BudgetAlert, TollgateError> {
        let mut log = lock(&self.alerts)?;
        let AlertLog { entries, changes } = &mut *log;
        let alert = entries
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| TollgateError::AlertNotFound { id: id.to_string() })?;
        if !alert.acknowledged {
            alert.acknowledged = true;
            changes.mark(id);
        }
        Ok(alert.clone())
    }

    /// Everything changed since the last [`settle`](Self::settle).
    pub fn pending_changes(&self) -> Result<PendingChanges, TollgateError> {
        let budget_revisions = lock(&self.changed)?.marks();
        let mut budgets = Vec::with_capacity(budget_revisions.len());
        for (name, _) in &budget_revisions {
            let slot = self.budgets.get(name).map(|s| Arc::clone(s.value()));
            if let Some(slot) = slot {
                budgets.push(slot.lock()?.clone());
            }
        }
        budgets.sort_by(|a, b| a.name.cmp(&b.name));

        let log = lock(&self.alerts)?;
        let alert_revisions = log.changes.marks();
        let alerts: Vec<BudgetAlert> = log
            .entries
            .iter()
            .filter(|a| log.changes.changed.contains_key(&a.id))
            .cloned()
            .collect();
        drop(log);

        Ok(PendingChanges {
            budgets,
            alerts,
            deleted: lock(&self.deleted)?.clone(),
            budget_revisions,
            alert_revisions,
        })
    }

    /// Mark `persisted` as stored. Anything changed after it was taken stays pending.
    pub fn settle(&self, persisted: &PendingChanges) -> Result<(), TollgateError> {
        lock(&self.changed)?.settle(&persisted.budget_revisions);
        lock(&self.alerts)?.changes.settle(&persisted.alert_revisions);
        lock(&self.deleted)?.retain(|n| !persisted.deleted.contains(n));
        Ok(())
    }

    /// Load persisted budgets and alerts.
    ///
    /// A stored budget whose name and period kind match an existing one
    /// (declared in configuration) keeps the existing limit, scope and
    /// thresholds but resumes the stored period, spend and fired set.
    /// Otherwise the stored budget is installed as-is.
    pub fn restore(
        &self,
        budgets: Vec<Budget>,
        alerts: Vec<BudgetAlert>,
    ) -> Result<(), TollgateError> {
        let restored = budgets.len();
        for stored in budgets {
            let existing = self.budgets.get(&stored.name).map(|s| Arc::clone(s.value()));
            match existing {
                Some(slot) => {
                    let mut current = slot.lock()?;
                    self.mark_changed(&current.name)?;
                    if current.period == stored.period {
                        current.period_start = stored.period_start;
                        current.current_spend = stored.current_spend;
                        current.created_at = stored.created_at;
                        current.updated_at = stored.updated_at;
                        let thresholds = current.thresholds.clone();
                        current.fired_thresholds = stored
                            .fired_thresholds
                            .into_iter()
                            .filter(|t| thresholds.contains(t))
                            .collect();
                    } else {
                        debug!(budget = %stored.name, "period changed, stored state discarded");
                    }
                }
                None => {
                    self.budgets
                        .insert(stored.name.clone(), Arc::new(BudgetSlot::new(stored)));
                }
            }
        }

        let mut log = lock(&self.alerts)?;
        for alert in alerts {
            if !log.entries.iter().any(|a| a.id == alert.id) {
                log.entries.push(alert);
            }
        }
        log.entries.sort_by_key(|a| a.timestamp);
        info!(
            budgets = restored,
            alerts = log.entries.len(),
            "budget state restored"
        );
        Ok(())
    }

    fn mark_changed(&self, name: &str) -> Result<(), TollgateError> {
        lock(&self.changed)?.mark(name);
        Ok(())
    }

    /// Matching slots, sorted by name so multi-budget locking has one order.
    fn slots(&self, keep: impl Fn(&BudgetScope) -> bool) -> Vec<Arc<BudgetSlot>> {
        let mut slots: Vec<(String, Arc<BudgetSlot>)> = self
            .budgets
            .iter()
            .filter(|e| keep(&e.value().scope))
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        slots.into_iter().map(|(_, slot)| slot).collect()
    }
}

fn lock<T>(inner: &Mutex<T>) -> Result<MutexGuard<'_, T>, TollgateError> {
    inner
        .lock()
        .map_err(|_| TollgateError::Internal("budget manager lock poisoned".into()))
}

/// Check creation parameters. Returns thresholds sorted and deduplicated.
fn validate_spec(spec: &BudgetSpec) -> Result<Vec<f64>, TollgateError> {
    if spec.name.trim().is_empty() {
        return Err(TollgateError::InvalidConfiguration(
            "budget name must not be empty".into(),
        ));
    }
    if !spec.limit.is_finite() || spec.limit <= 0.0 {
        return Err(TollgateError::InvalidConfiguration(format!(
            "budget `{}` limit must be greater than 0, got {}",
            spec.name, spec.limit
        )));
    }
    if let Some(bad) = spec
        .thresholds
        .iter()
        .find(|t| !t.is_finite() || **t <= 0.0 || **t > 100.0)
    {
        return Err(TollgateError::InvalidConfiguration(format!(
            "budget `{}` threshold {bad} is outside (0, 100]",
            spec.name
        )));
    }
    let mut thresholds = spec.thresholds.clone();
    thresholds.sort_by(f64::total_cmp);
    thresholds.dedup();
    Ok(thresholds)
}

/// Move the budget to the period containing `now` if its period has ended.
///
/// Returns whether it moved.
fn roll_over(budget: &mut Budget, now: DateTime<Utc>) -> bool {
    if now < budget.period_end() {
        return false;
    }
    let previous = budget.current_spend;
    budget.period_start = budget.period.start_of(now);
    budget.current_spend = 0.0;
    budget.fired_thresholds.clear();
    budget.updated_at = now;
    info!(
        budget = %budget.name,
        previous_spend = previous,
        period_start = %budget.period_start,
        "budget period rolled over"
    );
    true
}

/// Fire every armed threshold the current spend has reached, lowest first.
fn fire_thresholds(budget: &mut Budget, now: DateTime<Utc>, fired: &mut Vec<BudgetAlert>) {
    let percent = budget.percent_used();
    let crossed: Vec<f64> = budget
        .thresholds
        .iter()
        .copied()
        .filter(|t| percent + PERCENT_EPSILON >= *t && !budget.has_fired(*t))
        .collect();

    for threshold in crossed {
        budget.fired_thresholds.push(threshold);
        let severity = AlertSeverity::for_threshold(threshold);
        let alert = BudgetAlert {
            id: uuid::Uuid::new_v4().to_string(),
            budget_name: budget.name.clone(),
            severity,
            message: format!(
                "budget `{}` reached {threshold}% of its {} limit ({:.2} of {:.2})",
                budget.name, budget.period, budget.current_spend, budget.limit
            ),
            spent: budget.current_spend,
            limit: budget.limit,
            remaining: budget.remaining(),
            threshold_percent: threshold,
            period_start: budget.period_start,
            timestamp: now,
            acknowledged: false,
        };
        warn!(
            budget = %alert.budget_name,
            threshold,
            severity = %severity,
            spent = alert.spent,
            "budget threshold crossed"
        );
        #[cfg(feature = "prometheus")]
        tollgate_prometheus::record_alert(&alert.budget_name, severity);
        fired.push(alert);
    }
}
