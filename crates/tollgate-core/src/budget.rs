// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Budget and alert data model.
//!
//! The state machine that mutates these values lives in `tollgate-cost`;
//! the types live here so persistence backends can store and restore them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::period::PeriodKind;
use crate::types::SpendDimensions;

/// Which spend a budget counts. An empty scope is global.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetScope {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub feature: Option<String>,
}

impl BudgetScope {
    /// A scope that matches every spend.
    pub fn global() -> Self {
        Self::default()
    }

    pub fn is_global(&self) -> bool {
        self.user_id.is_none() && self.feature.is_none()
    }

    /// Whether spend with these dimensions counts against this scope.
    ///
    /// Every set field must match exactly; unset fields match anything.
    pub fn matches(&self, dims: &SpendDimensions) -> bool {
        if let Some(user) = &self.user_id
            && dims.user_id.as_deref() != Some(user.as_str())
        {
            return false;
        }
        if let Some(feature) = &self.feature
            && dims.feature_tag().as_deref() != Some(feature.as_str())
        {
            return false;
        }
        true
    }
}

/// Caller-supplied parameters for creating a budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSpec {
    pub name: String,
    pub limit: f64,
    pub period: PeriodKind,
    /// Alert thresholds as percentages of `limit`, each in (0, 100].
    pub thresholds: Vec<f64>,
    #[serde(default)]
    pub scope: BudgetScope,
    /// Whether `check` refuses further spend once the limit is reached.
    #[serde(default)]
    pub hard_limit: bool,
}

/// A named spending limit and its current-period state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub name: String,
    pub limit: f64,
    pub period: PeriodKind,
    pub scope: BudgetScope,
    /// Sorted ascending, deduplicated.
    pub thresholds: Vec<f64>,
    pub hard_limit: bool,
    pub period_start: DateTime<Utc>,
    /// Spend in the current period. Resets to 0 at rollover.
    pub current_spend: f64,
    /// Thresholds already fired in the current period.
    pub fired_thresholds: Vec<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Budget {
    /// End (exclusive) of the current period.
    pub fn period_end(&self) -> DateTime<Utc> {
        self.period.end_of(self.period_start)
    }

    /// Spend as a percentage of the limit.
    pub fn percent_used(&self) -> f64 {
        if self.limit > 0.0 {
            self.current_spend / self.limit * 100.0
        } else {
            0.0
        }
    }

    /// Limit minus spend, floored at zero.
    pub fn remaining(&self) -> f64 {
        (self.limit - self.current_spend).max(0.0)
    }

    pub fn has_fired(&self, threshold: f64) -> bool {
        self.fired_thresholds.contains(&threshold)
    }

    /// Point-in-time status view.
    pub fn status(&self) -> BudgetStatus {
        BudgetStatus {
            name: self.name.clone(),
            current_spend: self.current_spend,
            limit: self.limit,
            remaining: self.remaining(),
            percent_used: self.percent_used(),
            period: self.period,
            period_start: self.period_start,
            period_end: self.period_end(),
            over_budget: self.current_spend >= self.limit,
        }
    }
}

/// Budget status as reported to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub name: String,
    pub current_spend: f64,
    pub limit: f64,
    pub remaining: f64,
    pub percent_used: f64,
    pub period: PeriodKind,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub over_budget: bool,
}

/// Alert severity, derived from the crossed threshold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertSeverity {
    /// Threshold below 90%.
    Info,
    /// Threshold at or above 90%.
    Warning,
    /// Threshold at or above 100%.
    Critical,
}

impl AlertSeverity {
    pub fn for_threshold(percent: f64) -> Self {
        if percent >= 100.0 {
            Self::Critical
        } else if percent >= 90.0 {
            Self::Warning
        } else {
            Self::Info
        }
    }
}

/// A threshold crossing. Created at most once per (budget, period, threshold).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    /// Unique alert identifier (UUID v4).
    pub id: String,
    pub budget_name: String,
    pub severity: AlertSeverity,
    pub message: String,
    /// Spend in the period when the threshold fired.
    pub spent: f64,
    pub limit: f64,
    pub remaining: f64,
    pub threshold_percent: f64,
    /// Start of the period the alert belongs to.
    pub period_start: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}
