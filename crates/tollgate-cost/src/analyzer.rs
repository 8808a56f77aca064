// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Breakdowns, trend classification, forecasting and anomaly detection.
//!
//! Everything here is a pure function of the records it is handed. The
//! forecast is an ordinary least-squares line through the bucket series,
//! evaluated one bucket past the end. Its band is the forecast plus or
//! minus one sample standard deviation of the series: a heuristic, not a
//! statistical interval.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use tollgate_config::model::AnalyticsConfig;
use tollgate_core::{CostRecord, OperationKind, PeriodKind};

use crate::pricing::DAYS_PER_MONTH;
use crate::tracker::{AggregateMetrics, BreakdownEntry};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Minimum series length for anomaly detection.
pub const MIN_ANOMALY_SAMPLE: usize = 3;

/// Costs grouped over `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_cost: f64,
    pub total_requests: u64,
    pub total_tokens: u64,
    /// 0 when there are no requests.
    pub average_cost_per_request: f64,
    pub by_model: BTreeMap<String, BreakdownEntry>,
    pub by_user: BTreeMap<String, BreakdownEntry>,
    pub by_operation: BTreeMap<OperationKind, BreakdownEntry>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

/// Cost inside one trend bucket `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cost: f64,
    pub requests: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub period: PeriodKind,
    /// Oldest first; the last bucket ends at the analysis anchor.
    pub buckets: Vec<TrendBucket>,
    pub direction: TrendDirection,
    /// Last bucket against the mean of the earlier ones.
    pub change_percent: f64,
    /// Predicted cost of the next bucket, never negative.
    pub forecast: f64,
    pub confidence_low: f64,
    pub confidence_high: f64,
    pub slope: f64,
    /// Goodness of fit in [0, 1]; 0 for a constant or too-short series.
    pub r_squared: f64,
}

/// A bucket whose cost sits more than the threshold away from the mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub index: usize,
    pub value: f64,
    pub z_score: f64,
}

/// Breakdown, trend, projection and anomalies in one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub breakdown: CostBreakdown,
    pub trend: TrendAnalysis,
    /// Breakdown total scaled to a 30-day month. 0 for an empty range.
    pub monthly_projection: f64,
    pub anomalies: Vec<Anomaly>,
}

/// Aggregate the records inside `[start, end)` by exact key.
pub fn breakdown(
    records: &[CostRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> CostBreakdown {
    let metrics = AggregateMetrics::from_records(
        records
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp < end),
    );
    CostBreakdown {
        start,
        end,
        total_cost: metrics.total_cost,
        total_requests: metrics.total_requests,
        total_tokens: metrics.total_tokens,
        average_cost_per_request: metrics.average_cost_per_request(),
        by_model: metrics.by_model,
        by_user: metrics.by_user,
        by_operation: metrics.by_operation,
    }
}

/// `count` consecutive buckets of width `period`, the last one ending at `anchor`.
///
/// The final bucket also takes records stamped exactly at `anchor`.
pub fn bucket_series(
    records: &[CostRecord],
    period: PeriodKind,
    count: u32,
    anchor: DateTime<Utc>,
) -> Vec<TrendBucket> {
    let mut buckets: Vec<TrendBucket> = (0..count)
        .map(|i| TrendBucket {
            start: period.rewind(anchor, count - i),
            end: period.rewind(anchor, count - i - 1),
            cost: 0.0,
            requests: 0,
        })
        .collect();

    let last = buckets.len().saturating_sub(1);
    for record in records {
        let t = record.timestamp;
        let slot = buckets.iter().enumerate().position(|(i, b)| {
            t >= b.start && (t < b.end || (i == last && t == b.end))
        });
        if let Some(i) = slot {
            buckets[i].cost += record.total_cost;
            buckets[i].requests += 1;
        }
    }
    buckets
}

/// Classify and extrapolate a bucket series.
pub fn analyze_trend(
    period: PeriodKind,
    buckets: Vec<TrendBucket>,
    dead_zone_percent: f64,
) -> TrendAnalysis {
    let series: Vec<f64> = buckets.iter().map(|b| b.cost).collect();
    let change_percent = change_percent(&series);
    let direction = if change_percent > dead_zone_percent {
        TrendDirection::Rising
    } else if change_percent < -dead_zone_percent {
        TrendDirection::Falling
    } else {
        TrendDirection::Flat
    };

    let fit = linear_fit(&series);
    let forecast = fit.forecast.max(0.0);
    let spread = sample_std_dev(&series);

    TrendAnalysis {
        period,
        buckets,
        direction,
        change_percent,
        forecast,
        confidence_low: (forecast - spread).max(0.0),
        confidence_high: forecast + spread,
        slope: fit.slope,
        r_squared: fit.r_squared,
    }
}

/// Buckets and trend over records, anchored at `anchor`.
///
/// Zero periods yields an empty, flat analysis with a zero forecast.
pub fn trend(
    records: &[CostRecord],
    period: PeriodKind,
    num_periods: u32,
    anchor: DateTime<Utc>,
    dead_zone_percent: f64,
) -> TrendAnalysis {
    if num_periods == 0 {
        return analyze_trend(period, Vec::new(), dead_zone_percent);
    }
    let buckets = bucket_series(records, period, num_periods, anchor);
    analyze_trend(period, buckets, dead_zone_percent)
}

/// Flag points more than `z_threshold` sample standard deviations from the mean.
///
/// Fewer than three points, or a constant series, yields no anomalies.
pub fn anomalies(series: &[f64], z_threshold: f64) -> Vec<Anomaly> {
    if series.len() < MIN_ANOMALY_SAMPLE {
        return Vec::new();
    }
    let mean = mean(series);
    let std = sample_std_dev(series);
    if std == 0.0 {
        return Vec::new();
    }
    series
        .iter()
        .enumerate()
        .filter_map(|(index, &value)| {
            let z_score = (value - mean) / std;
            (z_score.abs() > z_threshold).then_some(Anomaly {
                index,
                value,
                z_score,
            })
        })
        .collect()
}

/// Compose breakdown, trend (anchored at `end`), projection and anomalies.
pub fn report(
    records: &[CostRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    settings: &AnalyticsConfig,
) -> CostReport {
    let breakdown = breakdown(records, start, end);
    let trend = trend(
        records,
        settings.trend_period,
        settings.trend_periods,
        end,
        settings.trend_dead_zone_percent,
    );
    let series: Vec<f64> = trend.buckets.iter().map(|b| b.cost).collect();
    let anomalies = anomalies(&series, settings.anomaly_z_threshold);

    let days = (end - start).num_seconds() as f64 / SECONDS_PER_DAY;
    let monthly_projection = if days > 0.0 {
        breakdown.total_cost / days * DAYS_PER_MONTH
    } else {
        0.0
    };

    CostReport {
        breakdown,
        trend,
        monthly_projection,
        anomalies,
    }
}

fn mean(series: &[f64]) -> f64 {
    if series.is_empty() {
        0.0
    } else {
        series.iter().sum::<f64>() / series.len() as f64
    }
}

fn sample_std_dev(series: &[f64]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let m = mean(series);
    let var = series.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (series.len() - 1) as f64;
    var.sqrt()
}

/// Percentage change of the last point against the mean of the earlier ones.
///
/// A zero baseline reports +100% if the last point is positive, else 0.
fn change_percent(series: &[f64]) -> f64 {
    let Some((last, prior)) = series.split_last() else {
        return 0.0;
    };
    if prior.is_empty() {
        return 0.0;
    }
    let baseline = mean(prior);
    if baseline == 0.0 {
        return if *last > 0.0 { 100.0 } else { 0.0 };
    }
    (last - baseline) / baseline * 100.0
}

struct LinearFit {
    slope: f64,
    forecast: f64,
    r_squared: f64,
}

/// Least squares over `(i, series[i])`, predicted at `i = len`.
fn linear_fit(series: &[f64]) -> LinearFit {
    let n = series.len();
    if n < 2 {
        return LinearFit {
            slope: 0.0,
            forecast: series.first().copied().unwrap_or(0.0),
            r_squared: 0.0,
        };
    }
    let nf = n as f64;
    let sx: f64 = (0..n).map(|i| i as f64).sum();
    let sy: f64 = series.iter().sum();
    let sxy: f64 = series.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sx2: f64 = (0..n).map(|i| (i as f64).powi(2)).sum();

    let slope = (nf * sxy - sx * sy) / (nf * sx2 - sx.powi(2));
    let intercept = (sy - slope * sx) / nf;

    let ym = sy / nf;
    let ss_tot: f64 = series.iter().map(|y| (y - ym).powi(2)).sum();
    let ss_res: f64 = series
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (intercept + slope * i as f64)).powi(2))
        .sum();
    let r_squared = if ss_tot > 0.0 {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    } else {
        0.0
    };

    LinearFit {
        slope,
        forecast: intercept + slope * nf,
        r_squared,
    }
}
