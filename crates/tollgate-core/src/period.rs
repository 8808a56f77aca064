// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Calendar-aligned period arithmetic.
//!
//! All boundaries are computed in UTC. Weeks start on Monday (ISO 8601).
//! Monthly and yearly periods step by calendar months, so their length
//! varies with the month.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The recurring window a budget accumulates spend over, and the bucket
/// width used by trend analysis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PeriodKind {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl PeriodKind {
    /// Start of the period containing `t`.
    pub fn start_of(self, t: DateTime<Utc>) -> DateTime<Utc> {
        let date = t.date_naive();
        let naive = match self {
            Self::Hourly => date.and_hms_opt(t.hour(), 0, 0),
            Self::Daily => date.and_hms_opt(0, 0, 0),
            Self::Weekly => {
                let back = i64::from(date.weekday().num_days_from_monday());
                (date - Duration::days(back)).and_hms_opt(0, 0, 0)
            }
            Self::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            Self::Yearly => {
                NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
        };
        naive.map(|n| n.and_utc()).unwrap_or(t)
    }

    /// Move `t` forward by `n` periods.
    pub fn advance(self, t: DateTime<Utc>, n: u32) -> DateTime<Utc> {
        let moved = match self {
            Self::Hourly => t.checked_add_signed(Duration::hours(i64::from(n))),
            Self::Daily => t.checked_add_signed(Duration::days(i64::from(n))),
            Self::Weekly => t.checked_add_signed(Duration::weeks(i64::from(n))),
            Self::Monthly => t.checked_add_months(Months::new(n)),
            Self::Yearly => t.checked_add_months(Months::new(n.saturating_mul(12))),
        };
        moved.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Move `t` backward by `n` periods.
    pub fn rewind(self, t: DateTime<Utc>, n: u32) -> DateTime<Utc> {
        let moved = match self {
            Self::Hourly => t.checked_sub_signed(Duration::hours(i64::from(n))),
            Self::Daily => t.checked_sub_signed(Duration::days(i64::from(n))),
            Self::Weekly => t.checked_sub_signed(Duration::weeks(i64::from(n))),
            Self::Monthly => t.checked_sub_months(Months::new(n)),
            Self::Yearly => t.checked_sub_months(Months::new(n.saturating_mul(12))),
        };
        moved.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// End (exclusive) of the period that starts at `start`.
    pub fn end_of(self, start: DateTime<Utc>) -> DateTime<Utc> {
        self.advance(start, 1)
    }
}
