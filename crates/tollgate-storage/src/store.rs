// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the `CostStore` trait.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Row, params};
use tracing::debug;

use tollgate_config::model::StorageConfig;
use tollgate_core::{
    Budget, BudgetAlert, BudgetScope, CostRecord, CostStore, FlushBatch, RestoredState,
    TollgateError,
};

use crate::database::{Database, map_tr_err};

/// SQLite-backed cost store.
///
/// Every `persist` runs in a single transaction: a failed flush leaves
/// the previously stored state untouched. Cost records are inserted with
/// `INSERT OR IGNORE`, so retrying a batch never duplicates them.
pub struct SqliteCostStore {
    db: Database,
}

impl SqliteCostStore {
    /// Open the database named by the storage configuration.
    pub async fn open(config: &StorageConfig) -> Result<Self, TollgateError> {
        let db = Database::open(&config.database_path, config.wal_mode).await?;
        Ok(Self { db })
    }

    pub async fn open_in_memory() -> Result<Self, TollgateError> {
        Ok(Self {
            db: Database::open_in_memory().await?,
        })
    }

    /// Checkpoint the WAL. Call once before process exit.
    pub async fn close(&self) -> Result<(), TollgateError> {
        self.db.checkpoint().await
    }

    #[cfg(test)]
    fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl CostStore for SqliteCostStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn persist(&self, batch: &FlushBatch) -> Result<(), TollgateError> {
        let owned = batch.clone();
        let inserted = self
            .db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT OR IGNORE INTO cost_records \
                         (id, model, operation, prompt_tokens, completion_tokens, \
                          cached_tokens, prompt_cost, completion_cost, cache_savings, \
                          total_cost, currency, user_id, session_id, feature, timestamp) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    )?;
                    for r in &owned.records {
                        inserted += stmt.execute(params![
                            r.id,
                            r.model,
                            r.operation.to_string(),
                            to_sql_count(r.prompt_tokens),
                            to_sql_count(r.completion_tokens),
                            to_sql_count(r.cached_tokens),
                            r.prompt_cost,
                            r.completion_cost,
                            r.cache_savings,
                            r.total_cost,
                            r.currency,
                            r.user_id,
                            r.session_id,
                            r.feature,
                            format_ts(&r.timestamp),
                        ])?;
                    }

                    // Deletes first: a budget deleted and recreated under the
                    // same name within one flush must keep its new snapshot.
                    let mut stmt = tx.prepare_cached("DELETE FROM budgets WHERE name = ?1")?;
                    for name in &owned.deleted_budgets {
                        stmt.execute(params![name])?;
                    }

                    let mut stmt = tx.prepare_cached(
                        "INSERT OR REPLACE INTO budgets \
                         (name, limit_amount, period, user_id, feature, thresholds, hard_limit, \
                          period_start, current_spend, fired_thresholds, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    )?;
                    for b in &owned.budgets {
                        stmt.execute(params![
                            b.name,
                            b.limit,
                            b.period.to_string(),
                            b.scope.user_id,
                            b.scope.feature,
                            encode_list(&b.thresholds)?,
                            b.hard_limit,
                            format_ts(&b.period_start),
                            b.current_spend,
                            encode_list(&b.fired_thresholds)?,
                            format_ts(&b.created_at),
                            format_ts(&b.updated_at),
                        ])?;
                    }

                    let mut stmt = tx.prepare_cached(
                        "INSERT OR REPLACE INTO budget_alerts \
                         (id, budget_name, severity, message, spent, limit_amount, remaining, \
                          threshold_percent, period_start, timestamp, acknowledged) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    )?;
                    for a in &owned.alerts {
                        stmt.execute(params![
                            a.id,
                            a.budget_name,
                            a.severity.to_string(),
                            a.message,
                            a.spent,
                            a.limit,
                            a.remaining,
                            a.threshold_percent,
                            format_ts(&a.period_start),
                            format_ts(&a.timestamp),
                            a.acknowledged,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await
            .map_err(map_tr_err)?;

        debug!(
            records = inserted,
            budgets = batch.budgets.len(),
            alerts = batch.alerts.len(),
            deleted = batch.deleted_budgets.len(),
            "flush batch persisted"
        );
        Ok(())
    }

    async fn restore(&self) -> Result<RestoredState, TollgateError> {
        let state = self
            .db
            .connection()
            .call(|conn| -> Result<RestoredState, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, model, operation, prompt_tokens, completion_tokens, \
                     cached_tokens, prompt_cost, completion_cost, cache_savings, total_cost, \
                     currency, user_id, session_id, feature, timestamp \
                     FROM cost_records ORDER BY timestamp ASC, id ASC",
                )?;
                let records = stmt
                    .query_map([], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut stmt = conn.prepare(
                    "SELECT name, limit_amount, period, user_id, feature, thresholds, \
                     hard_limit, period_start, current_spend, fired_thresholds, \
                     created_at, updated_at \
                     FROM budgets ORDER BY name ASC",
                )?;
                let budgets = stmt
                    .query_map([], budget_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut stmt = conn.prepare(
                    "SELECT id, budget_name, severity, message, spent, limit_amount, \
                     remaining, threshold_percent, period_start, timestamp, acknowledged \
                     FROM budget_alerts ORDER BY timestamp ASC, id ASC",
                )?;
                let alerts = stmt
                    .query_map([], alert_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(RestoredState {
                    records,
                    budgets,
                    alerts,
                })
            })
            .await
            .map_err(map_tr_err)?;

        debug!(
            records = state.records.len(),
            budgets = state.budgets.len(),
            alerts = state.alerts.len(),
            "state loaded from sqlite"
        );
        Ok(state)
    }
}

/// Fixed-width RFC 3339, so text order equals time order.
fn format_ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn encode_list(values: &[f64]) -> Result<String, rusqlite::Error> {
    serde_json::to_string(values).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parsed_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn count_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn list_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<f64>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CostRecord> {
    Ok(CostRecord {
        id: row.get(0)?,
        model: row.get(1)?,
        operation: parsed_at(row, 2)?,
        prompt_tokens: count_at(row, 3)?,
        completion_tokens: count_at(row, 4)?,
        cached_tokens: count_at(row, 5)?,
        prompt_cost: row.get(6)?,
        completion_cost: row.get(7)?,
        cache_savings: row.get(8)?,
        total_cost: row.get(9)?,
        currency: row.get(10)?,
        user_id: row.get(11)?,
        session_id: row.get(12)?,
        feature: row.get(13)?,
        timestamp: timestamp_at(row, 14)?,
    })
}

fn budget_from_row(row: &Row<'_>) -> rusqlite::Result<Budget> {
    Ok(Budget {
        name: row.get(0)?,
        limit: row.get(1)?,
        period: parsed_at(row, 2)?,
        scope: BudgetScope {
            user_id: row.get(3)?,
            feature: row.get(4)?,
        },
        thresholds: list_at(row, 5)?,
        hard_limit: row.get(6)?,
        period_start: timestamp_at(row, 7)?,
        current_spend: row.get(8)?,
        fired_thresholds: list_at(row, 9)?,
        created_at: timestamp_at(row, 10)?,
        updated_at: timestamp_at(row, 11)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<BudgetAlert> {
    Ok(BudgetAlert {
        id: row.get(0)?,
        budget_name: row.get(1)?,
        severity: parsed_at(row, 2)?,
        message: row.get(3)?,
        spent: row.get(4)?,
        limit: row.get(5)?,
        remaining: row.get(6)?,
        threshold_percent: row.get(7)?,
        period_start: timestamp_at(row, 8)?,
        timestamp: timestamp_at(row, 9)?,
        acknowledged: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tollgate_core::AlertSeverity;
    use tollgate_test_utils::fixtures;

    fn alert(budget: &str, threshold: f64, at: DateTime<Utc>) -> BudgetAlert {
        BudgetAlert {
            id: format!("alert-{budget}-{threshold}"),
            budget_name: budget.to_string(),
            severity: AlertSeverity::for_threshold(threshold),
            message: format!("budget `{budget}` reached {threshold}%"),
            spent: threshold,
            limit: 100.0,
            remaining: 100.0 - threshold,
            threshold_percent: threshold,
            period_start: fixtures::epoch(),
            timestamp: at,
            acknowledged: false,
        }
    }

    fn full_batch() -> FlushBatch {
        let t = fixtures::epoch();
        let mut budget = fixtures::budget("team", 100.0, t);
        budget.current_spend = 80.0;
        budget.fired_thresholds = vec![75.0];
        budget.scope.feature = Some("search".into());
        let mut record = fixtures::cost_record("model-b", 1.25, t + Duration::minutes(5));
        record.user_id = Some("alice".into());
        record.cached_tokens = 40;
        FlushBatch {
            records: vec![record, fixtures::cost_record("model-a", 0.5, t)],
            budgets: vec![budget],
            alerts: vec![alert("team", 75.0, t + Duration::minutes(5))],
            deleted_budgets: Vec::new(),
            flushed_at: Some(t + Duration::minutes(10)),
        }
    }

    #[tokio::test]
    async fn persist_then_restore_returns_everything() {
        let store = SqliteCostStore::open_in_memory().await.unwrap();
        let batch = full_batch();
        store.persist(&batch).await.unwrap();

        let state = store.restore().await.unwrap();
        assert_eq!(state.records.len(), 2);
        // Ordered by timestamp, not insertion order.
        assert_eq!(state.records[0], batch.records[1]);
        assert_eq!(state.records[1], batch.records[0]);
        assert_eq!(state.budgets, batch.budgets);
        assert_eq!(state.alerts, batch.alerts);
    }

    #[tokio::test]
    async fn retried_batch_does_not_duplicate_records() {
        let store = SqliteCostStore::open_in_memory().await.unwrap();
        let batch = full_batch();
        store.persist(&batch).await.unwrap();
        store.persist(&batch).await.unwrap();
        assert_eq!(store.restore().await.unwrap().records.len(), 2);
    }

    #[tokio::test]
    async fn budget_snapshots_overwrite_by_name() {
        let store = SqliteCostStore::open_in_memory().await.unwrap();
        let mut batch = full_batch();
        store.persist(&batch).await.unwrap();

        batch.records.clear();
        batch.budgets[0].current_spend = 95.0;
        batch.budgets[0].fired_thresholds = vec![75.0, 90.0];
        batch.alerts[0].acknowledged = true;
        store.persist(&batch).await.unwrap();

        let state = store.restore().await.unwrap();
        assert_eq!(state.budgets.len(), 1);
        assert!((state.budgets[0].current_spend - 95.0).abs() < f64::EPSILON);
        assert_eq!(state.budgets[0].fired_thresholds, vec![75.0, 90.0]);
        assert_eq!(state.alerts.len(), 1);
        assert!(state.alerts[0].acknowledged);
    }

    #[tokio::test]
    async fn deleted_budgets_are_removed_but_alerts_survive() {
        let store = SqliteCostStore::open_in_memory().await.unwrap();
        store.persist(&full_batch()).await.unwrap();

        let deletion = FlushBatch {
            deleted_budgets: vec!["team".into()],
            ..FlushBatch::default()
        };
        store.persist(&deletion).await.unwrap();

        let state = store.restore().await.unwrap();
        assert!(state.budgets.is_empty());
        assert_eq!(state.alerts.len(), 1);
        assert_eq!(state.records.len(), 2);
    }

    #[tokio::test]
    async fn recreated_budget_in_same_batch_is_kept() {
        let store = SqliteCostStore::open_in_memory().await.unwrap();
        store.persist(&full_batch()).await.unwrap();

        let mut fresh = fixtures::budget("team", 10.0, fixtures::epoch());
        fresh.current_spend = 1.0;
        let batch = FlushBatch {
            budgets: vec![fresh.clone()],
            deleted_budgets: vec!["team".into()],
            ..FlushBatch::default()
        };
        store.persist(&batch).await.unwrap();

        assert_eq!(store.restore().await.unwrap().budgets, vec![fresh]);
    }

    #[tokio::test]
    async fn empty_database_restores_empty_state() {
        let store = SqliteCostStore::open_in_memory().await.unwrap();
        assert_eq!(store.restore().await.unwrap(), RestoredState::default());
    }

    #[tokio::test]
    async fn reopened_file_keeps_state_and_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir
                .path()
                .join("nested")
                .join("tollgate.db")
                .to_string_lossy()
                .into_owned(),
            wal_mode: true,
        };

        let store = SqliteCostStore::open(&config).await.unwrap();
        let mode = store
            .database()
            .connection()
            .call(|conn| -> Result<String, rusqlite::Error> {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        store.persist(&full_batch()).await.unwrap();
        store.close().await.unwrap();
        drop(store);

        // Second open re-runs migrations against an up-to-date schema.
        let reopened = SqliteCostStore::open(&config).await.unwrap();
        let state = reopened.restore().await.unwrap();
        assert_eq!(state.records.len(), 2);
        assert_eq!(state.budgets.len(), 1);
    }
}
