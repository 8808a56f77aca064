// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the engine lifecycle: configure, ingest, flush,
//! restart and restore.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;

use tollgate_config::model::BudgetConfig;
use tollgate_core::{
    AlertSeverity, BudgetScope, BudgetSpec, Clock, CostStore, OperationKind, PeriodKind,
    PricingEntry, SpendDimensions, TokenUsage, TokenUsageEvent, TollgateError,
};
use tollgate_cost::{AlertFilter, CostEngine, FlushReport, MetricsFilter, TrendDirection};
use tollgate_test_utils::{FailingStore, ManualClock, MemoryStore, fixtures};

fn engine_with(store: Arc<dyn CostStore>) -> (Arc<ManualClock>, CostEngine) {
    let clock = Arc::new(ManualClock::new(fixtures::epoch()));
    let engine = CostEngine::new(&fixtures::test_config(), clock.clone(), store).unwrap();
    (clock, engine)
}

/// 1M prompt tokens on model-b cost exactly 3.0.
fn three_dollar_event(clock: &ManualClock) -> TokenUsageEvent {
    fixtures::usage_event("model-b", 1_000_000, 0, clock.now())
}

#[test]
fn estimate_scenario() {
    let (_, engine) = engine_with(Arc::new(MemoryStore::new()));
    let quote = engine.estimate("model-a", 1000, 2000).unwrap();
    assert!((quote.input_cost - 0.000075).abs() < 1e-12);
    assert!((quote.output_cost - 0.0006).abs() < 1e-12);
    assert!((quote.total_cost - 0.000675).abs() < 1e-12);
}

#[test]
fn configured_budgets_are_created() {
    let mut config = fixtures::test_config();
    config.budgets.push(BudgetConfig {
        name: "monthly".into(),
        limit: 50.0,
        period: PeriodKind::Monthly,
        thresholds: vec![50.0],
        user_id: None,
        feature: None,
        hard_limit: true,
    });
    let clock = Arc::new(ManualClock::new(fixtures::epoch()));
    let engine = CostEngine::new(&config, clock, Arc::new(MemoryStore::new())).unwrap();
    let budgets = engine.list_budgets().unwrap();
    assert_eq!(budgets.len(), 1);
    assert!(budgets[0].hard_limit);
}

#[test]
fn invalid_configured_budget_fails_construction() {
    let mut config = fixtures::test_config();
    config.budgets.push(BudgetConfig {
        name: "bad".into(),
        limit: -5.0,
        period: PeriodKind::Daily,
        thresholds: vec![50.0],
        user_id: None,
        feature: None,
        hard_limit: false,
    });
    let clock = Arc::new(ManualClock::new(fixtures::epoch()));
    let result = CostEngine::new(&config, clock, Arc::new(MemoryStore::new()));
    assert!(matches!(result, Err(TollgateError::InvalidConfiguration(_))));
}

#[test]
fn ingestion_drives_metrics_budgets_and_alerts() {
    let (clock, engine) = engine_with(Arc::new(MemoryStore::new()));
    engine
        .create_budget(BudgetSpec {
            name: "team".into(),
            limit: 10.0,
            period: PeriodKind::Daily,
            thresholds: vec![50.0, 100.0],
            scope: BudgetScope::global(),
            hard_limit: false,
        })
        .unwrap();

    let first = engine.record_operation(&three_dollar_event(&clock)).unwrap();
    assert!(first.alerts.is_empty());
    let second = engine.record_operation(&three_dollar_event(&clock)).unwrap();
    assert_eq!(second.alerts.len(), 1);
    assert_eq!(second.alerts[0].threshold_percent, 50.0);

    let metrics = engine.metrics(&MetricsFilter::default()).unwrap();
    assert_eq!(metrics.total_requests, 2);
    assert!((metrics.total_cost - 6.0).abs() < 1e-9);

    let status = engine.budget_status("team").unwrap();
    assert!((status.percent_used - 60.0).abs() < 1e-9);
    assert_eq!(status.period_end, fixtures::epoch() + Duration::days(1));
}

#[test]
fn hard_limit_blocks_feature_spend() {
    let (clock, engine) = engine_with(Arc::new(MemoryStore::new()));
    engine
        .create_budget(BudgetSpec {
            name: "embeddings".into(),
            limit: 0.01,
            period: PeriodKind::Daily,
            thresholds: vec![100.0],
            scope: BudgetScope {
                user_id: None,
                feature: Some("embedding".into()),
            },
            hard_limit: true,
        })
        .unwrap();

    let usage = TokenUsage::new(1_000_000, 0, 0).unwrap();
    let embed = TokenUsageEvent::new("embed-small", OperationKind::Embedding, usage, clock.now());
    let dims = SpendDimensions::from(&embed);
    assert!(engine.check(&dims).is_ok());
    let recorded = engine.record_operation(&embed).unwrap();
    assert_eq!(recorded.alerts[0].severity, AlertSeverity::Critical);

    assert!(matches!(
        engine.check(&dims),
        Err(TollgateError::BudgetExhausted { .. })
    ));
    // Generation traffic is outside the scope.
    assert!(engine.check(&SpendDimensions::default()).is_ok());
}

#[tokio::test]
async fn state_survives_restart_through_the_store() {
    let store = MemoryStore::new();
    let (clock, engine) = engine_with(Arc::new(store.clone()));
    engine
        .create_budget(BudgetSpec {
            name: "team".into(),
            limit: 10.0,
            period: PeriodKind::Monthly,
            thresholds: vec![50.0],
            scope: BudgetScope::global(),
            hard_limit: false,
        })
        .unwrap();
    for _ in 0..2 {
        engine.record_operation(&three_dollar_event(&clock)).unwrap();
    }
    let report = engine.shutdown().await.unwrap();
    assert_eq!(report.records, 2);

    let (_, restarted) = engine_with(Arc::new(store.clone()));
    restarted.restore().await.unwrap();

    let metrics = restarted.metrics(&MetricsFilter::default()).unwrap();
    assert_eq!(metrics.total_requests, 2);
    let status = restarted.budget_status("team").unwrap();
    assert!((status.current_spend - 6.0).abs() < 1e-9);
    assert_eq!(restarted.alerts(AlertFilter::default()).unwrap().len(), 1);

    // Restored state is not flushed again.
    let report = restarted.flush().await.unwrap();
    assert_eq!(report, FlushReport::default());
    assert_eq!(store.persist_count().await, 1);
}

#[tokio::test]
async fn ingestion_continues_while_store_is_down() {
    let store = FailingStore::new(2);
    let (clock, engine) = engine_with(Arc::new(store.clone()));

    engine.record_operation(&three_dollar_event(&clock)).unwrap();
    assert!(engine.flush().await.is_err());
    engine.record_operation(&three_dollar_event(&clock)).unwrap();
    assert!(engine.flush().await.is_err());
    assert_eq!(engine.consecutive_flush_failures(), 2);

    engine.record_operation(&three_dollar_event(&clock)).unwrap();
    assert_eq!(engine.flush().await.unwrap().records, 3);
    assert_eq!(engine.consecutive_flush_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn start_and_shutdown_lifecycle() {
    let store = MemoryStore::new();
    let (clock, engine) = engine_with(Arc::new(store.clone()));
    engine.start().unwrap();
    // Starting twice is harmless.
    engine.start().unwrap();

    engine.record_operation(&three_dollar_event(&clock)).unwrap();
    tokio::time::sleep(StdDuration::from_millis(1500)).await;
    assert_eq!(store.persist_count().await, 1);

    engine.record_operation(&three_dollar_event(&clock)).unwrap();
    let report = engine.shutdown().await.unwrap();
    assert_eq!(report.records, 1);
}

#[tokio::test(start_paused = true)]
async fn engine_restarts_after_shutdown() {
    let store = MemoryStore::new();
    let (clock, engine) = engine_with(Arc::new(store.clone()));
    engine.start().unwrap();
    engine.shutdown().await.unwrap();
    assert_eq!(store.persist_count().await, 0);

    engine.start().unwrap();
    engine.record_operation(&three_dollar_event(&clock)).unwrap();
    tokio::time::sleep(StdDuration::from_millis(1500)).await;
    assert_eq!(store.persist_count().await, 1);

    engine.shutdown().await.unwrap();
    engine.record_operation(&three_dollar_event(&clock)).unwrap();
    tokio::time::sleep(StdDuration::from_secs(10)).await;
    // Stopped again: only the shutdown flush (empty) ran.
    assert_eq!(store.persist_count().await, 1);
}

#[test]
fn zero_period_trend_is_neutral() {
    let (clock, engine) = engine_with(Arc::new(MemoryStore::new()));
    engine.record_operation(&three_dollar_event(&clock)).unwrap();
    let trend = engine.trend(PeriodKind::Daily, 0).unwrap();
    assert!(trend.buckets.is_empty());
    assert_eq!(trend.direction, TrendDirection::Flat);
    assert_eq!(trend.forecast, 0.0);
    assert_eq!(trend.r_squared, 0.0);
}

#[test]
fn trend_and_report_over_ingested_history() {
    let (clock, engine) = engine_with(Arc::new(MemoryStore::new()));
    // Five days: 10, 10, 10, 10, 20 dollars, recorded mid-day.
    for (day, events) in [10u32, 10, 10, 10, 20].iter().enumerate() {
        clock.set(fixtures::epoch() + Duration::days(day as i64) + Duration::hours(12));
        for _ in 0..*events {
            // 1M prompt tokens on model-b: 3.0 each, so scale by a third.
            let mut event = three_dollar_event(&clock);
            event.usage = TokenUsage::new(1_000_000 / 3, 0, 0).unwrap();
            engine.record_operation(&event).unwrap();
        }
    }
    clock.set(fixtures::epoch() + Duration::days(5));

    let trend = engine.trend(PeriodKind::Daily, 5).unwrap();
    assert_eq!(trend.buckets.len(), 5);
    assert_eq!(trend.direction, TrendDirection::Rising);
    assert!(trend.forecast > trend.buckets[0].cost);

    let report = engine
        .report(fixtures::epoch(), fixtures::epoch() + Duration::days(5))
        .unwrap();
    assert_eq!(report.breakdown.total_requests, 60);
    assert!(report.monthly_projection > 0.0);
    assert_eq!(report.trend.buckets.len(), 7);

    let series: Vec<f64> = trend.buckets.iter().map(|b| b.cost).collect();
    assert!(engine.anomalies(&series, None).is_empty());
}

#[test]
fn pricing_swap_takes_effect_for_new_events() {
    let (clock, engine) = engine_with(Arc::new(MemoryStore::new()));
    let before = engine.record_operation(&three_dollar_event(&clock)).unwrap();

    let mut table = fixtures::pricing_table();
    table.insert("model-b".into(), PricingEntry::new(6.0, 15.0));
    engine.swap_pricing(table).unwrap();

    let after = engine.record_operation(&three_dollar_event(&clock)).unwrap();
    assert!((before.record.total_cost - 3.0).abs() < 1e-9);
    assert!((after.record.total_cost - 6.0).abs() < 1e-9);
}

#[test]
fn direct_spend_and_acknowledgement() {
    let (_, engine) = engine_with(Arc::new(MemoryStore::new()));
    engine
        .create_budget(BudgetSpec {
            name: "alice".into(),
            limit: 100.0,
            period: PeriodKind::Weekly,
            thresholds: vec![75.0, 90.0, 100.0],
            scope: BudgetScope {
                user_id: Some("alice".into()),
                feature: None,
            },
            hard_limit: false,
        })
        .unwrap();

    let alerts = engine
        .record_spend(95.0, &SpendDimensions::for_user("alice"))
        .unwrap();
    assert_eq!(alerts.len(), 2);
    engine.acknowledge(&alerts[0].id).unwrap();

    let open = engine
        .alerts(AlertFilter {
            acknowledged: Some(false),
            severity: None,
        })
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].severity, AlertSeverity::Warning);

    engine.delete_budget("alice").unwrap();
    assert!(engine.list_budgets().unwrap().is_empty());
}
