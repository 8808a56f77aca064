// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON-lines usage event ingestion.
//!
//! One `TokenUsageEvent` per line. Malformed or rejected lines are logged
//! and counted; they never abort the run.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tollgate_core::{BudgetAlert, TokenUsageEvent, TollgateError};
use tollgate_cost::CostEngine;

/// Outcome of one ingest run.
#[derive(Debug, Default, Serialize)]
pub struct IngestSummary {
    pub accepted: u64,
    pub rejected: u64,
    pub total_cost: f64,
    /// Alerts raised by the accepted events.
    pub alerts: Vec<BudgetAlert>,
    /// Input was cut short by a shutdown signal.
    pub interrupted: bool,
}

/// Feed every line of `reader` through the engine until EOF or cancellation.
pub async fn ingest<R>(
    engine: &CostEngine,
    reader: R,
    cancel: &CancellationToken,
) -> Result<IngestSummary, TollgateError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = IngestSummary::default();
    let mut line_no = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.interrupted = true;
                info!(line = line_no, "ingest interrupted");
                break;
            }
            next = lines.next_line() => next
                .map_err(|e| TollgateError::Internal(format!("failed to read input: {e}")))?,
        };
        let Some(line) = next else { break };
        line_no += 1;

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: TokenUsageEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed event");
                summary.rejected += 1;
                continue;
            }
        };

        match engine.record_operation(&event) {
            Ok(recorded) => {
                debug!(line = line_no, cost = recorded.record.total_cost, "event recorded");
                summary.accepted += 1;
                summary.total_cost += recorded.record.total_cost;
                summary.alerts.extend(recorded.alerts);
            }
            Err(e) => {
                warn!(line = line_no, model = %event.model, error = %e, "event rejected");
                summary.rejected += 1;
            }
        }
    }

    info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        total_cost = summary.total_cost,
        "ingest complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tollgate_core::{BudgetScope, BudgetSpec, PeriodKind};
    use tollgate_test_utils::{ManualClock, MemoryStore, fixtures};

    use super::*;

    fn engine() -> CostEngine {
        let clock = Arc::new(ManualClock::new(fixtures::epoch()));
        CostEngine::new(&fixtures::test_config(), clock, Arc::new(MemoryStore::new())).unwrap()
    }

    const INPUT: &str = r#"{"model":"model-b","operation":"generation","prompt_tokens":1000000,"completion_tokens":0,"timestamp":"2026-03-02T00:00:00Z"}

not json
{"model":"nope","operation":"generation","prompt_tokens":10,"completion_tokens":10,"timestamp":"2026-03-02T00:00:00Z"}
{"model":"model-b","operation":"generation","prompt_tokens":10,"completion_tokens":0,"cached_tokens":20,"timestamp":"2026-03-02T00:00:00Z"}
{"model":"model-b","operation":"embedding","prompt_tokens":1000000,"completion_tokens":0,"user_id":"alice","timestamp":"2026-03-02T00:01:00Z"}
"#;

    #[tokio::test]
    async fn counts_accepted_and_rejected_lines() {
        let engine = engine();
        let summary = ingest(&engine, INPUT.as_bytes(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.accepted, 2);
        // Malformed JSON, unknown model, cached above prompt.
        assert_eq!(summary.rejected, 3);
        assert!((summary.total_cost - 6.0).abs() < 1e-9);
        assert!(!summary.interrupted);
    }

    #[tokio::test]
    async fn alerts_are_collected() {
        let engine = engine();
        engine
            .create_budget(BudgetSpec {
                name: "cap".into(),
                limit: 5.0,
                period: PeriodKind::Daily,
                thresholds: vec![50.0, 100.0],
                scope: BudgetScope::global(),
                hard_limit: false,
            })
            .unwrap();
        let summary = ingest(&engine, INPUT.as_bytes(), &CancellationToken::new())
            .await
            .unwrap();
        let thresholds: Vec<f64> = summary.alerts.iter().map(|a| a.threshold_percent).collect();
        assert_eq!(thresholds, vec![50.0, 100.0]);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_reading() {
        let engine = engine();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = ingest(&engine, INPUT.as_bytes(), &cancel).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.accepted + summary.rejected, 0);
    }
}
