// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command implementations. Each returns the text printed on stdout.
//!
//! Pricing commands only need the configured table. Everything else opens
//! the SQLite store and restores engine state first; commands that change
//! state end with a flush so the next invocation sees the change.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::BufReader;
use tracing::debug;

use tollgate_config::TollgateConfig;
use tollgate_core::TollgateError;
use tollgate_cost::{AlertFilter, CostCalculator, CostEngine, FlushReport, MetricsFilter};
use tollgate_storage::SqliteCostStore;

use crate::ingest::{self, IngestSummary};
use crate::shutdown;
use crate::{BudgetCommand, Commands};

/// An engine restored from the configured store.
struct Session {
    engine: CostEngine,
    store: Arc<SqliteCostStore>,
    #[cfg(feature = "prometheus")]
    prometheus: Option<tollgate_prometheus::PrometheusAdapter>,
}

impl Session {
    async fn open(config: &TollgateConfig, want_prometheus: bool) -> Result<Self, TollgateError> {
        #[cfg(feature = "prometheus")]
        let prometheus = if config.prometheus.enabled || want_prometheus {
            Some(tollgate_prometheus::PrometheusAdapter::new()?)
        } else {
            None
        };
        #[cfg(not(feature = "prometheus"))]
        if want_prometheus {
            return Err(TollgateError::InvalidConfiguration(
                "this build has no Prometheus support".into(),
            ));
        }

        let store = Arc::new(SqliteCostStore::open(&config.storage).await?);
        let engine = CostEngine::with_system_clock(config, store.clone())?;
        engine.restore().await?;
        debug!(path = %config.storage.database_path, "session opened");

        Ok(Self {
            engine,
            store,
            #[cfg(feature = "prometheus")]
            prometheus,
        })
    }

    /// Final flush, then checkpoint the database.
    async fn close(self) -> Result<FlushReport, TollgateError> {
        let report = self.engine.shutdown().await?;
        self.store.close().await?;
        Ok(report)
    }

    #[cfg(feature = "prometheus")]
    fn prometheus_text(&self, filter: &MetricsFilter) -> Result<String, TollgateError> {
        let adapter = self
            .prometheus
            .as_ref()
            .ok_or_else(|| TollgateError::Internal("prometheus recorder not installed".into()))?;
        let records = self.engine.records(
            filter.start.unwrap_or(DateTime::<Utc>::MIN_UTC),
            filter.end.unwrap_or(DateTime::<Utc>::MAX_UTC),
        )?;
        // A fresh process starts every counter at zero; replay history into it.
        for record in records
            .iter()
            .filter(|r| filter.user_id.is_none() || r.user_id == filter.user_id)
        {
            tollgate_prometheus::record_cost(record);
        }
        for budget in self.engine.list_budgets()? {
            tollgate_prometheus::set_budget_spend(&budget.name, budget.current_spend);
        }
        tollgate_prometheus::set_flush_failures(self.engine.consecutive_flush_failures());
        Ok(adapter.render())
    }

    #[cfg(not(feature = "prometheus"))]
    fn prometheus_text(&self, _filter: &MetricsFilter) -> Result<String, TollgateError> {
        Err(TollgateError::InvalidConfiguration(
            "this build has no Prometheus support".into(),
        ))
    }
}

#[derive(Serialize)]
struct IngestOutput {
    ingest: IngestSummary,
    flush: FlushReport,
}

#[derive(Serialize)]
struct Deleted<'a> {
    deleted: &'a str,
    flush: FlushReport,
}

fn render<T: Serialize>(value: &T) -> Result<String, TollgateError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| TollgateError::Internal(format!("failed to serialize output: {e}")))
}

fn calculator(config: &TollgateConfig) -> Result<CostCalculator, TollgateError> {
    tollgate_cost::pricing::validate_table(&config.pricing.models)?;
    Ok(CostCalculator::new(
        config.pricing.models.clone(),
        config.engine.cache_discount,
        config.engine.currency.clone(),
    ))
}

async fn ingest_from(
    engine: &CostEngine,
    input: Option<&Path>,
) -> Result<IngestSummary, TollgateError> {
    let cancel = shutdown::install_signal_handler();
    match input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await.map_err(|e| {
                TollgateError::InvalidConfiguration(format!(
                    "cannot open input {}: {e}",
                    path.display()
                ))
            })?;
            ingest::ingest(engine, BufReader::new(file), &cancel).await
        }
        None => ingest::ingest(engine, BufReader::new(tokio::io::stdin()), &cancel).await,
    }
}

/// Execute one command against `config`.
pub async fn run(command: Commands, config: &TollgateConfig) -> Result<String, TollgateError> {
    match command {
        Commands::Estimate {
            model,
            prompt,
            completion,
            cached,
        } => render(&calculator(config)?.price(&model, prompt, completion, cached)?),
        Commands::Compare { prompt, completion } => {
            render(&calculator(config)?.compare_models(prompt, completion))
        }
        Commands::Project {
            model,
            daily_requests,
            avg_prompt,
            avg_completion,
        } => render(&calculator(config)?.project_monthly(
            daily_requests,
            avg_prompt,
            avg_completion,
            &model,
        )?),
        Commands::Ingest { input } => {
            let session = Session::open(config, false).await?;
            session.engine.start()?;
            let summary = ingest_from(&session.engine, input.as_deref()).await;
            // Flush whatever was accepted even if reading failed part way.
            let flush = session.close().await?;
            render(&IngestOutput {
                ingest: summary?,
                flush,
            })
        }
        Commands::Metrics {
            start,
            end,
            user,
            prometheus,
        } => {
            let session = Session::open(config, prometheus).await?;
            let filter = MetricsFilter {
                start,
                end,
                user_id: user,
            };
            if prometheus {
                session.prometheus_text(&filter)
            } else {
                render(&session.engine.metrics(&filter)?)
            }
        }
        Commands::Budgets { command } => {
            let session = Session::open(config, false).await?;
            match command {
                BudgetCommand::List => render(&session.engine.list_budgets()?),
                BudgetCommand::Status { name } => render(&session.engine.budget_status(&name)?),
                BudgetCommand::Create(args) => {
                    let budget = session.engine.create_budget(args.into_spec())?;
                    session.close().await?;
                    render(&budget)
                }
                BudgetCommand::Delete { name } => {
                    session.engine.delete_budget(&name)?;
                    let flush = session.close().await?;
                    render(&Deleted {
                        deleted: &name,
                        flush,
                    })
                }
            }
        }
        Commands::Alerts {
            acknowledged,
            severity,
        } => {
            let session = Session::open(config, false).await?;
            render(&session.engine.alerts(AlertFilter {
                acknowledged,
                severity,
            })?)
        }
        Commands::Ack { id } => {
            let session = Session::open(config, false).await?;
            let alert = session.engine.acknowledge(&id)?;
            session.close().await?;
            render(&alert)
        }
        Commands::Breakdown { start, end } => {
            let session = Session::open(config, false).await?;
            render(&session.engine.breakdown(start, end)?)
        }
        Commands::Trend { period, periods } => {
            let session = Session::open(config, false).await?;
            render(&session.engine.trend(
                period.unwrap_or(config.analytics.trend_period),
                periods.unwrap_or(config.analytics.trend_periods),
            )?)
        }
        Commands::Report { start, end } => {
            let session = Session::open(config, false).await?;
            render(&session.engine.report(start, end)?)
        }
    }
}
