// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus exposition for cost, budget and flush metrics.
//!
//! Recording goes through the `metrics` facade (see [`recording`]); this
//! crate owns the exporter that turns it into text for
//! `tollgate metrics --prometheus`.

pub mod recording;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use tollgate_core::TollgateError;

pub use recording::{
    record_alert, record_cost, register_metrics, set_budget_spend, set_flush_failures,
};

/// Owns the process-wide Prometheus recorder.
pub struct PrometheusAdapter {
    handle: PrometheusHandle,
}

impl PrometheusAdapter {
    /// Install the global recorder and describe every Tollgate metric.
    ///
    /// Fails if another recorder already owns the process.
    pub fn new() -> Result<Self, TollgateError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            TollgateError::Internal(format!("cannot install prometheus recorder: {e}"))
        })?;
        recording::register_metrics();
        tracing::debug!("prometheus recorder installed");
        Ok(Self { handle })
    }

    /// Current values in text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
