// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Tollgate cost engine.

use thiserror::Error;

/// The primary error type used across the engine and its collaborators.
///
/// Ingestion-path variants (`InvalidUsage`, `UnknownModel`) are raised
/// before any state is mutated. `Persistence` only ever surfaces from the
/// background flush and never from ingestion.
#[derive(Debug, Error)]
pub enum TollgateError {
    /// Malformed token counts (negative values, cached > prompt, non-finite amounts).
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// The pricing table has no entry for the requested model.
    #[error("unknown model `{model}`: no pricing entry")]
    UnknownModel { model: String },

    /// A budget with the same name already exists.
    #[error("budget `{name}` already exists")]
    DuplicateBudget { name: String },

    /// A budget or engine setting failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The named budget does not exist.
    #[error("budget `{name}` not found")]
    BudgetNotFound { name: String },

    /// The alert id does not exist.
    #[error("alert `{id}` not found")]
    AlertNotFound { id: String },

    /// A hard-limit budget has been exhausted for its current period.
    #[error("budget `{name}` exhausted: {message}")]
    BudgetExhausted { name: String, message: String },

    /// Durable storage could not be reached or written.
    #[error("persistence error: {source}")]
    Persistence {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TollgateError {
    /// Wrap any storage-layer error as a persistence failure.
    pub fn persistence<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Persistence { source: err.into() }
    }
}
