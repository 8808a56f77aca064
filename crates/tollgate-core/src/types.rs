// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Usage events, priced cost records, and pricing entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::TollgateError;

/// The kind of billed call that produced a usage event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    /// Text generation (chat, completion).
    Generation,
    /// Embedding computation.
    Embedding,
    /// Classification or routing calls.
    Classification,
    /// Summarization or compaction calls.
    Summarization,
    /// Anything else.
    Other,
}

/// Per-model pricing in currency units per million tokens.
///
/// Immutable once loaded; a new table is swapped in as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingEntry {
    /// Cost per million prompt (input) tokens.
    pub input_per_mtok: f64,
    /// Cost per million completion (output) tokens.
    pub output_per_mtok: f64,
    /// Cost per million tokens for embedding calls, when the model bills them separately.
    #[serde(default)]
    pub embedding_per_mtok: Option<f64>,
    /// Cache discount override for this model (fraction in [0, 1]).
    #[serde(default)]
    pub cache_discount: Option<f64>,
}

impl PricingEntry {
    /// Create an entry with input and output prices only.
    pub fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
            embedding_per_mtok: None,
            cache_discount: None,
        }
    }
}

/// Validated token counts for one billed call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt (input) tokens, including cached ones.
    pub prompt_tokens: u64,
    /// Completion (output) tokens.
    pub completion_tokens: u64,
    /// Prompt tokens served from the provider cache.
    #[serde(default)]
    pub cached_tokens: u64,
}

impl TokenUsage {
    /// Build a usage value, rejecting `cached > prompt`.
    pub fn new(
        prompt_tokens: u64,
        completion_tokens: u64,
        cached_tokens: u64,
    ) -> Result<Self, TollgateError> {
        let usage = Self {
            prompt_tokens,
            completion_tokens,
            cached_tokens,
        };
        usage.validate()?;
        Ok(usage)
    }

    /// Build a usage value from untyped signed counts handed over by an adapter.
    pub fn from_signed(
        prompt_tokens: i64,
        completion_tokens: i64,
        cached_tokens: i64,
    ) -> Result<Self, TollgateError> {
        let to_count = |name: &str, value: i64| {
            u64::try_from(value).map_err(|_| {
                TollgateError::InvalidUsage(format!("{name} must be non-negative, got {value}"))
            })
        };
        Self::new(
            to_count("prompt_tokens", prompt_tokens)?,
            to_count("completion_tokens", completion_tokens)?,
            to_count("cached_tokens", cached_tokens)?,
        )
    }

    /// Check the cached-token invariant.
    pub fn validate(&self) -> Result<(), TollgateError> {
        if self.cached_tokens > self.prompt_tokens {
            return Err(TollgateError::InvalidUsage(format!(
                "cached_tokens ({}) exceeds prompt_tokens ({})",
                self.cached_tokens, self.prompt_tokens
            )));
        }
        Ok(())
    }

    /// Prompt plus completion tokens.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// One billed call, as reported by the caller. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsageEvent {
    /// Model identifier (pricing table key).
    pub model: String,
    /// What kind of call this was.
    pub operation: OperationKind,
    /// Token counts.
    #[serde(flatten)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Optional feature tag used for budget scoping.
    #[serde(default)]
    pub feature: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TokenUsageEvent {
    /// Create an event with no user, session, or feature dimensions.
    pub fn new(
        model: impl Into<String>,
        operation: OperationKind,
        usage: TokenUsage,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            model: model.into(),
            operation,
            usage,
            user_id: None,
            session_id: None,
            feature: None,
            timestamp,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }
}

/// The dimensions a spend amount is attributed to when matching budgets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendDimensions {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub feature: Option<String>,
    #[serde(default)]
    pub operation: Option<OperationKind>,
}

impl SpendDimensions {
    /// Dimensions attributed to a single user.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Dimensions attributed to a single feature tag.
    pub fn for_feature(feature: impl Into<String>) -> Self {
        Self {
            feature: Some(feature.into()),
            ..Self::default()
        }
    }

    /// The tag a feature-scoped budget is compared against.
    ///
    /// An explicit feature tag wins; otherwise the operation kind name is used.
    pub fn feature_tag(&self) -> Option<String> {
        self.feature
            .clone()
            .or_else(|| self.operation.map(|op| op.to_string()))
    }
}

impl From<&TokenUsageEvent> for SpendDimensions {
    fn from(event: &TokenUsageEvent) -> Self {
        Self {
            user_id: event.user_id.clone(),
            feature: event.feature.clone(),
            operation: Some(event.operation),
        }
    }
}

/// A priced usage event. Append-only: created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Unique record identifier (UUID v4).
    pub id: String,
    pub model: String,
    pub operation: OperationKind,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
    /// Cost of prompt tokens after the cache discount.
    pub prompt_cost: f64,
    pub completion_cost: f64,
    /// Amount saved by the cache discount.
    pub cache_savings: f64,
    pub total_cost: f64,
    pub currency: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub feature: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CostRecord {
    /// Prompt plus completion tokens.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Whether any prompt tokens were served from cache.
    pub fn is_cache_hit(&self) -> bool {
        self.cached_tokens > 0
    }

    /// The budget-matching dimensions of the originating event.
    pub fn dimensions(&self) -> SpendDimensions {
        SpendDimensions {
            user_id: self.user_id.clone(),
            feature: self.feature.clone(),
            operation: Some(self.operation),
        }
    }
}
