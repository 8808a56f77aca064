// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Tollgate integration tests.
//!
//! Provides deterministic collaborators and fixtures so engine tests run
//! without wall time or a real database.
//!
//! # Components
//!
//! - [`ManualClock`] - Clock that only moves when the test moves it
//! - [`MemoryStore`] - In-memory `CostStore` that records every batch
//! - [`FailingStore`] - `CostStore` that fails a configurable number of times
//! - [`fixtures`] - Pricing tables, configs and usage events

pub mod clock;
pub mod fixtures;
pub mod store;

pub use clock::ManualClock;
pub use store::{FailingStore, MemoryStore};
