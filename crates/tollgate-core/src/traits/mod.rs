// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits the engine is wired against.
//!
//! - [`Clock`]: injectable time source, so period arithmetic is testable.
//! - [`CostStore`]: persistence hook used only by the background flush and
//!   at process start.

pub mod clock;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use store::{CostStore, FlushBatch, RestoredState};
