// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the Tollgate cost engine.
//!
//! Cost records, budget snapshots and alerts live in one database file,
//! written through a single tokio-rusqlite connection. The schema is
//! managed by refinery migrations embedded at build time.

pub mod database;
pub mod migrations;
pub mod store;

pub use database::Database;
pub use store::SqliteCostStore;
