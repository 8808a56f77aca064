// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection management: PRAGMA setup, WAL mode, migrations.
//!
//! All statements run on tokio-rusqlite's single background thread, so
//! writes are serialized without extra locking.

use std::path::Path;
use std::time::Duration;

use tokio_rusqlite::Connection;
use tracing::debug;

use tollgate_core::TollgateError;

use crate::migrations::run_migrations;

/// Convert a tokio-rusqlite call failure into a persistence error.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> TollgateError {
    TollgateError::persistence(e)
}

/// An open, migrated SQLite database.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, TollgateError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(TollgateError::persistence)?;
        }
        let conn = Connection::open(path)
            .await
            .map_err(TollgateError::persistence)?;
        let db = Self::prepare(conn, wal_mode).await?;
        debug!(path, wal_mode, "database opened");
        Ok(db)
    }

    /// A private in-memory database. WAL does not apply.
    pub async fn open_in_memory() -> Result<Self, TollgateError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(TollgateError::persistence)?;
        Self::prepare(conn, false).await
    }

    async fn prepare(conn: Connection, wal_mode: bool) -> Result<Self, TollgateError> {
        conn.call(move |conn| -> Result<(), rusqlite::Error> {
            if wal_mode {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
            conn.busy_timeout(Duration::from_secs(5))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        conn.call(|conn| -> Result<(), TollgateError> { run_migrations(conn) })
            .await
            .map_err(|e| match e {
                tokio_rusqlite::Error::Error(inner) => inner,
                other => TollgateError::persistence(other.to_string()),
            })?;

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Fold the WAL back into the main database file.
    pub async fn checkpoint(&self) -> Result<(), TollgateError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}
