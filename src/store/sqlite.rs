use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{metrics_path, MetricsStore, UpdateFn};
use crate::{auth::UserId, db::Database, metrics::StudyMetrics};

/// Metrics documents in the local SQLite `documents` table.
///
/// Transactions take the write lock up front (`BEGIN IMMEDIATE`), so a
/// read-merge-write is atomic against other processes sharing the file.
#[derive(Clone)]
pub struct SqliteMetricsStore {
    db: Database,
}

impl SqliteMetricsStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn load_document(conn: &Connection, path: &str) -> Result<Option<StudyMetrics>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to read document {path}"))?;

    body.map(|raw| {
        serde_json::from_str(&raw).with_context(|| format!("failed to parse document {path}"))
    })
    .transpose()
}

#[async_trait]
impl MetricsStore for SqliteMetricsStore {
    async fn read(&self, user: &UserId) -> Result<Option<StudyMetrics>> {
        let path = metrics_path(user);
        self.db.execute(move |conn| load_document(conn, &path)).await
    }

    async fn transact(
        &self,
        user: &UserId,
        mut update: UpdateFn,
    ) -> Result<Option<StudyMetrics>> {
        let path = metrics_path(user);
        self.db
            .execute(move |conn| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .context("failed to begin metrics transaction")?;

                let current = load_document(&tx, &path)?;
                let Some(next) = update(current.as_ref()) else {
                    return Ok(None);
                };

                let body = serde_json::to_string(&next)?;
                tx.execute(
                    "INSERT INTO documents (path, body, revision, updated_at)
                     VALUES (?1, ?2, 1, ?3)
                     ON CONFLICT(path) DO UPDATE
                     SET body = excluded.body,
                         revision = documents.revision + 1,
                         updated_at = excluded.updated_at",
                    params![path, body, Utc::now().to_rfc3339()],
                )
                .with_context(|| format!("failed to write document {path}"))?;
                tx.commit().context("failed to commit metrics transaction")?;

                Ok(Some(next))
            })
            .await
    }
}
