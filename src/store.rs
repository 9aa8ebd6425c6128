//! Diagnostic log storage for failed or degraded analyses.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use crate::ai::truncate_chars;

/// Longest `raw` payload stored on one log row.
pub const MAX_LOG_RAW_CHARS: usize = 4000;

/// What kind of event a log row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Every provider failed; the offline payload was served.
    AnalyzeFallback,
    /// Provider text was not JSON; a synthetic analysis was served.
    ParseFallback,
    /// A provider answered with nothing usable after cleaning.
    EmptyResponse,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnalyzeFallback => "analyze_fallback",
            Self::ParseFallback => "analyze_parse_fallback",
            Self::EmptyResponse => "analyze_empty_response",
        }
    }
}

/// A log row about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAiLog {
    pub user_id: Option<i64>,
    pub kind: LogKind,
    pub status_code: u16,
    pub message: String,
    pub raw: String,
}

impl NewAiLog {
    pub fn new(
        user_id: Option<i64>,
        kind: LogKind,
        status_code: u16,
        message: impl Into<String>,
        raw: impl AsRef<str>,
    ) -> Self {
        Self {
            user_id,
            kind,
            status_code,
            message: message.into(),
            raw: truncate_chars(raw.as_ref(), MAX_LOG_RAW_CHARS),
        }
    }
}

/// A stored log row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiLog {
    pub id: i64,
    pub user_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status_code: i64,
    pub message: String,
    pub raw: String,
    pub created_at: String,
}

/// Append-only store for [`AiLog`] rows.
#[async_trait::async_trait]
pub trait AiLogStore: Send + Sync {
    async fn record(&self, entry: NewAiLog) -> Result<()>;

    /// Newest first.
    async fn recent(&self, limit: u32) -> Result<Vec<AiLog>>;
}

/// SQLite-backed [`AiLogStore`].
#[derive(Debug, Clone)]
pub struct SqliteAiLogStore {
    pool: SqlitePool,
}

impl SqliteAiLogStore {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let path_str = path
            .to_str()
            .context("Invalid database path: contains non-UTF8 characters")?;
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path_str}"))
            .context("Invalid database path")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Database migration failed")?;

        log::info!("Diagnostic log database ready at {}", path.display());
        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl AiLogStore for SqliteAiLogStore {
    async fn record(&self, entry: NewAiLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO ai_logs (user_id, type, status_code, message, raw) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.user_id)
        .bind(entry.kind.as_str())
        .bind(i64::from(entry.status_code))
        .bind(&entry.message)
        .bind(&entry.raw)
        .execute(&self.pool)
        .await
        .context("Failed to insert AI log")?;
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<AiLog>> {
        let rows = sqlx::query(
            "SELECT id, user_id, type, status_code, message, raw, created_at FROM ai_logs ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to query AI logs")?;

        rows.iter()
            .map(|row| -> std::result::Result<AiLog, sqlx::Error> {
                Ok(AiLog {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    kind: row.try_get("type")?,
                    status_code: row.try_get("status_code")?,
                    message: row.try_get("message")?,
                    raw: row.try_get("raw")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .context("Failed to decode AI log row")
    }
}

/// In-process [`AiLogStore`], handy for tests and for running without a database.
#[derive(Debug, Default)]
pub struct MemoryAiLogStore {
    rows: Mutex<Vec<AiLog>>,
}

impl MemoryAiLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl AiLogStore for MemoryAiLogStore {
    async fn record(&self, entry: NewAiLog) -> Result<()> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| anyhow::anyhow!("log store lock poisoned"))?;
        let id = rows.len() as i64 + 1;
        rows.push(AiLog {
            id,
            user_id: entry.user_id,
            kind: entry.kind.as_str().to_string(),
            status_code: i64::from(entry.status_code),
            message: entry.message,
            raw: entry.raw,
            created_at: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        });
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<AiLog>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow::anyhow!("log store lock poisoned"))?;
        Ok(rows.iter().rev().take(limit as usize).cloned().collect())
    }
}
