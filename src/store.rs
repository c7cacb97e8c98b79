//! Persistent, idempotent lead storage backed by SQLite.
//!
//! A lead is identified by its normalized (email, website) pair. Writing the
//! same pair twice, in one run or across runs, leaves exactly one row.

use crate::domain::{email_key, website_key};
use crate::error::Result;
use crate::models::Lead;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS leads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        address TEXT NOT NULL DEFAULT '',
        phone TEXT NOT NULL DEFAULT '',
        website TEXT NOT NULL DEFAULT '',
        email TEXT NOT NULL DEFAULT '',
        rating REAL NOT NULL DEFAULT 0,
        query TEXT NOT NULL DEFAULT '',
        scraped_at TEXT NOT NULL,
        email_key TEXT NOT NULL,
        website_key TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_leads_email_website ON leads (email_key, website_key)",
    "CREATE INDEX IF NOT EXISTS idx_leads_website ON leads (website_key)",
    "CREATE INDEX IF NOT EXISTS idx_leads_email ON leads (email_key)",
];

const SELECT_COLUMNS: &str =
    "SELECT name, address, phone, website, email, rating, query, scraped_at FROM leads";

/// A row from the `leads` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct LeadRow {
    name: String,
    address: String,
    phone: String,
    website: String,
    email: String,
    rating: f64,
    query: String,
    scraped_at: DateTime<Utc>,
}

impl From<LeadRow> for Lead {
    fn from(row: LeadRow) -> Self {
        Lead {
            name: row.name,
            address: row.address,
            phone: row.phone,
            website: row.website,
            email: row.email,
            rating: row.rating,
            query: row.query,
            scraped_at: row.scraped_at,
        }
    }
}

/// Handle to the lead database. Cloning shares the pool.
#[derive(Debug, Clone)]
pub(crate) struct LeadStore {
    pool: SqlitePool,
}

impl LeadStore {
    /// Opens (creating if needed) the database file at `path`.
    pub(crate) async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(target: "store_task", "Opened lead database at {}", path);
        Ok(store)
    }

    /// A private database that lives as long as the store.
    pub(crate) async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Inserts the lead unless its (email, website) pair is already stored.
    ///
    /// Returns `true` when a new row was written. A duplicate is not an error.
    pub(crate) async fn put(&self, lead: &Lead) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO leads \
                 (name, address, phone, website, email, rating, query, scraped_at, email_key, website_key) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&lead.name)
        .bind(&lead.address)
        .bind(&lead.phone)
        .bind(&lead.website)
        .bind(&lead.email)
        .bind(lead.rating)
        .bind(&lead.query)
        .bind(lead.scraped_at)
        .bind(email_key(&lead.email))
        .bind(website_key(&lead.website))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub(crate) async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM leads")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// All stored leads in insertion order; only high-value ones when asked.
    pub(crate) async fn list(&self, high_value_only: bool) -> Result<Vec<Lead>> {
        let rows = sqlx::query_as::<_, LeadRow>(&format!("{} ORDER BY id", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(Lead::from)
            .filter(|lead| !high_value_only || lead.is_high_value())
            .collect())
    }

    /// Leads whose email matches case-insensitively.
    pub(crate) async fn find_by_email(&self, email: &str) -> Result<Vec<Lead>> {
        let rows = sqlx::query_as::<_, LeadRow>(&format!(
            "{} WHERE email_key = ? ORDER BY id",
            SELECT_COLUMNS
        ))
        .bind(email_key(email))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Lead::from).collect())
    }

    /// Leads whose canonical website matches, ignoring case and a trailing slash.
    pub(crate) async fn find_by_website(&self, website: &str) -> Result<Vec<Lead>> {
        let rows = sqlx::query_as::<_, LeadRow>(&format!(
            "{} WHERE website_key = ? ORDER BY id",
            SELECT_COLUMNS
        ))
        .bind(website_key(website))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Lead::from).collect())
    }

    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}

/// Totals from the single writer task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WriterStats {
    pub saved: usize,
    pub duplicates: usize,
    pub high_value: usize,
    pub failed: usize,
}

/// Spawns the task that owns all writes. Workers send leads over the channel;
/// the task ends when every sender is dropped.
pub(crate) fn spawn_writer(store: LeadStore, mut rx: mpsc::Receiver<Lead>) -> JoinHandle<WriterStats> {
    tokio::spawn(async move {
        let mut stats = WriterStats::default();
        while let Some(lead) = rx.recv().await {
            match store.put(&lead).await {
                Ok(true) => {
                    stats.saved += 1;
                    if lead.is_high_value() {
                        stats.high_value += 1;
                        tracing::info!(
                            target: "store_task",
                            "HIGH VALUE: {} | {} | {} (no website)", lead.name, lead.phone, lead.address
                        );
                    } else {
                        tracing::info!(
                            target: "store_task",
                            "Saved: {} | {} | {}", lead.name, lead.email, lead.website
                        );
                    }
                }
                Ok(false) => {
                    stats.duplicates += 1;
                    tracing::debug!(
                        target: "store_task",
                        "Duplicate ignored: {} ({} / {})", lead.name, lead.email, lead.website
                    );
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(target: "store_task", "Failed to save {}: {}", lead.name, e);
                }
            }
        }
        stats
    })
}
