//! SQLite storage gateway
//!
//! One storage backend implementing the `StorageGateway` trait, selected at
//! process start and injected; engine logic never branches on the backend.
//! Connections come from the pool per call and are never held across the
//! controller's inter-request delay.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::domain::change::{ChangeRecord, PriceDirection};
use crate::domain::gateways::{SessionUpdate, StorageGateway, UpsertOutcome};
use crate::domain::listing::{ListingRecord, ListingStatus};
use crate::domain::session::CrawlParams;

#[derive(Clone)]
pub struct SqliteStorageGateway {
    pool: Arc<SqlitePool>,
}

impl SqliteStorageGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open (creating if missing) the database at `database_url` and run the
    /// schema bootstrap.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url: {database_url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to open sqlite database")?;
        let gateway = Self::new(pool);
        gateway.migrate().await?;
        Ok(gateway)
    }

    /// Create the schema when absent
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                business_id  TEXT PRIMARY KEY,
                price        INTEGER NOT NULL,
                region       TEXT NOT NULL,
                status       TEXT NOT NULL,
                posted_at    TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                source_url   TEXT NOT NULL,
                extracted_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_changes (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                business_id TEXT NOT NULL,
                old_price   INTEGER,
                new_price   INTEGER NOT NULL,
                delta       INTEGER,
                direction   TEXT NOT NULL,
                session_id  TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crawl_sessions (
                session_id    TEXT PRIMARY KEY,
                status        TEXT NOT NULL,
                params        TEXT NOT NULL,
                records_found INTEGER NOT NULL DEFAULT 0,
                batch_ordinal INTEGER NOT NULL DEFAULT 0,
                error         TEXT,
                started_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await?;

        info!("sqlite schema ready");
        Ok(())
    }

    /// Price change rows for one session, oldest first (audit/reporting)
    pub async fn change_log(&self, session_id: &str) -> Result<Vec<ChangeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT business_id, old_price, new_price, delta, direction, session_id, recorded_at
            FROM price_changes WHERE session_id = ? ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&*self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let direction: String = row.get("direction");
                Ok(ChangeRecord {
                    business_id: row.get("business_id"),
                    old_price: row.get::<Option<i64>, _>("old_price").map(|p| p as u64),
                    new_price: row.get::<i64, _>("new_price") as u64,
                    delta: row.get("delta"),
                    direction: PriceDirection::parse(&direction)
                        .ok_or_else(|| anyhow::anyhow!("bad direction '{direction}'"))?,
                    session_id: row.get("session_id"),
                    recorded_at: row.get::<DateTime<Utc>, _>("recorded_at"),
                })
            })
            .collect()
    }

    pub async fn count_listings(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM listings")
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}

#[async_trait]
impl StorageGateway for SqliteStorageGateway {
    async fn upsert(&self, record: &ListingRecord) -> Result<UpsertOutcome> {
        // Outcome must reflect the real row state, so probe before writing
        let existing = sqlx::query("SELECT business_id FROM listings WHERE business_id = ?")
            .bind(&record.business_id)
            .fetch_optional(&*self.pool)
            .await?;

        if existing.is_some() {
            sqlx::query(
                r#"
                UPDATE listings
                SET price = ?, region = ?, status = ?, posted_at = ?, updated_at = ?,
                    source_url = ?, extracted_at = ?
                WHERE business_id = ?
                "#,
            )
            .bind(record.price as i64)
            .bind(&record.region)
            .bind(record.status.as_str())
            .bind(record.posted_at)
            .bind(record.updated_at)
            .bind(&record.source_url)
            .bind(record.extracted_at)
            .bind(&record.business_id)
            .execute(&*self.pool)
            .await?;
            Ok(UpsertOutcome::Updated)
        } else {
            sqlx::query(
                r#"
                INSERT INTO listings
                (business_id, price, region, status, posted_at, updated_at, source_url, extracted_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.business_id)
            .bind(record.price as i64)
            .bind(&record.region)
            .bind(record.status.as_str())
            .bind(record.posted_at)
            .bind(record.updated_at)
            .bind(&record.source_url)
            .bind(record.extracted_at)
            .execute(&*self.pool)
            .await?;
            Ok(UpsertOutcome::Inserted)
        }
    }

    async fn read_snapshot(&self) -> Result<HashMap<String, u64>> {
        let rows = sqlx::query("SELECT business_id, price FROM listings")
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get::<String, _>("business_id"),
                    row.get::<i64, _>("price") as u64,
                )
            })
            .collect())
    }

    async fn append_change_record(&self, change: &ChangeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_changes
            (business_id, old_price, new_price, delta, direction, session_id, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&change.business_id)
        .bind(change.old_price.map(|p| p as i64))
        .bind(change.new_price as i64)
        .bind(change.delta)
        .bind(change.direction.as_str())
        .bind(&change.session_id)
        .bind(change.recorded_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn create_session(&self, session_id: &str, params: &CrawlParams) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO crawl_sessions
            (session_id, status, params, records_found, batch_ordinal, error, started_at, updated_at)
            VALUES (?, 'running', ?, 0, 0, NULL, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(serde_json::to_string(params)?)
        .bind(now)
        .bind(now)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn update_session(&self, session_id: &str, update: SessionUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_sessions
            SET status = ?, records_found = ?, batch_ordinal = ?, error = ?, updated_at = ?
            WHERE session_id = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.records_found as i64)
        .bind(update.batch_ordinal as i64)
        .bind(update.error)
        .bind(Utc::now())
        .bind(session_id)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SessionStatus;

    async fn gateway() -> SqliteStorageGateway {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let gateway = SqliteStorageGateway::new(pool);
        gateway.migrate().await.unwrap();
        gateway
    }

    fn record(id: &str, price: u64) -> ListingRecord {
        let now = Utc::now();
        ListingRecord {
            business_id: id.to_string(),
            price,
            region: "77".to_string(),
            status: ListingStatus::Active,
            posted_at: now,
            updated_at: now,
            source_url: "https://example.com".to_string(),
            extracted_at: now,
        }
    }

    #[tokio::test]
    async fn test_upsert_reports_real_outcome() {
        let gateway = gateway().await;

        let first = gateway.upsert(&record("A111AA77", 50_000)).await.unwrap();
        assert_eq!(first, UpsertOutcome::Inserted);

        let second = gateway.upsert(&record("A111AA77", 60_000)).await.unwrap();
        assert_eq!(second, UpsertOutcome::Updated);

        assert_eq!(gateway.count_listings().await.unwrap(), 1);
        let snapshot = gateway.read_snapshot().await.unwrap();
        assert_eq!(snapshot.get("A111AA77"), Some(&60_000));
    }

    #[tokio::test]
    async fn test_connect_creates_and_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("listings.db").display());

        let first = SqliteStorageGateway::connect(&url).await.unwrap();
        first.upsert(&record("A111AA77", 50_000)).await.unwrap();

        // A fresh connection to the same file sees the row; the schema
        // bootstrap is idempotent on the second connect.
        let second = SqliteStorageGateway::connect(&url).await.unwrap();
        let snapshot = second.read_snapshot().await.unwrap();
        assert_eq!(snapshot.get("A111AA77"), Some(&50_000));
    }

    #[tokio::test]
    async fn test_change_log_round_trip() {
        let gateway = gateway().await;
        let change = ChangeRecord::price_changed("A111AA77", 50_000, 60_000, "s1");
        gateway.append_change_record(&change).await.unwrap();
        let first_seen = ChangeRecord::first_seen("B222BB77", 30_000, "s1");
        gateway.append_change_record(&first_seen).await.unwrap();

        let log = gateway.change_log("s1").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].direction, PriceDirection::Up);
        assert_eq!(log[0].delta, Some(10_000));
        assert_eq!(log[1].direction, PriceDirection::New);
        assert_eq!(log[1].old_price, None);
    }

    #[tokio::test]
    async fn test_session_bookkeeping_rows() {
        let gateway = gateway().await;
        gateway
            .create_session("s1", &CrawlParams::default())
            .await
            .unwrap();
        gateway
            .update_session(
                "s1",
                SessionUpdate {
                    status: SessionStatus::Completed,
                    records_found: 42,
                    batch_ordinal: 3,
                    error: None,
                },
            )
            .await
            .unwrap();

        let row = sqlx::query("SELECT status, records_found FROM crawl_sessions WHERE session_id = 's1'")
            .fetch_one(&*gateway.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("status"), "completed");
        assert_eq!(row.get::<i64, _>("records_found"), 42);
    }
}
