use std::fs;
use std::path::Path;

use clientvault_core::ClientRecord;
use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::cache::Listing;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("invalid capture time: {0}")]
    Timestamp(#[from] time::error::Parse),
    #[error("cannot format capture time: {0}")]
    Format(#[from] time::error::Format),
}

/// Persisted copy of the last full listing per scope.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, SnapshotError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, SnapshotError> {
        Self::new("sqlite::memory:").await
    }

    pub async fn open(db_path: &Path) -> Result<Self, SnapshotError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), SnapshotError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn save(&self, scope: &str, listing: &Listing) -> Result<(), SnapshotError> {
        let payload = serde_json::to_string(&listing.records)?;
        let captured_at = listing.captured_at.format(&Rfc3339)?;
        sqlx::query(
            "INSERT INTO listing_snapshots (scope, payload, record_count, remote_total, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(scope) DO UPDATE SET
                payload = excluded.payload,
                record_count = excluded.record_count,
                remote_total = excluded.remote_total,
                captured_at = excluded.captured_at",
        )
        .bind(scope)
        .bind(payload)
        .bind(listing.records.len() as i64)
        .bind(listing.total.map(|total| total as i64))
        .bind(captured_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self, scope: &str) -> Result<Option<Listing>, SnapshotError> {
        let row = sqlx::query(
            "SELECT payload, remote_total, captured_at FROM listing_snapshots WHERE scope = ?1",
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload: String = row.try_get("payload")?;
        let remote_total: Option<i64> = row.try_get("remote_total")?;
        let captured_at: String = row.try_get("captured_at")?;
        Ok(Some(Listing {
            records: serde_json::from_str::<Vec<ClientRecord>>(&payload)?,
            total: remote_total.map(|total| total.max(0) as u64),
            captured_at: OffsetDateTime::parse(&captured_at, &Rfc3339)?,
        }))
    }
}
