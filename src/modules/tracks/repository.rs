use async_trait::async_trait;
use sqlx::{FromRow, Postgres, Transaction};
use thiserror::Error;
use time::OffsetDateTime;

use super::model::{TrackId, TrackInfo, TrackMetadata, TrackOwner, TrackStatus};
use crate::infrastructure::db::pool::DbPool;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient database error: {0}")]
    Transient(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt track record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

// serialization_failure, deadlock_detected, lock_not_available,
// admin_shutdown and the connection_exception class.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", "40P01", "55P03", "57P01", "08000", "08003", "08006",
];

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        let transient = match &e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db
                .code()
                .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref())),
            _ => false,
        };

        if transient {
            StoreError::Transient(e.to_string())
        } else {
            StoreError::Database(e.to_string())
        }
    }
}

/// Entry point of the persistence gateway. Every job gets its own
/// transaction; nothing is cached between them.
#[async_trait]
pub trait TrackStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn TrackTransaction>>;
}

#[async_trait]
pub trait TrackTransaction: Send {
    /// Reads and locks the track. `None` when the track does not exist.
    async fn get_track_info(&mut self, track_id: TrackId) -> StoreResult<Option<TrackInfo>>;

    /// Sets the status; metadata fields that are `None` keep their value.
    async fn update_track_info(
        &mut self,
        track_id: TrackId,
        status: TrackStatus,
        metadata: Option<&TrackMetadata>,
    ) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[derive(Debug, FromRow)]
struct TrackInfoRow {
    track_id: i64,
    user_id: i64,
    username: String,
    email: Option<String>,
    status: String,
    duration: Option<f64>,
    bitrate: Option<i32>,
    format: Option<String>,
    codec: Option<String>,
    channels: Option<i32>,
    sample_rate: Option<i32>,
    updated_at: OffsetDateTime,
}

impl TryFrom<TrackInfoRow> for TrackInfo {
    type Error = StoreError;

    fn try_from(row: TrackInfoRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TrackStatus>()
            .map_err(|e| StoreError::Corrupt(format!("track {}: {}", row.track_id, e)))?;

        let metadata = TrackMetadata {
            duration: row.duration,
            bitrate: row.bitrate,
            format: row.format,
            codec: row.codec,
            channels: row.channels,
            sample_rate: row.sample_rate,
        };

        Ok(TrackInfo {
            track_id: row.track_id,
            owner: TrackOwner {
                user_id: row.user_id,
                username: row.username,
                email: row.email,
            },
            status,
            metadata: (!metadata.is_empty()).then_some(metadata),
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgTrackStore {
    pool: DbPool,
}

impl PgTrackStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrackStore for PgTrackStore {
    async fn begin(&self) -> StoreResult<Box<dyn TrackTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTrackTransaction { tx }))
    }
}

pub struct PgTrackTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TrackTransaction for PgTrackTransaction {
    async fn get_track_info(&mut self, track_id: TrackId) -> StoreResult<Option<TrackInfo>> {
        let row = sqlx::query_as::<_, TrackInfoRow>(
            r#"
            SELECT t.id AS track_id,
                   u.id AS user_id,
                   u.username,
                   u.email,
                   COALESCE(ti.status, 'pending') AS status,
                   ti.duration,
                   ti.bitrate,
                   ti.format,
                   ti.codec,
                   ti.channels,
                   ti.sample_rate,
                   COALESCE(ti.updated_at, t.created_at) AS updated_at
            FROM tracks t
            JOIN users u ON u.id = t.user_id
            LEFT JOIN track_infos ti ON ti.track_id = t.id
            WHERE t.id = $1
            FOR UPDATE OF t
            "#,
        )
        .bind(track_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TrackInfo::try_from).transpose()
    }

    async fn update_track_info(
        &mut self,
        track_id: TrackId,
        status: TrackStatus,
        metadata: Option<&TrackMetadata>,
    ) -> StoreResult<()> {
        let metadata = metadata.cloned().unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO track_infos
                (track_id, status, duration, bitrate, format, codec, channels, sample_rate, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (track_id) DO UPDATE SET
                status = EXCLUDED.status,
                duration = COALESCE(EXCLUDED.duration, track_infos.duration),
                bitrate = COALESCE(EXCLUDED.bitrate, track_infos.bitrate),
                format = COALESCE(EXCLUDED.format, track_infos.format),
                codec = COALESCE(EXCLUDED.codec, track_infos.codec),
                channels = COALESCE(EXCLUDED.channels, track_infos.channels),
                sample_rate = COALESCE(EXCLUDED.sample_rate, track_infos.sample_rate),
                updated_at = NOW()
            "#,
        )
        .bind(track_id)
        .bind(status.as_str())
        .bind(metadata.duration)
        .bind(metadata.bitrate)
        .bind(metadata.format)
        .bind(metadata.codec)
        .bind(metadata.channels)
        .bind(metadata.sample_rate)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> TrackInfoRow {
        TrackInfoRow {
            track_id: 42,
            user_id: 1,
            username: "dashie".to_string(),
            email: Some("dashie@example.org".to_string()),
            status: status.to_string(),
            duration: None,
            bitrate: None,
            format: None,
            codec: None,
            channels: None,
            sample_rate: None,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn row_without_metadata_maps_to_none() {
        let info = TrackInfo::try_from(row("pending")).unwrap();
        assert_eq!(info.status, TrackStatus::Pending);
        assert!(info.metadata.is_none());
        assert_eq!(info.owner.username, "dashie");
    }

    #[test]
    fn row_with_metadata_keeps_it() {
        let mut r = row("done");
        r.duration = Some(180.0);
        r.bitrate = Some(128);

        let info = TrackInfo::try_from(r).unwrap();
        assert_eq!(info.status, TrackStatus::Done);
        let metadata = info.metadata.unwrap();
        assert_eq!(metadata.duration, Some(180.0));
        assert_eq!(metadata.bitrate, Some(128));
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let err = TrackInfo::try_from(row("READY")).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn pool_timeouts_are_transient() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_transient());
    }
}
