//! PostgreSQL record log.

use std::sync::Arc;

use nonempty::NonEmpty;
use sqlx::PgPool;
use sqlx::types::Json;
use tokio::sync::watch;

use super::{DEFAULT_MAX_EVENT_LENGTH, LogStorage, serialized_length};
use crate::error::{Error, Result};
use crate::record::{LoggedRecord, PartitionId, Record};

const SCHEMA: &str = include_str!("../../migrations/0001_partflow.sql");

/// Create the `partflow` schema and its tables if they do not exist.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// Record log of one partition stored in `partflow.records`.
///
/// Appends run in one transaction holding a transaction-scoped advisory lock
/// on the partition, so positions stay gapless even with several writers
/// (a stream processor and gateways). Commit notifications only cover
/// appends made through this process; readers in other processes rely on
/// polling.
///
/// # Example
///
/// ```ignore
/// use partflow::PgLog;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://...").await?;
/// partflow::migrate(&pool).await?;
/// let log = PgLog::open(pool, 1).await?;
/// ```
#[derive(Debug, Clone)]
pub struct PgLog {
    pool: PgPool,
    partition_id: PartitionId,
    max_event_length: usize,
    commit_position: Arc<watch::Sender<i64>>,
}

impl PgLog {
    /// Open the log of `partition_id`, reading its current tail.
    pub async fn open(pool: PgPool, partition_id: PartitionId) -> Result<Self> {
        let tail = Self::tail(&pool, partition_id).await?;
        let (commit_position, _) = watch::channel(tail);
        Ok(Self {
            pool,
            partition_id,
            max_event_length: DEFAULT_MAX_EVENT_LENGTH,
            commit_position: Arc::new(commit_position),
        })
    }

    pub fn with_max_event_length(mut self, max_event_length: usize) -> Self {
        self.max_event_length = max_event_length;
        self
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    async fn tail(pool: &PgPool, partition_id: PartitionId) -> Result<i64> {
        let tail = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(position), 0) FROM partflow.records WHERE partition_id = $1",
        )
        .bind(partition_id as i32)
        .fetch_one(pool)
        .await?;
        Ok(tail)
    }
}

impl LogStorage for PgLog {
    async fn append(&self, batch: NonEmpty<Record>) -> Result<i64> {
        let mut length = 0;
        for record in batch.iter() {
            length += serialized_length(record)?;
        }
        if !self.can_write_event_of_length(length) {
            return Err(Error::ExceededBatchRecordSize {
                length,
                max: self.max_event_length,
            });
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(i64::from(self.partition_id))
            .execute(&mut *tx)
            .await?;

        let mut position = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(position), 0) FROM partflow.records WHERE partition_id = $1",
        )
        .bind(self.partition_id as i32)
        .fetch_one(&mut *tx)
        .await?;

        for record in batch {
            position += 1;
            sqlx::query(
                "INSERT INTO partflow.records (partition_id, position, record) VALUES ($1, $2, $3)",
            )
            .bind(self.partition_id as i32)
            .bind(position)
            .bind(Json(record))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.commit_position.send_modify(|tail| *tail = (*tail).max(position));
        Ok(position)
    }

    async fn read_from(&self, from: i64, limit: usize) -> Result<Vec<LoggedRecord>> {
        let rows = sqlx::query_as::<_, (i64, Json<Record>)>(
            r#"
            SELECT position, record
            FROM partflow.records
            WHERE partition_id = $1 AND position >= $2
            ORDER BY position ASC
            LIMIT $3
            "#,
        )
        .bind(self.partition_id as i32)
        .bind(from)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(position, Json(record))| LoggedRecord { position, record })
            .collect())
    }

    async fn last_position(&self) -> Result<i64> {
        let tail = Self::tail(&self.pool, self.partition_id).await?;
        self.commit_position.send_modify(|known| *known = (*known).max(tail));
        Ok(tail)
    }

    fn max_event_length(&self) -> usize {
        self.max_event_length
    }

    fn subscribe(&self) -> watch::Receiver<i64> {
        self.commit_position.subscribe()
    }
}
