//! Exporter infrastructure.
//!
//! An exporter receives every committed record of a partition, in log
//! order, and checkpoints the last position it handled. After a restart the
//! worker resumes strictly after the checkpoint, so a record is exported at
//! least once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::Result;
use crate::log::LogStorage;
use crate::record::{LoggedRecord, NO_POSITION, PartitionId};

/// Downstream consumer of committed records.
#[async_trait]
pub trait RecordExporter: Send + Sync + 'static {
    /// Identifier used for checkpointing.
    fn name(&self) -> &'static str;

    /// Export a batch of records. The batch is never empty.
    ///
    /// Returning an error makes the worker retry the same batch after a backoff.
    async fn export(&self, partition_id: PartitionId, records: &[LoggedRecord]) -> Result<()>;
}

/// Checkpoint storage for exporters.
pub trait ExporterPositionStore: Send + Sync + Clone + 'static {
    /// Last exported position, or [`NO_POSITION`] if nothing was exported.
    fn load_position(
        &self,
        exporter: &str,
        partition_id: PartitionId,
    ) -> impl Future<Output = Result<i64>> + Send;

    fn store_position(
        &self,
        exporter: &str,
        partition_id: PartitionId,
        position: i64,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Exporter checkpoints kept in memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryExporterPositionStore {
    positions: Arc<Mutex<HashMap<(String, PartitionId), i64>>>,
}

impl MemoryExporterPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExporterPositionStore for MemoryExporterPositionStore {
    async fn load_position(&self, exporter: &str, partition_id: PartitionId) -> Result<i64> {
        let positions = self
            .positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(positions
            .get(&(exporter.to_owned(), partition_id))
            .copied()
            .unwrap_or(NO_POSITION))
    }

    async fn store_position(
        &self,
        exporter: &str,
        partition_id: PartitionId,
        position: i64,
    ) -> Result<()> {
        self.positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((exporter.to_owned(), partition_id), position);
        Ok(())
    }
}

/// Exporter checkpoints stored in `partflow.exporter_positions`.
#[cfg(feature = "postgres")]
#[derive(Debug, Clone)]
pub struct PgExporterPositionStore {
    pool: sqlx::PgPool,
}

#[cfg(feature = "postgres")]
impl PgExporterPositionStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "postgres")]
impl ExporterPositionStore for PgExporterPositionStore {
    async fn load_position(&self, exporter: &str, partition_id: PartitionId) -> Result<i64> {
        let position = sqlx::query_scalar::<_, i64>(
            "SELECT position FROM partflow.exporter_positions WHERE exporter = $1 AND partition_id = $2",
        )
        .bind(exporter)
        .bind(partition_id as i32)
        .fetch_optional(&self.pool)
        .await?;
        Ok(position.unwrap_or(NO_POSITION))
    }

    async fn store_position(
        &self,
        exporter: &str,
        partition_id: PartitionId,
        position: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO partflow.exporter_positions (exporter, partition_id, position)
            VALUES ($1, $2, $3)
            ON CONFLICT (exporter, partition_id) DO UPDATE SET position = EXCLUDED.position
            "#,
        )
        .bind(exporter)
        .bind(partition_id as i32)
        .bind(position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Configuration for exporter workers.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// How often to check the log when no commit notification arrives.
    pub poll_interval: Duration,
    /// Maximum number of records handed to one `export` call.
    pub batch_size: usize,
    /// Base delay for retry backoff after export failures.
    pub error_backoff_base: Duration,
    /// Maximum delay for retry backoff after export failures.
    pub error_backoff_max: Duration,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            batch_size: 100,
            error_backoff_base: Duration::from_millis(200),
            error_backoff_max: Duration::from_secs(5),
        }
    }
}

impl ExporterConfig {
    fn error_backoff_duration(&self, failures: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(failures.saturating_sub(1));
        let delay = self.error_backoff_base.saturating_mul(multiplier);
        delay.min(self.error_backoff_max)
    }
}

/// Worker that feeds one partition's log to one exporter.
pub struct ExporterWorker<L, P, E>
where
    L: LogStorage,
    P: ExporterPositionStore,
    E: RecordExporter,
{
    partition_id: PartitionId,
    log: L,
    positions: P,
    exporter: Arc<E>,
    config: ExporterConfig,
    worker_id: String,
}

impl<L, P, E> ExporterWorker<L, P, E>
where
    L: LogStorage,
    P: ExporterPositionStore,
    E: RecordExporter,
{
    pub fn new(
        partition_id: PartitionId,
        log: L,
        positions: P,
        exporter: Arc<E>,
        config: ExporterConfig,
    ) -> Self {
        Self {
            partition_id,
            log,
            positions,
            exporter,
            config,
            worker_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Export until `shutdown` turns `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut commits = self.log.subscribe();
        let mut failures: u32 = 0;

        info!(
            worker_id = %self.worker_id,
            exporter = self.exporter.name(),
            partition_id = self.partition_id,
            "Exporter worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = poll_interval.tick() => {}
                _ = commits.changed() => {}
            }

            loop {
                match self.export_batch().await {
                    Ok(0) => {
                        failures = 0;
                        break;
                    }
                    Ok(_) => failures = 0,
                    Err(err) => {
                        failures = failures.saturating_add(1);
                        let backoff = self.config.error_backoff_duration(failures);
                        error!(
                            worker_id = %self.worker_id,
                            exporter = self.exporter.name(),
                            partition_id = self.partition_id,
                            failures,
                            backoff_ms = backoff.as_millis(),
                            error = %err,
                            "Export failed, backing off"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = shutdown.changed() => {}
                        }
                        break;
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!(
            worker_id = %self.worker_id,
            exporter = self.exporter.name(),
            partition_id = self.partition_id,
            "Exporter worker shutting down"
        );
        Ok(())
    }

    /// Export the next batch after the checkpoint. Returns the number of records exported.
    async fn export_batch(&self) -> Result<usize> {
        let name = self.exporter.name();
        let position = self
            .positions
            .load_position(name, self.partition_id)
            .await?;

        let records = self
            .log
            .read_from(position.max(0) + 1, self.config.batch_size)
            .await?;
        let Some(last) = records.last() else {
            return Ok(0);
        };
        let last_position = last.position;

        self.exporter.export(self.partition_id, &records).await?;
        self.positions
            .store_position(name, self.partition_id, last_position)
            .await?;
        debug!(
            exporter = name,
            partition_id = self.partition_id,
            position = last_position,
            "Exporter advanced"
        );
        Ok(records.len())
    }
}
