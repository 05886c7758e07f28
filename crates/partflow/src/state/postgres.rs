use sqlx::PgPool;
use sqlx::types::Json;

use super::{Snapshot, SnapshotStore};
use crate::error::Result;
use crate::record::PartitionId;

/// Snapshot store backed by `partflow.snapshots`, one row per partition.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SnapshotStore for PgSnapshotStore {
    async fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO partflow.snapshots (partition_id, position, snapshot)
            VALUES ($1, $2, $3)
            ON CONFLICT (partition_id)
            DO UPDATE SET position = EXCLUDED.position,
                          snapshot = EXCLUDED.snapshot,
                          created_at = now()
            "#,
        )
        .bind(snapshot.partition_id as i32)
        .bind(snapshot.position)
        .bind(Json(snapshot))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest(&self, partition_id: PartitionId) -> Result<Option<Snapshot>> {
        let row = sqlx::query_scalar::<_, Json<Snapshot>>(
            "SELECT snapshot FROM partflow.snapshots WHERE partition_id = $1",
        )
        .bind(partition_id as i32)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|Json(snapshot)| snapshot))
    }
}
