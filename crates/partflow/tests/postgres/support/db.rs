use partflow::record::JobIntent;
use partflow::{JobRecord, NO_KEY, PartitionId, Record, Result};
use sqlx::PgPool;

// =============================================================================
// Record builders
// =============================================================================

pub fn job_command(partition_id: PartitionId, job_type: &str) -> Record {
    Record::command(
        partition_id,
        NO_KEY,
        JobIntent::Create,
        JobRecord {
            job_type: job_type.to_string(),
            ..Default::default()
        },
    )
}

// =============================================================================
// Table queries
// =============================================================================

pub async fn fetch_positions(pool: &PgPool, partition_id: PartitionId) -> Result<Vec<i64>> {
    let positions = sqlx::query_scalar::<_, i64>(
        "SELECT position FROM partflow.records WHERE partition_id = $1 ORDER BY position",
    )
    .bind(partition_id as i32)
    .fetch_all(pool)
    .await?;
    Ok(positions)
}

pub async fn count_snapshots(pool: &PgPool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM partflow.snapshots")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
