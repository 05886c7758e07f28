//! Integration tests for PgLog, PgSnapshotStore and PgExporterPositionStore.

use nonempty::nonempty;
use partflow::{
    EngineState, Error, ExporterPositionStore, LogStorage, NO_POSITION, NonEmpty,
    PgExporterPositionStore, PgLog, PgSnapshotStore, Snapshot, SnapshotStore,
};
use test_utils::db_test;

use crate::support::db::{count_snapshots, fetch_positions, job_command};

// =============================================================================
// PgLog
// =============================================================================

db_test!(migrate_is_idempotent, |pool| {
    partflow::migrate(pool).await?;
    partflow::migrate(pool).await?;

    let log = PgLog::open(pool.clone(), 1).await?;
    assert_eq!(log.last_position().await?, 0);
    Ok(())
});

db_test!(append_assigns_consecutive_positions, |pool| {
    let log = PgLog::open(pool.clone(), 1).await?;
    let mut commits = log.subscribe();

    let last = log
        .append(nonempty![job_command(1, "a"), job_command(1, "b")])
        .await?;
    assert_eq!(last, 2);
    assert_eq!(*commits.borrow_and_update(), 2);

    let last = log.append(NonEmpty::new(job_command(1, "c"))).await?;
    assert_eq!(last, 3);
    assert_eq!(log.last_position().await?, 3);
    Ok(())
});

db_test!(failed_append_writes_nothing, |pool| {
    let log = PgLog::open(pool.clone(), 1).await?;
    log.append(NonEmpty::new(job_command(1, "before"))).await?;

    // JSONB rejects the NUL escape, so the second insert of the batch fails.
    let result = log
        .append(nonempty![job_command(1, "ok"), job_command(1, "bad\u{0}type")])
        .await;
    assert!(matches!(result, Err(Error::Postgres(_))));

    assert_eq!(fetch_positions(pool, 1).await?, vec![1]);
    assert_eq!(log.append(NonEmpty::new(job_command(1, "after"))).await?, 2);
    Ok(())
});

db_test!(oversized_batch_is_rejected_before_writing, |pool| {
    let log = PgLog::open(pool.clone(), 1).await?.with_max_event_length(256);

    let result = log
        .append(NonEmpty::new(job_command(1, &"x".repeat(512))))
        .await;
    assert!(matches!(result, Err(Error::ExceededBatchRecordSize { .. })));
    assert!(fetch_positions(pool, 1).await?.is_empty());
    Ok(())
});

db_test!(concurrent_writers_keep_positions_gapless, |pool| {
    let mut writers = Vec::new();
    for writer in 0..4 {
        let log = PgLog::open(pool.clone(), 1).await?;
        writers.push(tokio::spawn(async move {
            for batch in 0..10 {
                let job_type = format!("writer-{writer}-{batch}");
                log.append(nonempty![job_command(1, &job_type), job_command(1, &job_type)])
                    .await?;
            }
            Ok::<_, Error>(())
        }));
    }
    for writer in writers {
        writer.await??;
    }

    assert_eq!(fetch_positions(pool, 1).await?, (1..=80).collect::<Vec<_>>());

    // Both records of a batch are adjacent.
    let log = PgLog::open(pool.clone(), 1).await?;
    let records = log.read_from(1, 100).await?;
    for pair in records.chunks(2) {
        assert_eq!(
            pair[0].record.value_as::<partflow::JobRecord>(),
            pair[1].record.value_as::<partflow::JobRecord>()
        );
    }
    Ok(())
});

db_test!(read_from_is_ordered_and_partition_scoped, |pool| {
    let first = PgLog::open(pool.clone(), 1).await?;
    let second = PgLog::open(pool.clone(), 2).await?;
    for index in 0..5 {
        first
            .append(NonEmpty::new(job_command(1, &format!("first-{index}"))))
            .await?;
    }
    second.append(NonEmpty::new(job_command(2, "second"))).await?;

    let page = first.read_from(2, 3).await?;
    let positions: Vec<_> = page.iter().map(|logged| logged.position).collect();
    assert_eq!(positions, vec![2, 3, 4]);
    assert!(page.iter().all(|logged| logged.record.partition_id == 1));

    let tail = second.read_from(1, 10).await?;
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].position, 1);

    // A reopened log starts from the stored tail.
    let reopened = PgLog::open(pool.clone(), 1).await?;
    assert_eq!(*reopened.subscribe().borrow(), 5);
    Ok(())
});

// =============================================================================
// PgSnapshotStore
// =============================================================================

db_test!(snapshot_round_trip_keeps_latest, |pool| {
    let store = PgSnapshotStore::new(pool.clone());
    assert!(store.latest(1).await?.is_none());

    let state = EngineState::new(1);
    store
        .persist(&Snapshot {
            partition_id: 1,
            position: 7,
            state: state.clone(),
        })
        .await?;
    store
        .persist(&Snapshot {
            partition_id: 1,
            position: 12,
            state: state.clone(),
        })
        .await?;

    let latest = store.latest(1).await?.expect("snapshot of partition 1");
    assert_eq!(latest.position, 12);
    assert_eq!(latest.state.to_bytes()?, state.to_bytes()?);
    assert!(store.latest(2).await?.is_none());
    assert_eq!(count_snapshots(pool).await?, 1);
    Ok(())
});

// =============================================================================
// PgExporterPositionStore
// =============================================================================

db_test!(exporter_position_upsert, |pool| {
    let positions = PgExporterPositionStore::new(pool.clone());
    assert_eq!(positions.load_position("search", 1).await?, NO_POSITION);

    positions.store_position("search", 1, 5).await?;
    positions.store_position("search", 1, 9).await?;
    positions.store_position("audit", 1, 3).await?;

    assert_eq!(positions.load_position("search", 1).await?, 9);
    assert_eq!(positions.load_position("audit", 1).await?, 3);
    assert_eq!(positions.load_position("search", 2).await?, NO_POSITION);
    Ok(())
});
