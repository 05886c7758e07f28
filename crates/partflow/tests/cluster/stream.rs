//! Stream processor guarantees: atomic commits, deterministic replay,
//! unique keys across restarts and rejections instead of failures.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use partflow::processing::replay_state;
use partflow::record::{
    IncidentIntent, JobIntent, MessageIntent, ProcessInstanceIntent, TimerIntent, ValueType,
};
use partflow::state::decode_partition_id;
use partflow::{
    CommandProcessor, CommandResponse, ControlledClock, DeploymentResource, EngineState, Error,
    IncidentRecord, Intent, JobRecord, LocalCluster, LogStorage, MemorySnapshotStore,
    MessageRecord, NO_KEY, NonEmpty, Phase, ProcessInstanceRecord, ProcessingContext,
    ProcessorRegistry, Record, RecordType, RejectionType, ResponseSink, StreamProcessor,
    TimerRecord,
};

use crate::support::faulty_log::FaultyLog;
use crate::support::helpers::{
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT, init_test_tracing, order_process,
    test_engine_config, wait_until,
};

/// Creates two jobs per command and counts its invocations.
#[derive(Clone, Default)]
struct CreateJobPair {
    calls: Arc<AtomicUsize>,
}

impl CommandProcessor for CreateJobPair {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> partflow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let job = JobRecord {
            job_type: "pair".into(),
            retries: 1,
            ..Default::default()
        };
        let first = ctx.next_key();
        ctx.result.append_event(first, JobIntent::Created, job.clone())?;
        let second = ctx.next_key();
        ctx.result.append_event(second, JobIntent::Created, job.clone())?;
        ctx.result.respond_event(command, first, JobIntent::Created, job);
        Ok(())
    }
}

struct AlwaysFails;

impl CommandProcessor for AlwaysFails {
    fn process(&self, _command: &Record, _ctx: &mut ProcessingContext<'_>) -> partflow::Result<()> {
        Err(Error::ProcessingFailed("corrupt job payload".into()))
    }
}

#[derive(Clone, Default)]
struct CollectingSink(Arc<Mutex<Vec<CommandResponse>>>);

impl CollectingSink {
    fn responses(&self) -> Vec<CommandResponse> {
        self.0.lock().unwrap().clone()
    }
}

impl ResponseSink for CollectingSink {
    fn send(&self, response: CommandResponse) {
        self.0.lock().unwrap().push(response);
    }
}

fn job_command(request_id: u64) -> Record {
    Record::command(1, NO_KEY, JobIntent::Create, JobRecord::default()).with_request(
        partflow::record::RequestMetadata {
            request_id,
            request_stream_id: 0,
        },
    )
}

#[tokio::test]
async fn transient_commit_failures_do_not_duplicate_or_lose_records() -> Result<()> {
    init_test_tracing();
    let log = FaultyLog::new();
    let processor = CreateJobPair::default();
    let responses = CollectingSink::default();
    let registry = ProcessorRegistry::builder()
        .register(ValueType::Job, JobIntent::Create, processor.clone())
        .build()?;

    log.inner().append(NonEmpty::new(job_command(1))).await?;
    log.fail_next_appends(3);

    let handle = StreamProcessor::builder(1, log.clone(), MemorySnapshotStore::new(), registry)
        .responses(Arc::new(responses.clone()))
        .config(test_engine_config())
        .spawn();

    wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        Ok::<_, anyhow::Error>((!responses.responses().is_empty()).then_some(()))
    })
    .await?;

    assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(log.failed_appends(), 3);

    let records = log.inner().records();
    let types: Vec<_> = records
        .iter()
        .map(|logged| logged.record.record_type)
        .collect();
    assert_eq!(
        types,
        vec![RecordType::Command, RecordType::Event, RecordType::Event]
    );
    assert!(
        records[1..]
            .iter()
            .all(|logged| logged.record.source_record_position == 1)
    );

    let jobs = handle.query(|state| state.jobs().len()).await?;
    assert_eq!(jobs, 2);
    assert_eq!(responses.responses().len(), 1);

    handle.close().await?;
    Ok(())
}

#[tokio::test]
async fn failing_processor_moves_partition_to_failed() -> Result<()> {
    init_test_tracing();
    let log = FaultyLog::new();
    let registry = ProcessorRegistry::builder()
        .register(ValueType::Job, JobIntent::Create, AlwaysFails)
        .build()?;
    log.inner().append(NonEmpty::new(job_command(1))).await?;

    let handle = StreamProcessor::builder(1, log.clone(), MemorySnapshotStore::new(), registry)
        .config(test_engine_config())
        .spawn();

    tokio::time::timeout(DEFAULT_TEST_TIMEOUT, handle.wait_for_phase(Phase::Failed)).await??;

    // Failed partitions still answer queries but write nothing.
    let processed = handle
        .query(|state| state.last_processed_position())
        .await?;
    assert_eq!(processed, partflow::NO_POSITION);
    assert_eq!(log.inner().len(), 1);

    let err = handle.close().await.unwrap_err();
    assert!(matches!(err, Error::ProcessorFailed { partition_id: 1 }));
    Ok(())
}

#[tokio::test]
async fn replay_reproduces_live_state() -> Result<()> {
    init_test_tracing();
    let clock = Arc::new(ControlledClock::new(1_000_000));
    let cluster = LocalCluster::builder(1)
        .config(test_engine_config())
        .clock(clock.clone())
        .start()?;

    cluster.deploy([order_process()]).await?;
    let instance = cluster
        .send(
            1,
            NO_KEY,
            ProcessInstanceIntent::Create,
            ProcessInstanceRecord::latest("order-process"),
        )
        .await?;
    assert!(!instance.is_rejection());

    let job_key = cluster
        .query(1, |state| state.jobs().iter().map(|(key, _)| key).next())
        .await?
        .context("job of the new instance")?;
    let failed = cluster
        .send(
            1,
            job_key,
            JobIntent::Fail,
            JobRecord {
                retries: 0,
                error_message: Some("card declined".into()),
                ..Default::default()
            },
        )
        .await?;
    assert!(!failed.is_rejection());

    let incident_key = cluster
        .query(1, |state| state.incidents().iter().map(|(key, _)| key).next())
        .await?
        .context("incident of the failed job")?;
    let resolved = cluster
        .send(1, incident_key, IncidentIntent::Resolve, IncidentRecord::default())
        .await?;
    assert!(!resolved.is_rejection());

    let message = MessageRecord {
        name: "payment-received".into(),
        correlation_key: "order-1".into(),
        message_id: Some("m-1".into()),
        time_to_live: 60_000,
        deadline: 0,
    };
    cluster
        .send(1, NO_KEY, MessageIntent::Publish, message.clone())
        .await?;
    let duplicate = cluster
        .send(1, NO_KEY, MessageIntent::Publish, message)
        .await?;
    assert_eq!(duplicate.rejection_type, Some(RejectionType::AlreadyExists));

    let live = cluster.query(1, EngineState::to_bytes).await??;
    let replayed = replay_state(1, cluster.log(1)?).await?;
    assert_eq!(replayed.to_bytes()?, live);
    assert_eq!(replayed.incidents().len(), 0);
    assert_eq!(replayed.messages().len(), 1);

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn keys_are_not_reused_after_restart_or_crash() -> Result<()> {
    init_test_tracing();
    let mut cluster = LocalCluster::builder(1)
        .config(test_engine_config())
        .start()?;

    let mut keys = BTreeSet::new();
    for _ in 0..3 {
        let created = cluster
            .send(1, NO_KEY, JobIntent::Create, job("restart"))
            .await?;
        assert!(keys.insert(created.key));
    }

    cluster.restart_partition(1).await?;
    let after_restart = cluster
        .send(1, NO_KEY, JobIntent::Create, job("restart"))
        .await?;
    assert!(after_restart.key > *keys.last().context("issued keys")?);
    keys.insert(after_restart.key);

    cluster.crash_partition(1).await?;
    let after_crash = cluster
        .send(1, NO_KEY, JobIntent::Create, job("restart"))
        .await?;
    assert!(after_crash.key > *keys.last().context("issued keys")?);
    assert_eq!(decode_partition_id(after_crash.key), 1);

    // Every command was processed exactly once across both restarts.
    let created_events = cluster
        .log(1)?
        .records()
        .into_iter()
        .filter(|logged| logged.record.intent == Intent::from(JobIntent::Created))
        .count();
    assert_eq!(created_events, 5);

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn oversized_result_is_rejected_without_events() -> Result<()> {
    init_test_tracing();
    let cluster = LocalCluster::builder(1)
        .config(test_engine_config())
        .max_event_length(6_000)
        .start()?;

    let documentation = "x".repeat(3_000);
    let resource = DeploymentResource::new(
        "large.bpmn",
        format!(r#"<process id="large"><documentation>{documentation}</documentation></process>"#),
    );
    let response = cluster.deploy([resource]).await?;

    assert!(response.is_rejection());
    assert_eq!(
        response.rejection_type,
        Some(RejectionType::ExceededBatchRecordSize)
    );

    let types: Vec<_> = cluster
        .log(1)?
        .records()
        .into_iter()
        .map(|logged| logged.record.record_type)
        .collect();
    assert_eq!(types, vec![RecordType::Command, RecordType::CommandRejection]);
    let deployments = cluster
        .query(1, |state| state.deployments().deployment_count())
        .await?;
    assert_eq!(deployments, 0);

    // The partition keeps processing.
    let created = cluster
        .send(1, NO_KEY, JobIntent::Create, job("after-oversized"))
        .await?;
    assert!(!created.is_rejection());

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn command_without_processor_is_rejected() -> Result<()> {
    init_test_tracing();
    let cluster = LocalCluster::builder(1)
        .config(test_engine_config())
        .start()?;

    let response = cluster
        .send(1, 42, TimerIntent::Triggered, TimerRecord::default())
        .await?;

    assert!(response.is_rejection());
    assert_eq!(response.rejection_type, Some(RejectionType::InvalidArgument));
    assert_eq!(response.key, 42);
    assert_eq!(cluster.handle(1)?.phase(), Phase::Processing);

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn due_timers_and_expired_messages_are_handled_by_scheduled_tasks() -> Result<()> {
    init_test_tracing();
    let clock = Arc::new(ControlledClock::new(10_000));
    let cluster = LocalCluster::builder(1)
        .config(test_engine_config())
        .clock(clock.clone())
        .start()?;

    let timer = cluster
        .send(
            1,
            NO_KEY,
            TimerIntent::Create,
            TimerRecord {
                due_date: 15_000,
                ..Default::default()
            },
        )
        .await?;
    let message = cluster
        .send(
            1,
            NO_KEY,
            MessageIntent::Publish,
            MessageRecord {
                name: "reminder".into(),
                correlation_key: "order-7".into(),
                time_to_live: 2_000,
                ..Default::default()
            },
        )
        .await?;
    assert!(!timer.is_rejection() && !message.is_rejection());

    tokio::time::sleep(Duration::from_millis(150)).await;
    let pending = cluster
        .query(1, |state| (state.timers().len(), state.messages().len()))
        .await?;
    assert_eq!(pending, (1, 1));

    clock.advance(10_000);
    wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        let drained = cluster
            .query(1, |state| state.timers().is_empty() && state.messages().is_empty())
            .await?;
        Ok::<_, anyhow::Error>(drained.then_some(()))
    })
    .await?;

    let intents: Vec<_> = cluster
        .log(1)?
        .records()
        .into_iter()
        .filter(|logged| logged.record.record_type == RecordType::Event)
        .map(|logged| logged.record.intent)
        .collect();
    assert!(intents.contains(&Intent::from(TimerIntent::Triggered)));
    assert!(intents.contains(&Intent::from(MessageIntent::Expired)));

    cluster.shutdown().await?;
    Ok(())
}

fn job(job_type: &str) -> JobRecord {
    JobRecord {
        job_type: job_type.into(),
        retries: 3,
        ..Default::default()
    }
}
