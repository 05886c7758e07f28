//! The per-partition stream processor.

use std::sync::Arc;

use nonempty::NonEmpty;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use super::ProcessingContext;
use super::appliers::apply_event;
use super::registry::ProcessorRegistry;
use super::result::{CommandResponse, ProcessingResult, ResultBuilder};
use super::scheduled::{ScheduledTask, TaskResultBuilder};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::log::LogStorage;
use crate::metrics::EngineMetrics;
use crate::record::{LoggedRecord, PartitionId, Record, RecordType, RejectionType};
use crate::state::{EngineState, KeyGenerator, Snapshot, SnapshotStore};

const REPLAY_BATCH_SIZE: usize = 256;

/// Lifecycle phase of a stream processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Loading the latest snapshot.
    Initializing,
    /// Applying logged events on top of the snapshot.
    Replaying,
    /// Processing new commands and running scheduled tasks.
    Processing,
    /// Paused; commands accumulate in the log.
    Suspended,
    /// Stopped after an unrecoverable error. Only queries and close are served.
    Failed,
    Closed,
}

/// Destination of command responses.
pub trait ResponseSink: Send + Sync + 'static {
    fn send(&self, response: CommandResponse);
}

/// Drops every response.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResponseSink;

impl ResponseSink for NoopResponseSink {
    fn send(&self, _response: CommandResponse) {}
}

type StateQuery = Box<dyn FnOnce(&EngineState) + Send>;

enum Control {
    Pause,
    Resume,
    Query(StateQuery),
    Snapshot(oneshot::Sender<Result<i64>>),
    Close,
}

/// Rebuild a partition's state by replaying its whole log.
///
/// Replaying the same log always produces the same state. A command whose
/// result wrote no records leaves no trace in the log, so it does not count
/// as processed here or in live state, and is processed again after a
/// restart. Its processor must tolerate that.
pub async fn replay_state<L: LogStorage>(partition_id: PartitionId, log: &L) -> Result<EngineState> {
    let mut state = EngineState::new(partition_id);
    let mut applied_position = 0;
    let tail = log.last_position().await?;
    replay_until(&mut state, &mut applied_position, log, tail).await?;
    Ok(state)
}

async fn replay_until<L: LogStorage>(
    state: &mut EngineState,
    applied_position: &mut i64,
    log: &L,
    until: i64,
) -> Result<()> {
    let mut next = *applied_position + 1;
    while next <= until {
        let batch = log.read_from(next, REPLAY_BATCH_SIZE).await?;
        if batch.is_empty() {
            break;
        }
        for logged in &batch {
            if logged.position > until {
                return Ok(());
            }
            next = logged.position + 1;
            replay_record(state, applied_position, logged)?;
        }
    }
    Ok(())
}

/// Apply an already-committed record that is not a pending command.
fn replay_record(
    state: &mut EngineState,
    applied_position: &mut i64,
    logged: &LoggedRecord,
) -> Result<()> {
    let record = &logged.record;
    state.key_generator_mut().set_key_if_higher(record.key);
    if logged.position <= *applied_position {
        return Ok(());
    }
    match record.record_type {
        RecordType::Command => {}
        RecordType::Event => {
            apply_event(state, record)?;
            state.mark_processed(record.source_record_position);
        }
        RecordType::CommandRejection => state.mark_processed(record.source_record_position),
    }
    *applied_position = logged.position;
    Ok(())
}

struct TaskEntry {
    task: Box<dyn ScheduledTask>,
    next_run: Instant,
}

/// Single owner of a partition's [`EngineState`].
///
/// Reads the log in order, processes each new command exactly once, commits
/// the result, applies its events, then runs its post-commit tasks. Created
/// with [`StreamProcessor::builder`] and driven on its own tokio task.
pub struct StreamProcessor<L, S> {
    partition_id: PartitionId,
    log: L,
    snapshots: S,
    registry: ProcessorRegistry,
    tasks: Vec<TaskEntry>,
    responses: Arc<dyn ResponseSink>,
    config: EngineConfig,
    metrics: EngineMetrics,
    state: EngineState,
    /// Last log position whose events are reflected in `state`.
    applied_position: i64,
    next_position: i64,
    processed_since_snapshot: u64,
    phase: watch::Sender<Phase>,
}

impl<L, S> StreamProcessor<L, S>
where
    L: LogStorage,
    S: SnapshotStore,
{
    pub fn builder(
        partition_id: PartitionId,
        log: L,
        snapshots: S,
        registry: ProcessorRegistry,
    ) -> StreamProcessorBuilder<L, S> {
        StreamProcessorBuilder {
            partition_id,
            log,
            snapshots,
            registry,
            tasks: Vec::new(),
            responses: Arc::new(NoopResponseSink),
            config: EngineConfig::default(),
            metrics: EngineMetrics::default(),
        }
    }

    async fn run(mut self, mut control: mpsc::UnboundedReceiver<Control>) -> Phase {
        if let Err(err) = self.recover().await {
            error!(partition_id = self.partition_id, error = %err, "Failed to recover partition state");
            return self.fail(control).await;
        }

        self.set_phase(Phase::Processing);
        info!(
            partition_id = self.partition_id,
            last_processed_position = self.state.last_processed_position(),
            "Stream processor started"
        );

        let mut commits = self.log.subscribe();
        let started = Instant::now();
        for entry in &mut self.tasks {
            entry.next_run = started + entry.task.interval();
        }

        loop {
            let mut more = false;
            if self.current_phase() == Phase::Processing {
                match self.process_available().await {
                    Ok(has_more) => more = has_more,
                    Err(err) if err.is_transient() => {
                        warn!(partition_id = self.partition_id, error = %err, "Failed to read log");
                    }
                    Err(err) => {
                        error!(partition_id = self.partition_id, error = %err, "Stream processor failed");
                        return self.fail(control).await;
                    }
                }
            }

            let processing = self.current_phase() == Phase::Processing;
            let next_task = self.next_task_deadline();

            tokio::select! {
                biased;

                message = control.recv() => match message {
                    Some(Control::Close) | None => break,
                    Some(message) => self.handle_control(message).await,
                },
                _ = std::future::ready(()), if processing && more => {}
                _ = sleep_until(next_task.unwrap_or_else(Instant::now)), if processing && next_task.is_some() => {
                    if let Err(err) = self.run_due_tasks().await {
                        error!(partition_id = self.partition_id, error = %err, "Scheduled task failed");
                        return self.fail(control).await;
                    }
                }
                changed = commits.changed() => {
                    if changed.is_err() {
                        sleep(self.config.poll_interval).await;
                    }
                }
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        self.close().await
    }

    async fn recover(&mut self) -> Result<()> {
        self.set_phase(Phase::Initializing);
        if let Some(snapshot) = self.snapshots.latest(self.partition_id).await? {
            if snapshot.state.partition_id() != self.partition_id {
                return Err(Error::StateInconsistency(format!(
                    "snapshot of partition {} loaded for partition {}",
                    snapshot.state.partition_id(),
                    self.partition_id
                )));
            }
            info!(
                partition_id = self.partition_id,
                position = snapshot.position,
                "Recovered state from snapshot"
            );
            self.state = snapshot.state;
            self.applied_position = snapshot.position;
        }

        self.set_phase(Phase::Replaying);
        let tail = self.log.last_position().await?;
        replay_until(
            &mut self.state,
            &mut self.applied_position,
            &self.log,
            tail,
        )
        .await?;
        self.next_position = self.state.last_processed_position().max(0) + 1;

        debug!(
            partition_id = self.partition_id,
            replayed_until = tail,
            next_position = self.next_position,
            "Replay finished"
        );
        Ok(())
    }

    /// Process one batch of records. Returns `true` if more may be waiting.
    async fn process_available(&mut self) -> Result<bool> {
        let batch = self
            .log
            .read_from(self.next_position, self.config.read_batch_size)
            .await?;
        let full = batch.len() >= self.config.read_batch_size;

        for logged in batch {
            let position = logged.position;
            if logged.record.is_command() {
                if position > self.state.last_processed_position() {
                    self.process_command(logged).await?;
                }
            } else {
                replay_record(&mut self.state, &mut self.applied_position, &logged)?;
            }
            self.next_position = position + 1;
        }
        Ok(full)
    }

    async fn process_command(&mut self, logged: LoggedRecord) -> Result<()> {
        let position = logged.position;
        let command = logged.record;
        let mut keys = self.state.key_generator().clone();
        let mut builder =
            ResultBuilder::new(self.partition_id, position, self.log.max_event_length());

        let outcome = match self.registry.lookup(command.value_type, command.intent) {
            Some(processor) => {
                let mut ctx = ProcessingContext::new(&self.state, &mut keys, &mut builder, position);
                processor.process(&command, &mut ctx)
            }
            None => {
                warn!(
                    partition_id = self.partition_id,
                    position,
                    value_type = %command.value_type,
                    intent = %command.intent,
                    "No processor registered for command"
                );
                builder.reject(
                    &command,
                    RejectionType::InvalidArgument,
                    format!(
                        "Expected to process command {}.{}, but no processor is registered for it",
                        command.value_type, command.intent
                    ),
                )
            }
        };

        match outcome {
            Ok(()) => {}
            Err(Error::ExceededBatchRecordSize { length, max }) => {
                warn!(
                    partition_id = self.partition_id,
                    position,
                    length,
                    max,
                    "Processing result exceeds maximum batch size"
                );
                keys = self.state.key_generator().clone();
                builder.reset();
                let reason = format!(
                    "Expected to process command {}.{}, but the resulting batch of {length} bytes exceeds the maximum of {max} bytes",
                    command.value_type, command.intent
                );
                if builder
                    .reject(&command, RejectionType::ExceededBatchRecordSize, reason.clone())
                    .is_err()
                {
                    builder.reset();
                    builder.respond_rejection(&command, RejectionType::ExceededBatchRecordSize, reason);
                }
            }
            Err(err) => {
                error!(
                    partition_id = self.partition_id,
                    position,
                    value_type = %command.value_type,
                    intent = %command.intent,
                    error = %err,
                    "Processor failed"
                );
                return Err(err);
            }
        }

        self.commit(position, builder.build(), keys).await
    }

    async fn commit(
        &mut self,
        position: i64,
        result: ProcessingResult,
        keys: KeyGenerator,
    ) -> Result<()> {
        let (records, response, post_commit_tasks) = result.into_parts();
        let rejected = records
            .iter()
            .any(|record| record.record_type == RecordType::CommandRejection)
            || response.as_ref().is_some_and(CommandResponse::is_rejection);
        let written = records.len();

        if let Some(batch) = NonEmpty::from_vec(records) {
            let last_position = self.append_with_retry(&batch).await?;
            for record in batch.iter().filter(|record| record.is_event()) {
                apply_event(&mut self.state, record)?;
            }
            self.applied_position = self.applied_position.max(last_position);
            // Replay only sees commands through the records they wrote.
            self.state.mark_processed(position);
        }
        self.state.set_key_generator(keys);
        self.metrics.command_processed(rejected, written);

        if let Some(response) = response {
            self.responses.send(response);
        }
        for task in post_commit_tasks {
            if let Err(err) = task() {
                warn!(partition_id = self.partition_id, position, error = %err, "Post-commit task failed");
            }
        }

        self.processed_since_snapshot += 1;
        if self.config.snapshot_period > 0
            && self.processed_since_snapshot >= self.config.snapshot_period
        {
            if let Err(err) = self.take_snapshot().await {
                warn!(partition_id = self.partition_id, error = %err, "Failed to persist snapshot");
            }
        }
        Ok(())
    }

    /// Append a batch, retrying transient failures with the same records.
    async fn append_with_retry(&self, batch: &NonEmpty<Record>) -> Result<i64> {
        let mut attempt = 0;
        loop {
            match self.log.append(batch.clone()).await {
                Ok(position) => return Ok(position),
                Err(err) if err.is_transient() => {
                    attempt += 1;
                    let backoff = self.config.commit_retry.backoff_duration(attempt);
                    warn!(
                        partition_id = self.partition_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Failed to commit batch, retrying"
                    );
                    sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn next_task_deadline(&self) -> Option<Instant> {
        self.tasks.iter().map(|entry| entry.next_run).min()
    }

    async fn run_due_tasks(&mut self) -> Result<()> {
        let now = Instant::now();
        let mut commands = TaskResultBuilder::new(self.partition_id);
        for entry in self.tasks.iter_mut().filter(|entry| entry.next_run <= now) {
            entry.task.run(&self.state, &mut commands);
            entry.next_run = now + entry.task.interval();
        }

        if let Some(batch) = NonEmpty::from_vec(commands.into_commands()) {
            debug!(
                partition_id = self.partition_id,
                commands = batch.len(),
                "Writing commands of scheduled tasks"
            );
            self.append_with_retry(&batch).await?;
        }
        Ok(())
    }

    async fn handle_control(&mut self, message: Control) {
        match message {
            Control::Pause => {
                if self.current_phase() == Phase::Processing {
                    self.set_phase(Phase::Suspended);
                    info!(partition_id = self.partition_id, "Stream processor paused");
                }
            }
            Control::Resume => {
                if self.current_phase() == Phase::Suspended {
                    self.set_phase(Phase::Processing);
                    info!(partition_id = self.partition_id, "Stream processor resumed");
                }
            }
            Control::Query(query) => query(&self.state),
            Control::Snapshot(reply) => {
                let _ = reply.send(self.take_snapshot().await);
            }
            Control::Close => {}
        }
    }

    async fn take_snapshot(&mut self) -> Result<i64> {
        let snapshot = Snapshot {
            partition_id: self.partition_id,
            position: self.applied_position,
            state: self.state.clone(),
        };
        self.snapshots.persist(&snapshot).await?;
        self.processed_since_snapshot = 0;
        debug!(
            partition_id = self.partition_id,
            position = snapshot.position,
            "Persisted snapshot"
        );
        Ok(snapshot.position)
    }

    /// Stay failed, serving queries until closed.
    async fn fail(self, mut control: mpsc::UnboundedReceiver<Control>) -> Phase {
        self.set_phase(Phase::Failed);
        while let Some(message) = control.recv().await {
            match message {
                Control::Close => break,
                Control::Query(query) => query(&self.state),
                Control::Snapshot(reply) => {
                    let _ = reply.send(Err(Error::ProcessorFailed {
                        partition_id: self.partition_id,
                    }));
                }
                Control::Pause | Control::Resume => {}
            }
        }
        info!(partition_id = self.partition_id, "Failed stream processor closed");
        Phase::Failed
    }

    async fn close(mut self) -> Phase {
        if self.applied_position > 0 {
            if let Err(err) = self.take_snapshot().await {
                warn!(partition_id = self.partition_id, error = %err, "Failed to persist snapshot on close");
            }
        }
        self.set_phase(Phase::Closed);
        info!(partition_id = self.partition_id, "Stream processor closed");
        Phase::Closed
    }

    fn current_phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }
}

/// Builder for a [`StreamProcessor`].
pub struct StreamProcessorBuilder<L, S> {
    partition_id: PartitionId,
    log: L,
    snapshots: S,
    registry: ProcessorRegistry,
    tasks: Vec<Box<dyn ScheduledTask>>,
    responses: Arc<dyn ResponseSink>,
    config: EngineConfig,
    metrics: EngineMetrics,
}

impl<L, S> StreamProcessorBuilder<L, S>
where
    L: LogStorage,
    S: SnapshotStore,
{
    pub fn scheduled_task(mut self, task: impl ScheduledTask) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    pub fn scheduled_tasks(mut self, tasks: impl IntoIterator<Item = Box<dyn ScheduledTask>>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn responses(mut self, responses: Arc<dyn ResponseSink>) -> Self {
        self.responses = responses;
        self
    }

    /// If not called, uses [`EngineConfig::default()`].
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Start the processor on a new tokio task.
    pub fn spawn(self) -> StreamProcessorHandle {
        let (phase, phase_rx) = watch::channel(Phase::Initializing);
        let (control, control_rx) = mpsc::unbounded_channel();
        let shutdown_timeout = self.config.shutdown_timeout;
        let now = Instant::now();

        let processor = StreamProcessor {
            partition_id: self.partition_id,
            log: self.log,
            snapshots: self.snapshots,
            registry: self.registry,
            tasks: self
                .tasks
                .into_iter()
                .map(|task| TaskEntry {
                    task,
                    next_run: now,
                })
                .collect(),
            responses: self.responses,
            config: self.config,
            metrics: self.metrics,
            state: EngineState::new(self.partition_id),
            applied_position: 0,
            next_position: 1,
            processed_since_snapshot: 0,
            phase,
        };

        StreamProcessorHandle {
            partition_id: self.partition_id,
            control,
            phase: phase_rx,
            shutdown_timeout,
            task: tokio::spawn(processor.run(control_rx)),
        }
    }
}

/// Control handle of a running [`StreamProcessor`].
pub struct StreamProcessorHandle {
    partition_id: PartitionId,
    control: mpsc::UnboundedSender<Control>,
    phase: watch::Receiver<Phase>,
    shutdown_timeout: std::time::Duration,
    task: JoinHandle<Phase>,
}

impl StreamProcessorHandle {
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Wait until the processor reaches `phase`.
    pub async fn wait_for_phase(&self, phase: Phase) -> Result<()> {
        let mut receiver = self.phase.clone();
        receiver
            .wait_for(|current| *current == phase)
            .await
            .map_err(|_| Error::ProcessorClosed)?;
        Ok(())
    }

    /// Stop processing commands; replay and queries are unaffected.
    pub fn pause(&self) -> Result<()> {
        self.send(Control::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Control::Resume)
    }

    /// Run `query` against the state on the processor's own task.
    pub async fn query<R, F>(&self, query: F) -> Result<R>
    where
        F: FnOnce(&EngineState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        self.send(Control::Query(Box::new(move |state| {
            let _ = reply.send(query(state));
        })))?;
        receiver.await.map_err(|_| Error::ProcessorClosed)
    }

    /// Persist a snapshot now. Returns the snapshot position.
    pub async fn snapshot(&self) -> Result<i64> {
        let (reply, receiver) = oneshot::channel();
        self.send(Control::Snapshot(reply))?;
        receiver.await.map_err(|_| Error::ProcessorClosed)?
    }

    /// Close the processor and wait for it to stop.
    ///
    /// Fails with [`Error::ProcessorFailed`] if the processor had failed.
    pub async fn close(self) -> Result<()> {
        let _ = self.control.send(Control::Close);
        let mut task = self.task;
        match timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(Phase::Failed)) => Err(Error::ProcessorFailed {
                partition_id: self.partition_id,
            }),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(join_error)) => Err(Error::ProcessingFailed(join_error.to_string())),
            Err(_) => {
                warn!(partition_id = self.partition_id, "Stream processor did not close in time, aborting");
                task.abort();
                let _ = task.await;
                Ok(())
            }
        }
    }

    /// Stop the processor without a final snapshot and wait until its task
    /// is gone.
    pub async fn abort(self) {
        self.task.abort();
        let _ = self.task.await;
    }

    fn send(&self, message: Control) -> Result<()> {
        self.control
            .send(message)
            .map_err(|_| Error::ProcessorClosed)
    }
}
