//! Engine composition: wires behaviors into processors and starts a partition.

use std::sync::Arc;

use crate::behaviors::Behaviors;
use crate::config::EngineConfig;
use crate::deployment::{
    CompleteDeploymentDistributionProcessor, DeploymentCreateProcessor,
    DeploymentDistributeProcessor, DeploymentRedistributor,
};
use crate::error::Result;
use crate::families::{
    CancelProcessInstanceProcessor, CompleteJobProcessor, CreateJobProcessor,
    CreateProcessInstanceProcessor, CreateTimerProcessor, DueDateTimerChecker,
    ExpireMessageProcessor, FailJobProcessor, MessageTimeToLiveChecker, PublishMessageProcessor,
    ResolveIncidentProcessor, TriggerTimerProcessor,
};
use crate::log::LogStorage;
use crate::processing::{
    ProcessorRegistry, ResponseSink, ScheduledTask, StreamProcessor, StreamProcessorHandle,
};
use crate::record::{
    DeploymentDistributionIntent, DeploymentIntent, IncidentIntent, JobIntent, MessageIntent,
    ProcessInstanceIntent, TimerIntent, ValueType,
};
use crate::state::SnapshotStore;

/// Register every engine processor against `behaviors`.
pub fn engine_processors(behaviors: &Behaviors) -> Result<ProcessorRegistry> {
    let clock = Arc::clone(behaviors.clock());

    ProcessorRegistry::builder()
        .register(
            ValueType::Deployment,
            DeploymentIntent::Create,
            DeploymentCreateProcessor::new(behaviors.clone()),
        )
        .register(
            ValueType::Deployment,
            DeploymentIntent::Distribute,
            DeploymentDistributeProcessor::new(behaviors.clone()),
        )
        .register(
            ValueType::DeploymentDistribution,
            DeploymentDistributionIntent::Complete,
            CompleteDeploymentDistributionProcessor::new(behaviors.clone()),
        )
        .register(
            ValueType::ProcessInstance,
            ProcessInstanceIntent::Create,
            CreateProcessInstanceProcessor,
        )
        .register(
            ValueType::ProcessInstance,
            ProcessInstanceIntent::Cancel,
            CancelProcessInstanceProcessor,
        )
        .register(ValueType::Job, JobIntent::Create, CreateJobProcessor)
        .register(ValueType::Job, JobIntent::Complete, CompleteJobProcessor)
        .register(ValueType::Job, JobIntent::Fail, FailJobProcessor)
        .register(
            ValueType::Incident,
            IncidentIntent::Resolve,
            ResolveIncidentProcessor,
        )
        .register(ValueType::Timer, TimerIntent::Create, CreateTimerProcessor)
        .register(ValueType::Timer, TimerIntent::Trigger, TriggerTimerProcessor)
        .register(
            ValueType::Message,
            MessageIntent::Publish,
            PublishMessageProcessor::new(clock),
        )
        .register(
            ValueType::Message,
            MessageIntent::Expire,
            ExpireMessageProcessor,
        )
        .build()
}

/// The periodic tasks every partition runs.
pub fn engine_tasks(behaviors: &Behaviors, config: &EngineConfig) -> Vec<Box<dyn ScheduledTask>> {
    vec![
        Box::new(DeploymentRedistributor::new(
            behaviors.clone(),
            config.redistribution_interval,
            config.redistribution_max_backoff_cycles,
        )),
        Box::new(DueDateTimerChecker::new(
            Arc::clone(behaviors.clock()),
            config.timer_check_interval,
        )),
        Box::new(MessageTimeToLiveChecker::new(
            Arc::clone(behaviors.clock()),
            config.message_ttl_check_interval,
        )),
    ]
}

/// Start the stream processor of one partition with the full engine wired in.
pub fn start_partition<L, S>(
    behaviors: &Behaviors,
    log: L,
    snapshots: S,
    responses: Arc<dyn ResponseSink>,
    config: EngineConfig,
) -> Result<StreamProcessorHandle>
where
    L: LogStorage,
    S: SnapshotStore,
{
    let registry = engine_processors(behaviors)?;
    let tasks = engine_tasks(behaviors, &config);

    Ok(
        StreamProcessor::builder(behaviors.partition_id(), log, snapshots, registry)
            .scheduled_tasks(tasks)
            .responses(responses)
            .metrics(behaviors.metrics().clone())
            .config(config)
            .spawn(),
    )
}
