//! In-process cluster: one stream processor per partition, connected by a
//! command router.
//!
//! Used for embedding the engine in a single process and for tests. The
//! router can make partitions unreachable to simulate network partitions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use nonempty::NonEmpty;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::behaviors::{
    Behaviors, Clock, DEPLOYMENT_PARTITION, InterPartitionCommandSender, SystemClock,
};
use crate::config::EngineConfig;
use crate::engine::start_partition;
use crate::error::{Error, Result};
use crate::gateway::CommandGateway;
use crate::log::{LogStorage, MemoryLog};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::processing::{CommandResponse, StreamProcessorHandle};
use crate::record::{
    DeploymentIntent, DeploymentRecord, DeploymentResource, Intent, NO_KEY, PartitionId, Record,
    TypedValue,
};
use crate::state::{EngineState, MemorySnapshotStore};

/// Delivers commands to other partitions' logs on a background task.
///
/// Sending only enqueues. Commands for unreachable partitions are dropped,
/// both when sent and when delivered.
#[derive(Debug, Clone)]
pub struct LocalCommandRouter {
    sender: mpsc::UnboundedSender<(PartitionId, Record)>,
    unreachable: Arc<Mutex<BTreeSet<PartitionId>>>,
}

impl LocalCommandRouter {
    /// Start routing into `logs`. The task ends when every router clone is dropped.
    pub fn spawn<L: LogStorage>(logs: BTreeMap<PartitionId, L>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let unreachable = Arc::new(Mutex::new(BTreeSet::new()));
        let router = Self {
            sender,
            unreachable: Arc::clone(&unreachable),
        };
        let task = tokio::spawn(route(logs, receiver, router.clone_unreachable()));
        (router, task)
    }

    /// Drop every command addressed to `partition_id` until reconnected.
    pub fn disconnect(&self, partition_id: PartitionId) {
        info!(partition_id, "Partition disconnected");
        self.lock().insert(partition_id);
    }

    pub fn reconnect(&self, partition_id: PartitionId) {
        info!(partition_id, "Partition reconnected");
        self.lock().remove(&partition_id);
    }

    pub fn is_reachable(&self, partition_id: PartitionId) -> bool {
        !self.lock().contains(&partition_id)
    }

    fn clone_unreachable(&self) -> Arc<Mutex<BTreeSet<PartitionId>>> {
        Arc::clone(&self.unreachable)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<PartitionId>> {
        self.unreachable
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InterPartitionCommandSender for LocalCommandRouter {
    fn send_command(&self, receiver_partition: PartitionId, command: Record) {
        if !self.is_reachable(receiver_partition) {
            warn!(
                receiver_partition,
                intent = %command.intent,
                key = command.key,
                "Dropping command to unreachable partition"
            );
            return;
        }
        if self.sender.send((receiver_partition, command)).is_err() {
            warn!(receiver_partition, "Command router stopped, dropping command");
        }
    }
}

async fn route<L: LogStorage>(
    logs: BTreeMap<PartitionId, L>,
    mut receiver: mpsc::UnboundedReceiver<(PartitionId, Record)>,
    unreachable: Arc<Mutex<BTreeSet<PartitionId>>>,
) {
    while let Some((partition_id, command)) = receiver.recv().await {
        let reachable = !unreachable
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&partition_id);
        if !reachable {
            warn!(partition_id, intent = %command.intent, "Dropping command to unreachable partition");
            continue;
        }

        let Some(log) = logs.get(&partition_id) else {
            warn!(partition_id, "Dropping command to unknown partition");
            continue;
        };
        debug!(partition_id, intent = %command.intent, key = command.key, "Delivering command");
        if let Err(err) = log.append(NonEmpty::new(command)).await {
            warn!(partition_id, error = %err, "Failed to deliver command");
        }
    }
    debug!("Command router stopped");
}

struct Partition {
    log: MemoryLog,
    snapshots: MemorySnapshotStore,
    metrics: EngineMetrics,
    handle: Option<StreamProcessorHandle>,
}

/// Builder for a [`LocalCluster`].
pub struct LocalClusterBuilder {
    partition_count: u32,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    max_event_length: Option<usize>,
}

impl LocalClusterBuilder {
    /// If not called, uses [`EngineConfig::default()`].
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Maximum serialized size of one batch on every partition's log.
    pub fn max_event_length(mut self, max_event_length: usize) -> Self {
        self.max_event_length = Some(max_event_length);
        self
    }

    /// Create the logs and start every partition. Requires a tokio runtime.
    pub fn start(self) -> Result<LocalCluster> {
        let mut partitions = BTreeMap::new();
        for partition_id in 1..=self.partition_count {
            let log = match self.max_event_length {
                Some(max) => MemoryLog::with_max_event_length(max),
                None => MemoryLog::new(),
            };
            partitions.insert(
                partition_id,
                Partition {
                    log,
                    snapshots: MemorySnapshotStore::new(),
                    metrics: EngineMetrics::new(),
                    handle: None,
                },
            );
        }

        let logs: BTreeMap<_, _> = partitions
            .iter()
            .map(|(partition_id, partition)| (*partition_id, partition.log.clone()))
            .collect();
        let (router, router_task) = LocalCommandRouter::spawn(logs.clone());
        let gateway = CommandGateway::new(logs, self.config.request_timeout);

        let mut cluster = LocalCluster {
            partition_count: self.partition_count,
            config: self.config,
            clock: self.clock,
            router,
            router_task,
            gateway,
            partitions,
        };
        for partition_id in 1..=cluster.partition_count {
            cluster.start_partition(partition_id)?;
        }
        info!(partition_count = cluster.partition_count, "Local cluster started");
        Ok(cluster)
    }
}

/// A set of partitions running in this process.
pub struct LocalCluster {
    partition_count: u32,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    router: LocalCommandRouter,
    router_task: JoinHandle<()>,
    gateway: CommandGateway<MemoryLog>,
    partitions: BTreeMap<PartitionId, Partition>,
}

impl LocalCluster {
    pub fn builder(partition_count: u32) -> LocalClusterBuilder {
        LocalClusterBuilder {
            partition_count,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            max_event_length: None,
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    pub fn router(&self) -> &LocalCommandRouter {
        &self.router
    }

    pub fn gateway(&self) -> &CommandGateway<MemoryLog> {
        &self.gateway
    }

    /// Deploy resources through the deployment partition.
    pub async fn deploy(
        &self,
        resources: impl IntoIterator<Item = DeploymentResource>,
    ) -> Result<CommandResponse> {
        self.gateway
            .send(
                DEPLOYMENT_PARTITION,
                NO_KEY,
                DeploymentIntent::Create,
                DeploymentRecord::with_resources(resources),
            )
            .await
    }

    pub async fn send<V: TypedValue>(
        &self,
        partition_id: PartitionId,
        key: i64,
        intent: impl Into<Intent>,
        value: V,
    ) -> Result<CommandResponse> {
        self.gateway.send(partition_id, key, intent, value).await
    }

    pub fn log(&self, partition_id: PartitionId) -> Result<&MemoryLog> {
        Ok(&self.partition(partition_id)?.log)
    }

    pub fn metrics(&self, partition_id: PartitionId) -> Result<MetricsSnapshot> {
        Ok(self.partition(partition_id)?.metrics.snapshot())
    }

    pub fn handle(&self, partition_id: PartitionId) -> Result<&StreamProcessorHandle> {
        self.partition(partition_id)?
            .handle
            .as_ref()
            .ok_or(Error::ProcessorClosed)
    }

    /// Run `query` against a partition's state.
    pub async fn query<R, F>(&self, partition_id: PartitionId, query: F) -> Result<R>
    where
        F: FnOnce(&EngineState) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle(partition_id)?.query(query).await
    }

    /// Close a partition's processor gracefully and start a new one.
    pub async fn restart_partition(&mut self, partition_id: PartitionId) -> Result<()> {
        let handle = self.partition_mut(partition_id)?.handle.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.close().await {
                warn!(partition_id, error = %err, "Closed failed partition");
            }
        }
        self.start_partition(partition_id)
    }

    /// Kill a partition's processor without a final snapshot and start a new one.
    pub async fn crash_partition(&mut self, partition_id: PartitionId) -> Result<()> {
        if let Some(handle) = self.partition_mut(partition_id)?.handle.take() {
            handle.abort().await;
        }
        info!(partition_id, "Partition crashed");
        self.start_partition(partition_id)
    }

    /// Close every partition and stop the router.
    pub async fn shutdown(mut self) -> Result<()> {
        let mut result = Ok(());
        for (partition_id, partition) in &mut self.partitions {
            if let Some(handle) = partition.handle.take() {
                if let Err(err) = handle.close().await {
                    warn!(partition_id, error = %err, "Partition did not close cleanly");
                    result = Err(err);
                }
            }
        }
        self.router_task.abort();
        info!("Local cluster stopped");
        result
    }

    fn start_partition(&mut self, partition_id: PartitionId) -> Result<()> {
        let sender: Arc<dyn InterPartitionCommandSender> = Arc::new(self.router.clone());
        let responses = self.gateway.response_sink();
        let config = self.config.clone();
        let clock = Arc::clone(&self.clock);
        let partition_count = self.partition_count;

        let partition = self.partition_mut(partition_id)?;
        let behaviors = Behaviors::new(
            partition_id,
            partition_count,
            sender,
            clock,
            partition.metrics.clone(),
        );
        let handle = start_partition(
            &behaviors,
            partition.log.clone(),
            partition.snapshots.clone(),
            responses,
            config,
        )?;
        partition.handle = Some(handle);
        Ok(())
    }

    fn partition(&self, partition_id: PartitionId) -> Result<&Partition> {
        self.partitions
            .get(&partition_id)
            .ok_or(Error::UnknownPartition(partition_id))
    }

    fn partition_mut(&mut self, partition_id: PartitionId) -> Result<&mut Partition> {
        self.partitions
            .get_mut(&partition_id)
            .ok_or(Error::UnknownPartition(partition_id))
    }
}
