//! Partition-local engine state.
//!
//! [`EngineState`] is owned by exactly one stream processor. Processors read
//! it; only the event appliers (run after a batch was committed to the log)
//! mutate it. All sub-stores are ordered maps, so two states built from the
//! same log prefix serialize to identical bytes.

mod deployment;
mod key_generator;
#[cfg(feature = "postgres")]
mod postgres;
mod runtime;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

pub use deployment::{DeploymentState, DistributionState};
pub use key_generator::{KEY_BITS, KeyGenerator, decode_partition_id, encode_partition_id};
#[cfg(feature = "postgres")]
pub use postgres::PgSnapshotStore;
pub use runtime::{
    EntityState, IncidentState, JobState, MessageState, ProcessInstanceState, TimerState,
};

use crate::error::Result;
use crate::record::{NO_POSITION, PartitionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    partition_id: PartitionId,
    key_generator: KeyGenerator,
    last_processed_position: i64,
    deployments: DeploymentState,
    distributions: DistributionState,
    process_instances: ProcessInstanceState,
    jobs: JobState,
    incidents: IncidentState,
    timers: TimerState,
    messages: MessageState,
}

impl EngineState {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            key_generator: KeyGenerator::new(partition_id),
            last_processed_position: NO_POSITION,
            deployments: DeploymentState::default(),
            distributions: DistributionState::default(),
            process_instances: ProcessInstanceState::default(),
            jobs: JobState::default(),
            incidents: IncidentState::default(),
            timers: TimerState::default(),
            messages: MessageState::default(),
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn key_generator(&self) -> &KeyGenerator {
        &self.key_generator
    }

    /// Position of the last command whose outcome is reflected in this state.
    pub fn last_processed_position(&self) -> i64 {
        self.last_processed_position
    }

    pub fn deployments(&self) -> &DeploymentState {
        &self.deployments
    }

    pub fn distributions(&self) -> &DistributionState {
        &self.distributions
    }

    pub fn process_instances(&self) -> &ProcessInstanceState {
        &self.process_instances
    }

    pub fn jobs(&self) -> &JobState {
        &self.jobs
    }

    pub fn incidents(&self) -> &IncidentState {
        &self.incidents
    }

    pub fn timers(&self) -> &TimerState {
        &self.timers
    }

    pub fn messages(&self) -> &MessageState {
        &self.messages
    }

    /// Serialized form used for snapshots and determinism checks.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub(crate) fn key_generator_mut(&mut self) -> &mut KeyGenerator {
        &mut self.key_generator
    }

    pub(crate) fn set_key_generator(&mut self, key_generator: KeyGenerator) {
        self.key_generator = key_generator;
    }

    pub(crate) fn mark_processed(&mut self, position: i64) {
        self.last_processed_position = self.last_processed_position.max(position);
    }

    pub(crate) fn deployments_mut(&mut self) -> &mut DeploymentState {
        &mut self.deployments
    }

    pub(crate) fn distributions_mut(&mut self) -> &mut DistributionState {
        &mut self.distributions
    }

    pub(crate) fn process_instances_mut(&mut self) -> &mut ProcessInstanceState {
        &mut self.process_instances
    }

    pub(crate) fn jobs_mut(&mut self) -> &mut JobState {
        &mut self.jobs
    }

    pub(crate) fn incidents_mut(&mut self) -> &mut IncidentState {
        &mut self.incidents
    }

    pub(crate) fn timers_mut(&mut self) -> &mut TimerState {
        &mut self.timers
    }

    pub(crate) fn messages_mut(&mut self) -> &mut MessageState {
        &mut self.messages
    }
}

/// Engine state consistent with a log position.
///
/// Replay after loading a snapshot starts at `position + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub partition_id: PartitionId,
    pub position: i64,
    pub state: EngineState,
}

/// Durable storage for the latest snapshot of each partition.
pub trait SnapshotStore: Send + Sync + Clone + 'static {
    /// Persist `snapshot`, replacing the previous one of its partition.
    fn persist(&self, snapshot: &Snapshot) -> impl Future<Output = Result<()>> + Send;

    /// Load the latest snapshot of a partition, if any.
    fn latest(
        &self,
        partition_id: PartitionId,
    ) -> impl Future<Output = Result<Option<Snapshot>>> + Send;
}

/// Snapshot store keeping serialized snapshots in memory.
///
/// Clones share storage, so a restarted stream processor sees the snapshots
/// of its predecessor.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    snapshots: Arc<Mutex<HashMap<PartitionId, Vec<u8>>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    async fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(snapshot.partition_id, bytes);
        Ok(())
    }

    async fn latest(&self, partition_id: PartitionId) -> Result<Option<Snapshot>> {
        let bytes = self
            .snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&partition_id)
            .cloned();
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
