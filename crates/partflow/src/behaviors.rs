//! Shared capabilities handed to processors and scheduled tasks.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;

use crate::metrics::EngineMetrics;
use crate::record::{PartitionId, Record};

/// Partition that owns deployments and distributes them to all others.
pub const DEPLOYMENT_PARTITION: PartitionId = 1;

/// Fire-and-forget delivery of commands to other partitions.
///
/// Delivery is at-most-once: a command may be lost, but is never duplicated
/// by the sender. Callers that need delivery retry until acknowledged.
/// Sending only enqueues and must never block the caller.
pub trait InterPartitionCommandSender: Send + Sync + 'static {
    fn send_command(&self, receiver_partition: PartitionId, command: Record);
}

/// Wall clock used by processors and scheduled tasks, in epoch milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ControlledClock {
    millis: Arc<AtomicI64>,
}

impl ControlledClock {
    pub fn new(millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(millis)),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ControlledClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Everything processors of one partition share.
#[derive(Clone)]
pub struct Behaviors {
    partition_id: PartitionId,
    partition_count: u32,
    sender: Arc<dyn InterPartitionCommandSender>,
    clock: Arc<dyn Clock>,
    metrics: EngineMetrics,
}

impl Behaviors {
    pub fn new(
        partition_id: PartitionId,
        partition_count: u32,
        sender: Arc<dyn InterPartitionCommandSender>,
        clock: Arc<dyn Clock>,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            partition_id,
            partition_count,
            sender,
            clock,
            metrics,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// All partitions except this one, ascending.
    pub fn other_partitions(&self) -> Vec<PartitionId> {
        (1..=self.partition_count)
            .filter(|partition_id| *partition_id != self.partition_id)
            .collect()
    }

    pub fn sender(&self) -> &Arc<dyn InterPartitionCommandSender> {
        &self.sender
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }
}

impl fmt::Debug for Behaviors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behaviors")
            .field("partition_id", &self.partition_id)
            .field("partition_count", &self.partition_count)
            .finish_non_exhaustive()
    }
}
