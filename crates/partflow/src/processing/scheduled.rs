//! Periodic work that runs on a stream processor's own task.

use std::time::Duration;

use crate::record::{Intent, PartitionId, Record, TypedValue};
use crate::state::EngineState;

/// A task the stream processor runs at a fixed interval while processing.
///
/// Tasks observe the current state but can only influence it by writing
/// commands to the partition's log. They may also send commands to other
/// partitions directly.
pub trait ScheduledTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    fn run(&mut self, state: &EngineState, commands: &mut TaskResultBuilder);
}

/// Commands a scheduled task wants written to its partition's log.
#[derive(Debug)]
pub struct TaskResultBuilder {
    partition_id: PartitionId,
    commands: Vec<Record>,
}

impl TaskResultBuilder {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            commands: Vec::new(),
        }
    }

    pub fn append_command<V: TypedValue>(&mut self, key: i64, intent: impl Into<Intent>, value: V) {
        self.commands
            .push(Record::command(self.partition_id, key, intent, value));
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn into_commands(self) -> Vec<Record> {
        self.commands
    }
}
