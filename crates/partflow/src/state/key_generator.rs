//! Partition-scoped key generation.

use serde::{Deserialize, Serialize};

use crate::record::PartitionId;

/// Bits reserved for the per-partition counter; the partition id lives above.
pub const KEY_BITS: u32 = 51;

const COUNTER_MASK: i64 = (1 << KEY_BITS) - 1;

/// Combine a partition id and a counter into a cluster-unique key.
pub fn encode_partition_id(partition_id: PartitionId, counter: i64) -> i64 {
    ((partition_id as i64) << KEY_BITS) + counter
}

/// Recover the partition that issued `key`.
pub fn decode_partition_id(key: i64) -> PartitionId {
    (key >> KEY_BITS) as PartitionId
}

fn decode_counter(key: i64) -> i64 {
    key & COUNTER_MASK
}

/// Monotonic key source of one partition.
///
/// The counter is part of the engine state, so it is captured by snapshots
/// and bumped again while replaying logged records. Keys are never reused
/// across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyGenerator {
    partition_id: PartitionId,
    counter: i64,
}

impl KeyGenerator {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            counter: 0,
        }
    }

    pub fn next_key(&mut self) -> i64 {
        self.counter += 1;
        encode_partition_id(self.partition_id, self.counter)
    }

    /// The last issued key, or `None` if no key was issued yet.
    pub fn current_key(&self) -> Option<i64> {
        (self.counter > 0).then(|| encode_partition_id(self.partition_id, self.counter))
    }

    /// Advance past `key` if this partition issued it and it is ahead of the counter.
    pub fn set_key_if_higher(&mut self, key: i64) {
        if key < 0 || decode_partition_id(key) != self.partition_id {
            return;
        }
        let counter = decode_counter(key);
        if counter > self.counter {
            self.counter = counter;
        }
    }
}
