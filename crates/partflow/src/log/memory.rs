//! In-memory record log.

use std::sync::{Arc, Mutex};

use nonempty::NonEmpty;
use tokio::sync::watch;

use super::{DEFAULT_MAX_EVENT_LENGTH, LogStorage, serialized_length};
use crate::error::{Error, Result};
use crate::record::{LoggedRecord, Record};

/// Append-only log kept in memory.
///
/// Clones share the same log. Appends serialize on an internal mutex, so a
/// batch is never observed half-written.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    records: Mutex<Vec<LoggedRecord>>,
    commit_position: watch::Sender<i64>,
    max_event_length: usize,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::with_max_event_length(DEFAULT_MAX_EVENT_LENGTH)
    }

    pub fn with_max_event_length(max_event_length: usize) -> Self {
        let (commit_position, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(Vec::new()),
                commit_position,
                max_event_length,
            }),
        }
    }

    /// Copy of every record in the log, in position order.
    pub fn records(&self) -> Vec<LoggedRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LoggedRecord>> {
        // A poisoned lock only means another appender panicked; the vector
        // itself is only ever extended by complete batches.
        self.inner
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStorage for MemoryLog {
    async fn append(&self, batch: NonEmpty<Record>) -> Result<i64> {
        let mut length = 0;
        for record in batch.iter() {
            length += serialized_length(record)?;
        }
        if !self.can_write_event_of_length(length) {
            return Err(Error::ExceededBatchRecordSize {
                length,
                max: self.inner.max_event_length,
            });
        }

        let last_position = {
            let mut records = self.lock();
            let mut position = records.len() as i64;
            for record in batch {
                position += 1;
                records.push(LoggedRecord { position, record });
            }
            position
        };

        self.inner.commit_position.send_replace(last_position);
        Ok(last_position)
    }

    async fn read_from(&self, from: i64, limit: usize) -> Result<Vec<LoggedRecord>> {
        let records = self.lock();
        let start = from.max(1) as usize - 1;
        Ok(records.iter().skip(start).take(limit).cloned().collect())
    }

    async fn last_position(&self) -> Result<i64> {
        Ok(self.lock().len() as i64)
    }

    fn max_event_length(&self) -> usize {
        self.inner.max_event_length
    }

    fn subscribe(&self) -> watch::Receiver<i64> {
        self.inner.commit_position.subscribe()
    }
}
