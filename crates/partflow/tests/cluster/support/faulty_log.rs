use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use partflow::{Error, LogStorage, LoggedRecord, MemoryLog, NonEmpty, Record, Result};
use tokio::sync::watch;

/// A [`MemoryLog`] whose next appends fail with a transient error.
#[derive(Debug, Clone, Default)]
pub struct FaultyLog {
    inner: MemoryLog,
    failures_left: Arc<AtomicUsize>,
    failed_appends: Arc<AtomicUsize>,
}

impl FaultyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryLog {
        &self.inner
    }

    /// Make the next `count` appends fail.
    pub fn fail_next_appends(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn failed_appends(&self) -> usize {
        self.failed_appends.load(Ordering::SeqCst)
    }
}

impl LogStorage for FaultyLog {
    async fn append(&self, batch: NonEmpty<Record>) -> Result<i64> {
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            self.failed_appends.fetch_add(1, Ordering::SeqCst);
            return Err(Error::transient("injected append failure"));
        }
        self.inner.append(batch).await
    }

    async fn read_from(&self, from: i64, limit: usize) -> Result<Vec<LoggedRecord>> {
        self.inner.read_from(from, limit).await
    }

    async fn last_position(&self) -> Result<i64> {
        self.inner.last_position().await
    }

    fn max_event_length(&self) -> usize {
        self.inner.max_event_length()
    }

    fn subscribe(&self) -> watch::Receiver<i64> {
        self.inner.subscribe()
    }
}
