//! Record log abstraction.
//!
//! Each partition owns one append-only, totally ordered log. The engine only
//! needs three things from it: atomic batch appends, ordered reads from a
//! position, and a notification when new records are committed.
//!
//! - [`MemoryLog`] — in-process log used by the local cluster and tests
//! - [`PgLog`] — PostgreSQL-backed log (requires `postgres` feature)

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use std::future::Future;

use nonempty::NonEmpty;
use tokio::sync::watch;

pub use memory::MemoryLog;
#[cfg(feature = "postgres")]
pub use postgres::{PgLog, migrate};

use crate::error::Result;
use crate::record::{LoggedRecord, Record};

/// Default upper bound for the serialized size of one appended batch.
pub const DEFAULT_MAX_EVENT_LENGTH: usize = 4 * 1024 * 1024;

/// Storage backend for a partition's record log.
///
/// Implementations must make [`append`](Self::append) atomic: either every
/// record of the batch becomes readable, or none does.
pub trait LogStorage: Send + Sync + Clone + 'static {
    /// Append a batch of records atomically.
    ///
    /// Positions are assigned in batch order. Returns the position of the last
    /// record of the batch.
    fn append(&self, batch: NonEmpty<Record>) -> impl Future<Output = Result<i64>> + Send;

    /// Read up to `limit` records whose position is at least `from`, ascending.
    fn read_from(
        &self,
        from: i64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LoggedRecord>>> + Send;

    /// Position of the last committed record, or `0` for an empty log.
    fn last_position(&self) -> impl Future<Output = Result<i64>> + Send;

    /// Maximum serialized length of one appended batch.
    fn max_event_length(&self) -> usize;

    /// Returns `true` if a batch of `length` serialized bytes fits.
    fn can_write_event_of_length(&self, length: usize) -> bool {
        length <= self.max_event_length()
    }

    /// Watch the commit position. The value changes after every append.
    fn subscribe(&self) -> watch::Receiver<i64>;
}

/// Serialized length of a record as it is measured against the event limit.
pub fn serialized_length(record: &Record) -> Result<usize> {
    Ok(serde_json::to_vec(record)?.len())
}
