//! Error types for partflow.

use thiserror::Error;

use crate::record::{Intent, PartitionId, ValueType};

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in partflow operations.
///
/// Business rejections are not errors: they are written to the log as
/// `COMMAND_REJECTION` records. Everything here is either a wiring mistake,
/// an infrastructure failure, or a fatal processing failure.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to serialize or deserialize a record, value or snapshot.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// PostgreSQL storage error.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// The record log rejected or failed an operation.
    ///
    /// `transient` failures are retried by the stream processor with the
    /// same, already-built processing result.
    #[error("log storage error: {message}")]
    LogStorage { message: String, transient: bool },

    /// A record batch would exceed the maximum event length of the log.
    #[error("record batch of {length} bytes exceeds the maximum event length of {max} bytes")]
    ExceededBatchRecordSize { length: usize, max: usize },

    /// Two processors were registered for the same value type and intent.
    #[error("duplicate processor registration for {value_type}.{intent}")]
    DuplicateProcessor { value_type: ValueType, intent: Intent },

    /// A processor was registered under a value type its intent does not belong to.
    #[error("intent {intent} does not belong to value type {value_type}")]
    IntentMismatch { value_type: ValueType, intent: Intent },

    /// A processor hit an unexpected condition while handling a command.
    #[error("processing failed: {0}")]
    ProcessingFailed(String),

    /// An event could not be applied to the engine state.
    #[error("state inconsistency: {0}")]
    StateInconsistency(String),

    /// The stream processor of a partition is in the failed phase.
    #[error("stream processor of partition {partition_id} failed")]
    ProcessorFailed { partition_id: PartitionId },

    /// The stream processor has been closed.
    #[error("stream processor closed")]
    ProcessorClosed,

    /// No response arrived for a request before the timeout elapsed.
    ///
    /// Callers should treat this as retryable (for example after a leader change).
    #[error("request {request_id} timed out")]
    RequestTimeout { request_id: u64 },

    /// The partition is not part of this cluster.
    #[error("unknown partition: {0}")]
    UnknownPartition(PartitionId),

    /// A downstream exporter failed to write a batch.
    #[error("exporter {exporter} failed: {message}")]
    Exporter { exporter: String, message: String },

    /// Metrics could not be encoded.
    #[error("metrics encoding failed: {0}")]
    Metrics(String),
}

impl Error {
    /// Create a transient log storage error.
    pub fn transient(message: impl Into<String>) -> Self {
        Error::LogStorage {
            message: message.into(),
            transient: true,
        }
    }

    /// Create a non-retryable log storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Error::LogStorage {
            message: message.into(),
            transient: false,
        }
    }

    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::LogStorage { transient, .. } => *transient,
            #[cfg(feature = "postgres")]
            Error::Postgres(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}
