//! The record: the atomic unit of a partition's log.
//!
//! A record is a command (something that should happen), an event (something
//! that happened) or a command rejection. Every record carries a
//! [`ValueType`], a value-type-scoped [`Intent`] and a typed [`RecordValue`].

mod intent;
mod value;

use serde::{Deserialize, Serialize};

pub use intent::{
    DeploymentDistributionIntent, DeploymentIntent, IncidentIntent, Intent, JobIntent,
    MessageIntent, ProcessInstanceIntent, TimerIntent, ValueType,
};
pub use value::{
    DecisionMetadata, DeploymentDistributionRecord, DeploymentRecord, DeploymentResource,
    IncidentRecord, JobRecord, MessageRecord, ProcessInstanceRecord, ProcessMetadata,
    RecordValue, TimerRecord, TypedValue,
};

/// Identifier of a partition. Partitions are numbered from 1.
pub type PartitionId = u32;

/// Key of records that do not (yet) identify an entity.
pub const NO_KEY: i64 = -1;

/// Source position of records that were not caused by a logged command.
pub const NO_POSITION: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Command,
    Event,
    CommandRejection,
}

/// Stable reason category for a rejected command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionType {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    InvalidState,
    ProcessingError,
    ExceededBatchRecordSize,
}

/// Correlation ids of a client request, echoed on the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub request_id: u64,
    pub request_stream_id: u32,
}

/// A log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: i64,
    pub partition_id: PartitionId,
    pub record_type: RecordType,
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_type: Option<RejectionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub value_type: ValueType,
    pub source_record_position: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestMetadata>,
    pub value: RecordValue,
}

impl Record {
    /// Create a command addressed to `partition_id`.
    pub fn command<V: TypedValue>(
        partition_id: PartitionId,
        key: i64,
        intent: impl Into<Intent>,
        value: V,
    ) -> Self {
        let intent = intent.into();
        debug_assert_eq!(intent.value_type(), V::VALUE_TYPE);
        Self {
            key,
            partition_id,
            record_type: RecordType::Command,
            intent,
            rejection_type: None,
            rejection_reason: None,
            value_type: V::VALUE_TYPE,
            source_record_position: NO_POSITION,
            request: None,
            value: value.into_record_value(),
        }
    }

    /// Attach client correlation ids.
    pub fn with_request(mut self, request: RequestMetadata) -> Self {
        self.request = Some(request);
        self
    }

    /// Borrow the value as a concrete payload type.
    pub fn value_as<V: TypedValue>(&self) -> Option<&V> {
        V::from_record_value(&self.value)
    }

    pub fn is_command(&self) -> bool {
        self.record_type == RecordType::Command
    }

    pub fn is_event(&self) -> bool {
        self.record_type == RecordType::Event
    }
}

/// A record together with the position the log assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedRecord {
    pub position: i64,
    pub record: Record,
}
