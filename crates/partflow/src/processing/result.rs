//! Processing results and the builder processors fill in.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::log::serialized_length;
use crate::record::{
    Intent, PartitionId, Record, RecordType, RecordValue, RejectionType, RequestMetadata,
    TypedValue, ValueType,
};

/// Side effect run strictly after the batch it belongs to is durable.
pub type PostCommitTask = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// The reply to a client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub partition_id: PartitionId,
    pub key: i64,
    pub record_type: RecordType,
    pub intent: Intent,
    pub value_type: ValueType,
    pub value: RecordValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_type: Option<RejectionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub request: RequestMetadata,
}

impl CommandResponse {
    pub fn is_rejection(&self) -> bool {
        self.record_type == RecordType::CommandRejection
    }

    /// Borrow the value as a concrete payload type.
    pub fn value_as<V: TypedValue>(&self) -> Option<&V> {
        V::from_record_value(&self.value)
    }
}

/// Accumulates the output of processing one command.
///
/// Nothing built here is visible outside the stream processor until the
/// result has been committed. The builder is consumed by [`build`](Self::build).
pub struct ResultBuilder {
    partition_id: PartitionId,
    source_position: i64,
    max_batch_length: usize,
    batch_length: usize,
    records: Vec<Record>,
    response: Option<CommandResponse>,
    post_commit_tasks: Vec<PostCommitTask>,
}

impl ResultBuilder {
    pub fn new(partition_id: PartitionId, source_position: i64, max_batch_length: usize) -> Self {
        Self {
            partition_id,
            source_position,
            max_batch_length,
            batch_length: 0,
            records: Vec::new(),
            response: None,
            post_commit_tasks: Vec::new(),
        }
    }

    /// Position of the command this result is built for.
    pub fn source_position(&self) -> i64 {
        self.source_position
    }

    /// Returns `true` if the batch can grow by `length` serialized bytes.
    pub fn can_write_event_of_length(&self, length: usize) -> bool {
        self.batch_length + length <= self.max_batch_length
    }

    /// Append a record to the batch.
    ///
    /// Fails with [`Error::ExceededBatchRecordSize`] and leaves the batch
    /// untouched if the record would not fit, so the caller can split work.
    pub fn append_record(
        &mut self,
        key: i64,
        record_type: RecordType,
        intent: impl Into<Intent>,
        rejection_type: Option<RejectionType>,
        rejection_reason: Option<String>,
        value: RecordValue,
    ) -> Result<()> {
        let record = Record {
            key,
            partition_id: self.partition_id,
            record_type,
            intent: intent.into(),
            rejection_type,
            rejection_reason,
            value_type: value.value_type(),
            source_record_position: self.source_position,
            request: None,
            value,
        };

        let length = serialized_length(&record)?;
        if !self.can_write_event_of_length(length) {
            return Err(Error::ExceededBatchRecordSize {
                length: self.batch_length + length,
                max: self.max_batch_length,
            });
        }

        self.batch_length += length;
        self.records.push(record);
        Ok(())
    }

    pub fn append_event<V: TypedValue>(
        &mut self,
        key: i64,
        intent: impl Into<Intent>,
        value: V,
    ) -> Result<()> {
        self.append_record(
            key,
            RecordType::Event,
            intent,
            None,
            None,
            value.into_record_value(),
        )
    }

    /// Append a follow-up command to this partition's own log.
    pub fn append_command<V: TypedValue>(
        &mut self,
        key: i64,
        intent: impl Into<Intent>,
        value: V,
    ) -> Result<()> {
        self.append_record(
            key,
            RecordType::Command,
            intent,
            None,
            None,
            value.into_record_value(),
        )
    }

    pub fn append_rejection(
        &mut self,
        command: &Record,
        rejection_type: RejectionType,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.append_record(
            command.key,
            RecordType::CommandRejection,
            command.intent,
            Some(rejection_type),
            Some(reason.into()),
            command.value.clone(),
        )
    }

    /// Set the response, replacing any previous one.
    pub fn with_response(&mut self, response: CommandResponse) {
        self.response = Some(response);
    }

    /// Respond with an event if the command came from a client request.
    pub fn respond_event<V: TypedValue>(
        &mut self,
        command: &Record,
        key: i64,
        intent: impl Into<Intent>,
        value: V,
    ) {
        let Some(request) = command.request else {
            return;
        };
        self.with_response(CommandResponse {
            partition_id: self.partition_id,
            key,
            record_type: RecordType::Event,
            intent: intent.into(),
            value_type: V::VALUE_TYPE,
            value: value.into_record_value(),
            rejection_type: None,
            rejection_reason: None,
            request,
        });
    }

    /// Respond with a rejection if the command came from a client request.
    pub fn respond_rejection(
        &mut self,
        command: &Record,
        rejection_type: RejectionType,
        reason: impl Into<String>,
    ) {
        let Some(request) = command.request else {
            return;
        };
        self.with_response(CommandResponse {
            partition_id: self.partition_id,
            key: command.key,
            record_type: RecordType::CommandRejection,
            intent: command.intent,
            value_type: command.value_type,
            value: command.value.clone(),
            rejection_type: Some(rejection_type),
            rejection_reason: Some(reason.into()),
            request,
        });
    }

    /// Write a rejection record and respond with it.
    pub fn reject(
        &mut self,
        command: &Record,
        rejection_type: RejectionType,
        reason: impl Into<String>,
    ) -> Result<()> {
        let reason = reason.into();
        self.append_rejection(command, rejection_type, reason.clone())?;
        self.respond_rejection(command, rejection_type, reason);
        Ok(())
    }

    pub fn append_post_commit_task(
        &mut self,
        task: impl FnOnce() -> Result<()> + Send + 'static,
    ) {
        self.post_commit_tasks.push(Box::new(task));
    }

    /// Discard the batch, the response and the post-commit tasks.
    ///
    /// The source position is kept.
    pub fn reset(&mut self) {
        self.records.clear();
        self.batch_length = 0;
        self.response = None;
        self.post_commit_tasks.clear();
    }

    pub fn reset_post_commit_tasks(&mut self) {
        self.post_commit_tasks.clear();
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn response(&self) -> Option<&CommandResponse> {
        self.response.as_ref()
    }

    /// Freeze everything accumulated so far.
    pub fn build(self) -> ProcessingResult {
        ProcessingResult {
            records: self.records,
            response: self.response,
            post_commit_tasks: self.post_commit_tasks,
        }
    }
}

impl fmt::Debug for ResultBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultBuilder")
            .field("source_position", &self.source_position)
            .field("records", &self.records.len())
            .field("batch_length", &self.batch_length)
            .field("response", &self.response.is_some())
            .field("post_commit_tasks", &self.post_commit_tasks.len())
            .finish()
    }
}

/// Immutable, all-or-nothing output of processing one command.
pub struct ProcessingResult {
    records: Vec<Record>,
    response: Option<CommandResponse>,
    post_commit_tasks: Vec<PostCommitTask>,
}

impl ProcessingResult {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn response(&self) -> Option<&CommandResponse> {
        self.response.as_ref()
    }

    pub fn post_commit_task_count(&self) -> usize {
        self.post_commit_tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.response.is_none() && self.post_commit_tasks.is_empty()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (Vec<Record>, Option<CommandResponse>, Vec<PostCommitTask>) {
        (self.records, self.response, self.post_commit_tasks)
    }
}

impl fmt::Debug for ProcessingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingResult")
            .field("records", &self.records)
            .field("response", &self.response)
            .field("post_commit_tasks", &self.post_commit_tasks.len())
            .finish()
    }
}
