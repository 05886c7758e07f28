//! Client entrypoint: write commands and await their responses.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nonempty::NonEmpty;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::log::LogStorage;
use crate::processing::{CommandResponse, ResponseSink};
use crate::record::{Intent, PartitionId, Record, RequestMetadata, TypedValue};

/// Responses awaited by a gateway, keyed by request id.
///
/// Handed to every stream processor as its [`ResponseSink`].
#[derive(Debug, Default)]
pub struct PendingResponses {
    waiting: Mutex<HashMap<u64, oneshot::Sender<CommandResponse>>>,
}

impl PendingResponses {
    fn register(&self, request_id: u64) -> oneshot::Receiver<CommandResponse> {
        let (sender, receiver) = oneshot::channel();
        self.lock().insert(request_id, sender);
        receiver
    }

    fn forget(&self, request_id: u64) {
        self.lock().remove(&request_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<CommandResponse>>> {
        self.waiting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ResponseSink for PendingResponses {
    fn send(&self, response: CommandResponse) {
        let request_id = response.request.request_id;
        match self.lock().remove(&request_id) {
            Some(sender) => {
                let _ = sender.send(response);
            }
            None => debug!(request_id, "Dropping response nobody waits for"),
        }
    }
}

/// App-facing command gateway.
///
/// Writes a command with fresh request metadata to the target partition's
/// log and waits for the response. A missing response surfaces as
/// [`Error::RequestTimeout`], which callers should treat as retryable.
#[derive(Clone)]
pub struct CommandGateway<L> {
    logs: Arc<BTreeMap<PartitionId, L>>,
    pending: Arc<PendingResponses>,
    next_request_id: Arc<AtomicU64>,
    stream_id: u32,
    timeout: Duration,
}

impl<L: LogStorage> CommandGateway<L> {
    pub fn new(logs: impl IntoIterator<Item = (PartitionId, L)>, timeout: Duration) -> Self {
        Self {
            logs: Arc::new(logs.into_iter().collect()),
            pending: Arc::new(PendingResponses::default()),
            next_request_id: Arc::new(AtomicU64::new(1)),
            stream_id: 0,
            timeout,
        }
    }

    /// Sink to hand to the stream processors of this gateway's partitions.
    pub fn response_sink(&self) -> Arc<dyn ResponseSink> {
        self.pending.clone()
    }

    pub fn pending(&self) -> &PendingResponses {
        &self.pending
    }

    /// Write a typed command and wait for its response.
    pub async fn send<V: TypedValue>(
        &self,
        partition_id: PartitionId,
        key: i64,
        intent: impl Into<Intent>,
        value: V,
    ) -> Result<CommandResponse> {
        self.send_record(Record::command(partition_id, key, intent, value))
            .await
    }

    /// Write a prepared command to its partition and wait for the response.
    pub async fn send_record(&self, command: Record) -> Result<CommandResponse> {
        let partition_id = command.partition_id;
        let log = self
            .logs
            .get(&partition_id)
            .ok_or(Error::UnknownPartition(partition_id))?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let command = command.with_request(RequestMetadata {
            request_id,
            request_stream_id: self.stream_id,
        });
        let receiver = self.pending.register(request_id);

        if let Err(err) = log.append(NonEmpty::new(command)).await {
            self.pending.forget(request_id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) | Err(_) => {
                self.pending.forget(request_id);
                warn!(request_id, partition_id, "No response before timeout");
                Err(Error::RequestTimeout { request_id })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use crate::record::{JobIntent, JobRecord, NO_KEY, RecordType, RecordValue, ValueType};

    #[tokio::test]
    async fn response_is_correlated_by_request_id() {
        let log = MemoryLog::new();
        let gateway = CommandGateway::new([(1, log.clone())], Duration::from_secs(5));
        let sink = gateway.response_sink();

        let responder = tokio::spawn({
            let log = log.clone();
            async move {
                let mut commits = log.subscribe();
                commits.wait_for(|position| *position >= 1).await.unwrap();
                let command = log.records()[0].record.clone();
                sink.send(CommandResponse {
                    partition_id: 1,
                    key: 42,
                    record_type: RecordType::Event,
                    intent: JobIntent::Created.into(),
                    value_type: ValueType::Job,
                    value: RecordValue::Job(JobRecord::default()),
                    rejection_type: None,
                    rejection_reason: None,
                    request: command.request.unwrap(),
                });
            }
        });

        let response = gateway
            .send(1, NO_KEY, JobIntent::Create, JobRecord::default())
            .await
            .unwrap();
        responder.await.unwrap();

        assert_eq!(response.key, 42);
        assert!(gateway.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_response_times_out() {
        let gateway = CommandGateway::new([(1, MemoryLog::new())], Duration::from_millis(100));

        let err = gateway
            .send(1, NO_KEY, JobIntent::Create, JobRecord::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RequestTimeout { request_id: 1 }));
        assert!(gateway.pending().is_empty());
    }

    #[tokio::test]
    async fn unknown_partition_is_an_error() {
        let gateway = CommandGateway::new([(1, MemoryLog::new())], Duration::from_secs(1));

        let err = gateway
            .send(3, NO_KEY, JobIntent::Create, JobRecord::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnknownPartition(3)));
    }
}
