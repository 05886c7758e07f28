//! Partitioned, event-sourced command processing.
//!
//! Partflow runs the record-processing core of a distributed workflow
//! engine. Every partition owns an append-only log; a single stream
//! processor per partition turns commands into events, and engine state is
//! nothing more than the fold of those events.
//!
//! - **Commands in, events out** — a [`CommandProcessor`] reads state and
//!   describes its outcome through a [`ResultBuilder`]
//! - **Commit, then apply** — the whole result of a command is appended to
//!   the log in one batch before any event touches state
//! - **Replay** — state is rebuilt from the latest snapshot plus the events
//!   after it, producing byte-identical state
//! - **Distribution** — deployments are pushed from partition 1 to every
//!   other partition and retried until each one acknowledges
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                     StreamProcessor (partition N)                    │
//! │                                                                      │
//! │   1. Read next command from the log                                  │
//! │   2. Look up processor by (value type, intent)                       │
//! │   3. process(command, state) → events, rejections, follow-ups        │
//! │   4. Append the batch to the log (retried while transient)           │
//! │   5. Apply events to state                                           │
//! │   6. Send response, run post-commit tasks (cross-partition sends)    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use partflow::{DeploymentResource, LocalCluster};
//!
//! let cluster = LocalCluster::builder(3).start()?;
//! let response = cluster
//!     .deploy([DeploymentResource::new("order.bpmn", bpmn_xml)])
//!     .await?;
//! assert!(!response.is_rejection());
//! cluster.shutdown().await?;
//! ```
//!
//! # Feature Flags
//!
//! - `postgres` — Enables [`PgLog`], [`PgSnapshotStore`] and
//!   [`PgExporterPositionStore`] backed by PostgreSQL
//!
//! # Design Documentation
//!
//! See `DESIGN.md` for architectural decisions.

// Allow the crate to reference itself as `partflow` for macro-generated code
extern crate self as partflow;

mod behaviors;
mod cluster;
mod config;
mod deployment;
mod engine;
mod error;
mod exporter;
mod families;
mod gateway;
pub mod log;
mod metrics;
pub mod processing;
pub mod record;
pub mod state;

pub use behaviors::{
    Behaviors, Clock, ControlledClock, DEPLOYMENT_PARTITION, InterPartitionCommandSender,
    SystemClock,
};
pub use cluster::{LocalCluster, LocalClusterBuilder, LocalCommandRouter};
pub use config::{EngineConfig, RetryPolicy};
pub use deployment::{
    CompleteDeploymentDistributionProcessor, DeploymentCreateProcessor,
    DeploymentDistributeProcessor, DeploymentRedistributor,
};
pub use engine::{engine_processors, engine_tasks, start_partition};
pub use error::{Error, Result};
#[cfg(feature = "postgres")]
pub use exporter::PgExporterPositionStore;
pub use exporter::{
    ExporterConfig, ExporterPositionStore, ExporterWorker, MemoryExporterPositionStore,
    RecordExporter,
};
pub use families::{
    CancelProcessInstanceProcessor, CompleteJobProcessor, CreateJobProcessor,
    CreateProcessInstanceProcessor, CreateTimerProcessor, DueDateTimerChecker,
    ExpireMessageProcessor, FailJobProcessor, MessageTimeToLiveChecker, PublishMessageProcessor,
    ResolveIncidentProcessor, TriggerTimerProcessor,
};
pub use gateway::{CommandGateway, PendingResponses};
#[cfg(feature = "postgres")]
pub use log::{PgLog, migrate};
pub use log::{LogStorage, MemoryLog};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use nonempty::NonEmpty;
pub use processing::{
    CommandProcessor, CommandResponse, Phase, ProcessingContext, ProcessingResult,
    ProcessorRegistry, ResponseSink, ResultBuilder, ScheduledTask, StreamProcessor,
    StreamProcessorHandle, TaskResultBuilder,
};
pub use record::{
    DeploymentDistributionRecord, DeploymentRecord, DeploymentResource, IncidentRecord, Intent,
    JobRecord, LoggedRecord, MessageRecord, NO_KEY, NO_POSITION, PartitionId,
    ProcessInstanceRecord, Record, RecordType, RecordValue, RejectionType, TimerRecord,
    TypedValue, ValueType,
};
#[cfg(feature = "postgres")]
pub use state::PgSnapshotStore;
pub use state::{EngineState, MemorySnapshotStore, Snapshot, SnapshotStore};

// Re-export derive macros
pub use partflow_macros::RecordValue;
