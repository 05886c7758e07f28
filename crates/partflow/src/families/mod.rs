//! Processors for the runtime entities.
//!
//! These carry just enough semantics to drive the pipeline end to end:
//! process instances start from deployed definitions, jobs fail into
//! incidents, timers fire when due and messages expire.

mod incident;
mod job;
mod message;
mod process_instance;
mod timer;

pub use incident::ResolveIncidentProcessor;
pub use job::{CompleteJobProcessor, CreateJobProcessor, FailJobProcessor};
pub use message::{ExpireMessageProcessor, MessageTimeToLiveChecker, PublishMessageProcessor};
pub use process_instance::{CancelProcessInstanceProcessor, CreateProcessInstanceProcessor};
pub use timer::{CreateTimerProcessor, DueDateTimerChecker, TriggerTimerProcessor};
