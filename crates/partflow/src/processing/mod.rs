//! Record processing.
//!
//! Every partition runs one [`StreamProcessor`]: it reads its log in
//! position order, dispatches each new command to the [`CommandProcessor`]
//! registered for the command's value type and intent, commits the produced
//! [`ProcessingResult`] atomically, and only then applies the resulting
//! events to the [`EngineState`](crate::state::EngineState).
//!
//! - [`ProcessorRegistry`] — dispatch table, validated when built
//! - [`ResultBuilder`] — per-command output, size-checked on every append
//! - [`ScheduledTask`] — periodic work run on the processor's own task
//! - [`StreamProcessorHandle`] — lifecycle control and state queries

mod appliers;
mod registry;
mod result;
mod scheduled;
mod stream_processor;

pub(crate) use appliers::apply_event;
pub use registry::{ProcessorRegistry, ProcessorRegistryBuilder};
pub use result::{CommandResponse, PostCommitTask, ProcessingResult, ResultBuilder};
pub use scheduled::{ScheduledTask, TaskResultBuilder};
pub use stream_processor::{
    NoopResponseSink, Phase, ResponseSink, StreamProcessor, StreamProcessorBuilder,
    StreamProcessorHandle, replay_state,
};

use crate::error::Result;
use crate::record::Record;
use crate::state::{EngineState, KeyGenerator};

/// Handles one kind of command.
///
/// Processors never mutate state. They read the current [`EngineState`],
/// decide, and describe the outcome through the [`ResultBuilder`] in the
/// context. Returning an error fails the stream processor, except for
/// [`Error::ExceededBatchRecordSize`](crate::Error::ExceededBatchRecordSize),
/// which turns into a rejection of the command.
pub trait CommandProcessor: Send + Sync + 'static {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()>;
}

/// What a processor may see and touch while handling one command.
pub struct ProcessingContext<'a> {
    /// State as of the previous command.
    pub state: &'a EngineState,
    /// Output of this command.
    pub result: &'a mut ResultBuilder,
    keys: &'a mut KeyGenerator,
    position: i64,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(
        state: &'a EngineState,
        keys: &'a mut KeyGenerator,
        result: &'a mut ResultBuilder,
        position: i64,
    ) -> Self {
        Self {
            state,
            result,
            keys,
            position,
        }
    }

    /// Issue a fresh key.
    ///
    /// Keys issued for a command that ends up not being committed are
    /// handed out again.
    pub fn next_key(&mut self) -> i64 {
        self.keys.next_key()
    }

    /// Log position of the command being processed.
    pub fn position(&self) -> i64 {
        self.position
    }
}
