use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::behaviors::Clock;
use crate::error::Result;
use crate::processing::{
    CommandProcessor, ProcessingContext, ScheduledTask, TaskResultBuilder,
};
use crate::record::{MessageIntent, MessageRecord, Record, RejectionType};
use crate::state::EngineState;

/// Handles `MESSAGE.PUBLISH`.
///
/// The deadline is taken from the clock here and written into the event, so
/// replay does not depend on the time it runs at.
pub struct PublishMessageProcessor {
    clock: Arc<dyn Clock>,
}

impl PublishMessageProcessor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl CommandProcessor for PublishMessageProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let Some(message) = command.value_as::<MessageRecord>() else {
            return ctx
                .result
                .reject(command, RejectionType::InvalidArgument, "Expected a message value");
        };
        if message.name.is_empty() {
            return ctx.result.reject(
                command,
                RejectionType::InvalidArgument,
                "Expected message name to be non-empty",
            );
        }
        if ctx.state.messages().exists(message) {
            return ctx.result.reject(
                command,
                RejectionType::AlreadyExists,
                format!(
                    "Expected to publish a new message with id '{}', but a message with that id was already published",
                    message.message_id.as_deref().unwrap_or_default()
                ),
            );
        }

        let key = ctx.next_key();
        let published = MessageRecord {
            deadline: self.clock.now_millis().saturating_add(message.time_to_live.max(0)),
            ..message.clone()
        };
        ctx.result
            .append_event(key, MessageIntent::Published, published.clone())?;
        ctx.result
            .respond_event(command, key, MessageIntent::Published, published);
        Ok(())
    }
}

/// Handles `MESSAGE.EXPIRE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpireMessageProcessor;

impl CommandProcessor for ExpireMessageProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let Some(message) = ctx.state.messages().get(command.key) else {
            return ctx.result.reject(
                command,
                RejectionType::NotFound,
                format!(
                    "Expected to expire message with key '{}', but no such message was found",
                    command.key
                ),
            );
        };

        ctx.result
            .append_event(command.key, MessageIntent::Expired, message.clone())?;
        ctx.result
            .respond_event(command, command.key, MessageIntent::Expired, message.clone());
        Ok(())
    }
}

/// Writes `MESSAGE.EXPIRE` for buffered messages past their deadline.
pub struct MessageTimeToLiveChecker {
    clock: Arc<dyn Clock>,
    interval: Duration,
    expiring: BTreeSet<i64>,
}

impl MessageTimeToLiveChecker {
    pub fn new(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            expiring: BTreeSet::new(),
        }
    }
}

impl ScheduledTask for MessageTimeToLiveChecker {
    fn name(&self) -> &'static str {
        "message-ttl-checker"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run(&mut self, state: &EngineState, commands: &mut TaskResultBuilder) {
        let messages = state.messages();
        self.expiring.retain(|key| messages.get(*key).is_some());

        for (key, message) in messages.expired(self.clock.now_millis()) {
            if self.expiring.insert(key) {
                commands.append_command(key, MessageIntent::Expire, message.clone());
            }
        }
    }
}
