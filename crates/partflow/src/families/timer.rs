use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::behaviors::Clock;
use crate::error::Result;
use crate::processing::{
    CommandProcessor, ProcessingContext, ScheduledTask, TaskResultBuilder,
};
use crate::record::{Record, RejectionType, TimerIntent, TimerRecord};
use crate::state::EngineState;

/// Handles `TIMER.CREATE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateTimerProcessor;

impl CommandProcessor for CreateTimerProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let Some(timer) = command.value_as::<TimerRecord>() else {
            return ctx
                .result
                .reject(command, RejectionType::InvalidArgument, "Expected a timer value");
        };

        let key = ctx.next_key();
        ctx.result.append_event(key, TimerIntent::Created, timer.clone())?;
        ctx.result
            .respond_event(command, key, TimerIntent::Created, timer.clone());
        Ok(())
    }
}

/// Handles `TIMER.TRIGGER`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerTimerProcessor;

impl CommandProcessor for TriggerTimerProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let Some(timer) = ctx.state.timers().get(command.key) else {
            return ctx.result.reject(
                command,
                RejectionType::NotFound,
                format!(
                    "Expected to trigger timer with key '{}', but no such timer was found",
                    command.key
                ),
            );
        };

        ctx.result
            .append_event(command.key, TimerIntent::Triggered, timer.clone())?;
        ctx.result
            .respond_event(command, command.key, TimerIntent::Triggered, timer.clone());
        Ok(())
    }
}

/// Writes `TIMER.TRIGGER` for every timer whose due date has passed.
///
/// A timer is triggered once per checker lifetime; if the command is lost
/// with a crash, the next checker triggers it again.
pub struct DueDateTimerChecker {
    clock: Arc<dyn Clock>,
    interval: Duration,
    triggered: BTreeSet<i64>,
}

impl DueDateTimerChecker {
    pub fn new(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            triggered: BTreeSet::new(),
        }
    }
}

impl ScheduledTask for DueDateTimerChecker {
    fn name(&self) -> &'static str {
        "due-date-timer-checker"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run(&mut self, state: &EngineState, commands: &mut TaskResultBuilder) {
        let timers = state.timers();
        self.triggered.retain(|key| timers.contains(*key));

        let now = self.clock.now_millis();
        for (key, timer) in timers.due_timers(now) {
            if self.triggered.insert(key) {
                debug!(timer_key = key, due_date = timer.due_date, "Triggering due timer");
                commands.append_command(key, TimerIntent::Trigger, timer.clone());
            }
        }
    }
}
