use crate::error::Result;
use crate::processing::{CommandProcessor, ProcessingContext};
use crate::record::{IncidentIntent, Record, RejectionType};

/// Handles `INCIDENT.RESOLVE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveIncidentProcessor;

impl CommandProcessor for ResolveIncidentProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let Some(incident) = ctx.state.incidents().get(command.key) else {
            return ctx.result.reject(
                command,
                RejectionType::NotFound,
                format!(
                    "Expected to resolve incident with key '{}', but no such incident was found",
                    command.key
                ),
            );
        };

        ctx.result
            .append_event(command.key, IncidentIntent::Resolved, incident.clone())?;
        ctx.result.respond_event(
            command,
            command.key,
            IncidentIntent::Resolved,
            incident.clone(),
        );
        Ok(())
    }
}
