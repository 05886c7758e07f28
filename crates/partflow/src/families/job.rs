use tracing::debug;

use crate::error::Result;
use crate::processing::{CommandProcessor, ProcessingContext};
use crate::record::{IncidentIntent, IncidentRecord, JobIntent, JobRecord, Record, RejectionType};

fn job_not_found(command: &Record, action: &str) -> String {
    format!(
        "Expected to {action} job with key '{}', but no such job was found",
        command.key
    )
}

/// Handles `JOB.CREATE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateJobProcessor;

impl CommandProcessor for CreateJobProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let Some(job) = command.value_as::<JobRecord>() else {
            return ctx
                .result
                .reject(command, RejectionType::InvalidArgument, "Expected a job value");
        };
        if job.job_type.trim().is_empty() {
            return ctx.result.reject(
                command,
                RejectionType::InvalidArgument,
                "Expected job type to be non-empty",
            );
        }

        let key = ctx.next_key();
        ctx.result.append_event(key, JobIntent::Created, job.clone())?;
        ctx.result
            .respond_event(command, key, JobIntent::Created, job.clone());
        Ok(())
    }
}

/// Handles `JOB.COMPLETE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompleteJobProcessor;

impl CommandProcessor for CompleteJobProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let Some(job) = ctx.state.jobs().get(command.key) else {
            return ctx.result.reject(
                command,
                RejectionType::NotFound,
                job_not_found(command, "complete"),
            );
        };

        ctx.result
            .append_event(command.key, JobIntent::Completed, job.clone())?;
        ctx.result
            .respond_event(command, command.key, JobIntent::Completed, job.clone());
        Ok(())
    }
}

/// Handles `JOB.FAIL`.
///
/// The command carries the remaining retries. A job that runs out of
/// retries raises an incident.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailJobProcessor;

impl CommandProcessor for FailJobProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let state = ctx.state;
        let Some(job) = state.jobs().get(command.key) else {
            return ctx.result.reject(
                command,
                RejectionType::NotFound,
                job_not_found(command, "fail"),
            );
        };
        let request = command.value_as::<JobRecord>();

        let failed = JobRecord {
            retries: request.map_or(0, |request| request.retries),
            error_message: request.and_then(|request| request.error_message.clone()),
            ..job.clone()
        };
        ctx.result
            .append_event(command.key, JobIntent::Failed, failed.clone())?;

        if failed.retries == 0 {
            let incident_key = ctx.next_key();
            debug!(job_key = command.key, incident_key, "Job has no retries left, raising incident");
            ctx.result.append_event(
                incident_key,
                IncidentIntent::Created,
                IncidentRecord {
                    error_message: failed
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "No more retries left.".to_string()),
                    job_key: command.key,
                    process_instance_key: failed.process_instance_key,
                },
            )?;
        }

        ctx.result
            .respond_event(command, command.key, JobIntent::Failed, failed);
        Ok(())
    }
}
