use crate::error::Result;
use crate::processing::{CommandProcessor, ProcessingContext};
use crate::record::{
    JobIntent, JobRecord, ProcessInstanceIntent, ProcessInstanceRecord, Record, RejectionType,
};

/// Retries of the job a new process instance starts with.
const DEFAULT_JOB_RETRIES: u32 = 3;

/// Handles `PROCESS_INSTANCE.CREATE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateProcessInstanceProcessor;

impl CommandProcessor for CreateProcessInstanceProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let Some(request) = command.value_as::<ProcessInstanceRecord>() else {
            return ctx.result.reject(
                command,
                RejectionType::InvalidArgument,
                "Expected a process instance value",
            );
        };

        let state = ctx.state;
        let deployments = state.deployments();
        let definition = match request.version {
            Some(version) => deployments.process_by_version(&request.bpmn_process_id, version),
            None => deployments.latest_process(&request.bpmn_process_id),
        };
        let Some(definition) = definition else {
            let version = request
                .version
                .map_or_else(|| "latest".to_string(), |version| version.to_string());
            return ctx.result.reject(
                command,
                RejectionType::NotFound,
                format!(
                    "Expected to find process definition with process ID '{}' and version '{version}', but none found",
                    request.bpmn_process_id
                ),
            );
        };

        let instance_key = ctx.next_key();
        let instance = ProcessInstanceRecord {
            bpmn_process_id: definition.bpmn_process_id.clone(),
            version: Some(definition.version),
            process_definition_key: definition.process_definition_key,
            variables: request.variables.clone(),
        };
        ctx.result
            .append_event(instance_key, ProcessInstanceIntent::Created, instance.clone())?;

        if let Some(job_type) = &definition.job_type {
            let job_key = ctx.next_key();
            ctx.result.append_event(
                job_key,
                JobIntent::Created,
                JobRecord {
                    job_type: job_type.clone(),
                    retries: DEFAULT_JOB_RETRIES,
                    process_instance_key: instance_key,
                    error_message: None,
                },
            )?;
        }

        ctx.result
            .respond_event(command, instance_key, ProcessInstanceIntent::Created, instance);
        Ok(())
    }
}

/// Handles `PROCESS_INSTANCE.CANCEL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancelProcessInstanceProcessor;

impl CommandProcessor for CancelProcessInstanceProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let Some(instance) = ctx.state.process_instances().get(command.key) else {
            return ctx.result.reject(
                command,
                RejectionType::NotFound,
                format!(
                    "Expected to cancel a process instance with key '{}', but no such process instance was found",
                    command.key
                ),
            );
        };

        ctx.result
            .append_event(command.key, ProcessInstanceIntent::Canceled, instance.clone())?;
        ctx.result.respond_event(
            command,
            command.key,
            ProcessInstanceIntent::Canceled,
            instance.clone(),
        );
        Ok(())
    }
}
