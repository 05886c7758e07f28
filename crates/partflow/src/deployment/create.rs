use tracing::{debug, info};

use super::resources::parse_resources;
use crate::behaviors::Behaviors;
use crate::error::Result;
use crate::processing::{CommandProcessor, ProcessingContext};
use crate::record::{
    DecisionMetadata, DeploymentDistributionIntent, DeploymentDistributionRecord,
    DeploymentIntent, DeploymentRecord, ProcessMetadata, Record, RejectionType,
};

/// Handles `DEPLOYMENT.CREATE` on the owning partition.
#[derive(Debug, Clone)]
pub struct DeploymentCreateProcessor {
    behaviors: Behaviors,
}

impl DeploymentCreateProcessor {
    pub fn new(behaviors: Behaviors) -> Self {
        Self { behaviors }
    }
}

impl CommandProcessor for DeploymentCreateProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let Some(deployment) = command.value_as::<DeploymentRecord>() else {
            return ctx.result.reject(
                command,
                RejectionType::InvalidArgument,
                "Expected a deployment value",
            );
        };

        let parsed = match parse_resources(&deployment.resources) {
            Ok(parsed) => parsed,
            Err(reason) => {
                debug!(partition_id = self.behaviors.partition_id(), %reason, "Rejected deployment");
                return ctx.result.reject(command, RejectionType::InvalidArgument, reason);
            }
        };

        let state = ctx.state;
        let deployment_key = ctx.next_key();
        let mut created = DeploymentRecord {
            resources: deployment.resources.clone(),
            processes: Vec::with_capacity(parsed.processes.len()),
            decisions: Vec::with_capacity(parsed.decisions.len()),
        };
        for process in parsed.processes {
            let version = state
                .deployments()
                .latest_process_version(&process.bpmn_process_id)
                + 1;
            created.processes.push(ProcessMetadata {
                bpmn_process_id: process.bpmn_process_id,
                version,
                process_definition_key: ctx.next_key(),
                resource_name: process.resource_name,
                job_type: process.job_type,
            });
        }
        for decision in parsed.decisions {
            let version = state
                .deployments()
                .latest_decision_version(&decision.decision_id)
                + 1;
            created.decisions.push(DecisionMetadata {
                decision_id: decision.decision_id,
                version,
                decision_key: ctx.next_key(),
                resource_name: decision.resource_name,
            });
        }

        ctx.result
            .append_event(deployment_key, DeploymentIntent::Created, created.clone())?;

        let followers = self.behaviors.other_partitions();
        if followers.is_empty() {
            ctx.result.append_event(
                deployment_key,
                DeploymentIntent::FullyDistributed,
                created.clone(),
            )?;
        }
        for partition_id in &followers {
            ctx.result.append_event(
                deployment_key,
                DeploymentDistributionIntent::Distributing,
                DeploymentDistributionRecord {
                    partition_id: *partition_id,
                },
            )?;
        }

        ctx.result
            .respond_event(command, deployment_key, DeploymentIntent::Created, created.clone());

        info!(
            partition_id = self.behaviors.partition_id(),
            deployment_key,
            followers = followers.len(),
            "Created deployment"
        );

        if !followers.is_empty() {
            let behaviors = self.behaviors.clone();
            ctx.result.append_post_commit_task(move || {
                for partition_id in followers {
                    behaviors.sender().send_command(
                        partition_id,
                        Record::command(
                            partition_id,
                            deployment_key,
                            DeploymentIntent::Distribute,
                            created.clone(),
                        ),
                    );
                    behaviors.metrics().distribution_started();
                }
                Ok(())
            });
        }
        Ok(())
    }
}
