use tracing::{debug, info};

use crate::behaviors::Behaviors;
use crate::error::Result;
use crate::processing::{CommandProcessor, ProcessingContext};
use crate::record::{
    DeploymentDistributionIntent, DeploymentDistributionRecord, DeploymentIntent, Record,
    RejectionType,
};

/// Handles `DEPLOYMENT_DISTRIBUTION.COMPLETE` on the owning partition.
#[derive(Debug, Clone)]
pub struct CompleteDeploymentDistributionProcessor {
    behaviors: Behaviors,
}

impl CompleteDeploymentDistributionProcessor {
    pub fn new(behaviors: Behaviors) -> Self {
        Self { behaviors }
    }
}

impl CommandProcessor for CompleteDeploymentDistributionProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let deployment_key = command.key;
        let Some(acknowledgement) = command.value_as::<DeploymentDistributionRecord>() else {
            return ctx.result.reject(
                command,
                RejectionType::InvalidArgument,
                "Expected a deployment distribution value",
            );
        };
        let acknowledged = acknowledgement.partition_id;

        let distributions = ctx.state.distributions();
        if !distributions.is_pending(deployment_key, acknowledged) {
            debug!(
                partition_id = self.behaviors.partition_id(),
                deployment_key,
                acknowledged,
                "Ignoring acknowledgement of a distribution that is not pending"
            );
            return ctx.result.reject(
                command,
                RejectionType::NotFound,
                format!(
                    "Expected to complete the distribution of deployment {deployment_key} to partition {acknowledged}, but it is not pending"
                ),
            );
        }

        ctx.result.append_event(
            deployment_key,
            DeploymentDistributionIntent::Completed,
            acknowledgement.clone(),
        )?;
        ctx.result.respond_event(
            command,
            deployment_key,
            DeploymentDistributionIntent::Completed,
            acknowledgement.clone(),
        );

        let remaining = distributions
            .pending_partitions(deployment_key)
            .map_or(0, |pending| pending.len() - 1);
        if remaining == 0 {
            let deployment = ctx
                .state
                .deployments()
                .deployment(deployment_key)
                .cloned()
                .unwrap_or_default();
            ctx.result.append_event(
                deployment_key,
                DeploymentIntent::FullyDistributed,
                deployment,
            )?;
            info!(
                partition_id = self.behaviors.partition_id(),
                deployment_key,
                "Deployment fully distributed"
            );
        }

        let metrics = self.behaviors.metrics().clone();
        ctx.result.append_post_commit_task(move || {
            metrics.distribution_completed();
            Ok(())
        });
        Ok(())
    }
}
