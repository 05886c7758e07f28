use tracing::debug;

use crate::behaviors::Behaviors;
use crate::error::Result;
use crate::processing::{CommandProcessor, ProcessingContext};
use crate::record::{
    DeploymentDistributionIntent, DeploymentDistributionRecord, DeploymentIntent,
    DeploymentRecord, Record, RejectionType,
};
use crate::state::decode_partition_id;

/// Handles `DEPLOYMENT.DISTRIBUTE` on a follower partition.
///
/// Applying a deployment key twice writes nothing the second time, but the
/// acknowledgement is sent either way: the first one may have been lost.
#[derive(Debug, Clone)]
pub struct DeploymentDistributeProcessor {
    behaviors: Behaviors,
}

impl DeploymentDistributeProcessor {
    pub fn new(behaviors: Behaviors) -> Self {
        Self { behaviors }
    }
}

impl CommandProcessor for DeploymentDistributeProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        let deployment_key = command.key;
        let Some(deployment) = command.value_as::<DeploymentRecord>() else {
            return ctx.result.reject(
                command,
                RejectionType::InvalidArgument,
                "Expected a deployment value",
            );
        };

        if ctx.state.deployments().contains_deployment(deployment_key) {
            debug!(
                partition_id = self.behaviors.partition_id(),
                deployment_key,
                "Deployment already received, acknowledging again"
            );
        } else {
            ctx.result.append_event(
                deployment_key,
                DeploymentIntent::Distributed,
                deployment.clone(),
            )?;
        }

        let owner = decode_partition_id(deployment_key);
        let partition_id = self.behaviors.partition_id();
        let behaviors = self.behaviors.clone();
        ctx.result.append_post_commit_task(move || {
            behaviors.sender().send_command(
                owner,
                Record::command(
                    owner,
                    deployment_key,
                    DeploymentDistributionIntent::Complete,
                    DeploymentDistributionRecord { partition_id },
                ),
            );
            Ok(())
        });
        Ok(())
    }
}
