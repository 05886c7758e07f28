use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, warn};

use crate::behaviors::Behaviors;
use crate::processing::{ScheduledTask, TaskResultBuilder};
use crate::record::{DeploymentIntent, PartitionId, Record};
use crate::state::EngineState;

/// Re-sends `DEPLOYMENT.DISTRIBUTE` to partitions that have not acknowledged.
///
/// Runs on the owning partition. With `max_backoff_cycles` of 1 every pending
/// partition is retried on every cycle. Larger values let each pending
/// (deployment, partition) pair back off independently: it is retried on its
/// first cycle, then after 2, 4, ... cycles, up to `max_backoff_cycles`.
pub struct DeploymentRedistributor {
    behaviors: Behaviors,
    interval: Duration,
    max_backoff_cycles: u32,
    retries: BTreeMap<(i64, PartitionId), RetryState>,
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    cycles: u32,
    backoff: u32,
}

impl DeploymentRedistributor {
    pub fn new(behaviors: Behaviors, interval: Duration, max_backoff_cycles: u32) -> Self {
        Self {
            behaviors,
            interval,
            max_backoff_cycles: max_backoff_cycles.max(1),
            retries: BTreeMap::new(),
        }
    }
}

impl ScheduledTask for DeploymentRedistributor {
    fn name(&self) -> &'static str {
        "deployment-redistributor"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run(&mut self, state: &EngineState, _commands: &mut TaskResultBuilder) {
        let mut pending = BTreeSet::new();

        for (deployment_key, partitions) in state.distributions().iter_pending() {
            let Some(deployment) = state.deployments().deployment(deployment_key) else {
                warn!(
                    partition_id = self.behaviors.partition_id(),
                    deployment_key,
                    "Pending distribution without deployment"
                );
                continue;
            };

            for &partition_id in partitions {
                pending.insert((deployment_key, partition_id));
                let retry = self
                    .retries
                    .entry((deployment_key, partition_id))
                    .or_insert(RetryState {
                        cycles: 0,
                        backoff: 1,
                    });
                retry.cycles += 1;
                if retry.cycles < retry.backoff {
                    continue;
                }
                retry.cycles = 0;
                retry.backoff = retry.backoff.saturating_mul(2).min(self.max_backoff_cycles);

                debug!(
                    partition_id = self.behaviors.partition_id(),
                    deployment_key,
                    receiver = partition_id,
                    "Retrying deployment distribution"
                );
                self.behaviors.sender().send_command(
                    partition_id,
                    Record::command(
                        partition_id,
                        deployment_key,
                        DeploymentIntent::Distribute,
                        deployment.clone(),
                    ),
                );
                self.behaviors.metrics().redistribution_attempted();
            }
        }

        self.retries.retain(|entry, _| pending.contains(entry));
    }
}
