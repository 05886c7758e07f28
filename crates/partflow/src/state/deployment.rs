//! Deployed resources and deployment-distribution bookkeeping.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::record::{DeploymentRecord, PartitionId, ProcessMetadata};

/// Deployments and the definitions they made queryable on this partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    deployments: BTreeMap<i64, DeploymentRecord>,
    processes: BTreeMap<i64, ProcessMetadata>,
    /// bpmn process id → version → process definition key.
    process_versions: BTreeMap<String, BTreeMap<u32, i64>>,
    /// decision id → latest version.
    decision_versions: BTreeMap<String, u32>,
}

impl DeploymentState {
    pub fn deployment(&self, key: i64) -> Option<&DeploymentRecord> {
        self.deployments.get(&key)
    }

    pub fn contains_deployment(&self, key: i64) -> bool {
        self.deployments.contains_key(&key)
    }

    pub fn deployment_count(&self) -> usize {
        self.deployments.len()
    }

    pub fn process(&self, process_definition_key: i64) -> Option<&ProcessMetadata> {
        self.processes.get(&process_definition_key)
    }

    pub fn latest_process(&self, bpmn_process_id: &str) -> Option<&ProcessMetadata> {
        let (_, key) = self.process_versions.get(bpmn_process_id)?.last_key_value()?;
        self.processes.get(key)
    }

    pub fn process_by_version(&self, bpmn_process_id: &str, version: u32) -> Option<&ProcessMetadata> {
        let key = self.process_versions.get(bpmn_process_id)?.get(&version)?;
        self.processes.get(key)
    }

    /// Latest deployed version of a process, `0` if it was never deployed.
    pub fn latest_process_version(&self, bpmn_process_id: &str) -> u32 {
        self.process_versions
            .get(bpmn_process_id)
            .and_then(|versions| versions.last_key_value())
            .map(|(version, _)| *version)
            .unwrap_or(0)
    }

    /// Latest deployed version of a decision, `0` if it was never deployed.
    pub fn latest_decision_version(&self, decision_id: &str) -> u32 {
        self.decision_versions.get(decision_id).copied().unwrap_or(0)
    }

    pub(crate) fn put_deployment(&mut self, key: i64, deployment: DeploymentRecord) {
        for process in &deployment.processes {
            self.process_versions
                .entry(process.bpmn_process_id.clone())
                .or_default()
                .insert(process.version, process.process_definition_key);
            self.processes
                .insert(process.process_definition_key, process.clone());
        }
        for decision in &deployment.decisions {
            let latest = self
                .decision_versions
                .entry(decision.decision_id.clone())
                .or_default();
            *latest = (*latest).max(decision.version);
        }
        self.deployments.insert(key, deployment);
    }
}

/// Partitions that have not yet acknowledged a deployment, per deployment key.
///
/// This is the source of truth for "has partition P received deployment D".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionState {
    pending: BTreeMap<i64, BTreeSet<PartitionId>>,
}

impl DistributionState {
    pub fn pending_partitions(&self, deployment_key: i64) -> Option<&BTreeSet<PartitionId>> {
        self.pending.get(&deployment_key)
    }

    pub fn is_pending(&self, deployment_key: i64, partition_id: PartitionId) -> bool {
        self.pending
            .get(&deployment_key)
            .is_some_and(|partitions| partitions.contains(&partition_id))
    }

    /// Deployments with at least one pending partition, ordered by key.
    pub fn iter_pending(&self) -> impl Iterator<Item = (i64, &BTreeSet<PartitionId>)> {
        self.pending
            .iter()
            .filter(|(_, partitions)| !partitions.is_empty())
            .map(|(key, partitions)| (*key, partitions))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn add_pending(&mut self, deployment_key: i64, partition_id: PartitionId) {
        self.pending
            .entry(deployment_key)
            .or_default()
            .insert(partition_id);
    }

    /// Returns `false` if the partition was not pending.
    pub(crate) fn remove_pending(&mut self, deployment_key: i64, partition_id: PartitionId) -> bool {
        self.pending
            .get_mut(&deployment_key)
            .is_some_and(|partitions| partitions.remove(&partition_id))
    }

    pub(crate) fn remove(&mut self, deployment_key: i64) {
        self.pending.remove(&deployment_key);
    }
}
