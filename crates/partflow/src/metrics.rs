//! Prometheus counters for one partition.

use std::sync::Arc;

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

use crate::error::{Error, Result};

/// Counters of one partition, registered in their own [`Registry`].
///
/// Clones share the same counters and registry.
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    registry: Arc<Registry>,

    /// Commands taken through processing, rejected or not.
    pub processed_commands: Counter,

    /// Commands answered with a rejection record.
    pub rejected_commands: Counter,

    /// Records appended to the log by committed results.
    pub written_records: Counter,

    /// DISTRIBUTING events written by deployment creation.
    pub distributions_started: Counter,

    /// COMPLETED events written for acknowledged distributions.
    pub distributions_completed: Counter,

    /// DISTRIBUTE commands re-sent by the redistributor.
    pub redistribution_attempts: Counter,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub processed_commands: u64,
    pub rejected_commands: u64,
    pub written_records: u64,
    pub distributions_started: u64,
    pub distributions_completed: u64,
    pub redistribution_attempts: u64,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("partflow");

        let processed_commands = Counter::default();
        registry.register(
            "processed_commands",
            "Commands processed by the stream processor",
            processed_commands.clone(),
        );

        let rejected_commands = Counter::default();
        registry.register(
            "rejected_commands",
            "Commands answered with a rejection",
            rejected_commands.clone(),
        );

        let written_records = Counter::default();
        registry.register(
            "written_records",
            "Records appended to the log",
            written_records.clone(),
        );

        let distributions_started = Counter::default();
        registry.register(
            "deployment_distributions_started",
            "Deployment distributions started towards other partitions",
            distributions_started.clone(),
        );

        let distributions_completed = Counter::default();
        registry.register(
            "deployment_distributions_completed",
            "Deployment distributions acknowledged by other partitions",
            distributions_completed.clone(),
        );

        let redistribution_attempts = Counter::default();
        registry.register(
            "deployment_redistribution_attempts",
            "DISTRIBUTE commands re-sent to pending partitions",
            redistribution_attempts.clone(),
        );

        Self {
            registry: Arc::new(registry),
            processed_commands,
            rejected_commands,
            written_records,
            distributions_started,
            distributions_completed,
            redistribution_attempts,
        }
    }

    pub fn command_processed(&self, rejected: bool, written_records: usize) {
        self.processed_commands.inc();
        if rejected {
            self.rejected_commands.inc();
        }
        self.written_records.inc_by(written_records as u64);
    }

    pub fn distribution_started(&self) {
        self.distributions_started.inc();
    }

    pub fn distribution_completed(&self) {
        self.distributions_completed.inc();
    }

    pub fn redistribution_attempted(&self) {
        self.redistribution_attempts.inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed_commands: self.processed_commands.get(),
            rejected_commands: self.rejected_commands.get(),
            written_records: self.written_records.get(),
            distributions_started: self.distributions_started.get(),
            distributions_completed: self.distributions_completed.get(),
            redistribution_attempts: self.redistribution_attempts.get(),
        }
    }

    /// Encode all counters in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)
            .map_err(|err| Error::Metrics(err.to_string()))?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = EngineMetrics::new();
        let clone = metrics.clone();

        clone.command_processed(true, 2);
        metrics.command_processed(false, 3);
        metrics.redistribution_attempted();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.processed_commands, 2);
        assert_eq!(snapshot.rejected_commands, 1);
        assert_eq!(snapshot.written_records, 5);
        assert_eq!(snapshot.redistribution_attempts, 1);
    }

    #[test]
    fn encodes_registered_counters() {
        let metrics = EngineMetrics::new();
        metrics.distribution_started();
        metrics.distribution_started();

        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("# HELP partflow_processed_commands"));
        assert!(encoded.contains("# HELP partflow_deployment_redistribution_attempts"));
        assert!(encoded.contains("partflow_deployment_distributions_started_total 2"));
    }
}
