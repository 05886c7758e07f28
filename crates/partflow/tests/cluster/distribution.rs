//! Deployment distribution across partitions.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use partflow::record::{DeploymentDistributionIntent, DeploymentIntent, ProcessInstanceIntent};
use partflow::state::decode_partition_id;
use partflow::{
    DEPLOYMENT_PARTITION, DeploymentRecord, DeploymentResource, Intent, LocalCluster, LogStorage, LoggedRecord, NonEmpty,
    ProcessInstanceRecord, Record, RecordType, RejectionType,
};

use crate::support::helpers::{
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT, init_test_tracing, order_process,
    test_engine_config, wait_until,
};

fn start_cluster(partition_count: u32) -> Result<LocalCluster> {
    LocalCluster::builder(partition_count)
        .config(test_engine_config())
        .start()
        .context("starting cluster")
}

async fn wait_for_deployment(cluster: &LocalCluster, partition_id: u32, key: i64) -> Result<()> {
    wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        let known = cluster
            .query(partition_id, move |state| {
                state.deployments().contains_deployment(key)
            })
            .await?;
        Ok::<_, anyhow::Error>(known.then_some(()))
    })
    .await
    .with_context(|| format!("waiting for deployment {key} on partition {partition_id}"))
}

async fn wait_until_fully_distributed(cluster: &LocalCluster, key: i64) -> Result<()> {
    wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        let pending = cluster
            .query(DEPLOYMENT_PARTITION, move |state| {
                state.distributions().pending_partitions(key).is_some()
            })
            .await?;
        Ok::<_, anyhow::Error>((!pending).then_some(()))
    })
    .await
    .with_context(|| format!("waiting for deployment {key} to be fully distributed"))
}

fn events_with_key(records: &[LoggedRecord], key: i64) -> Vec<&Record> {
    records
        .iter()
        .map(|logged| &logged.record)
        .filter(|record| record.key == key && record.record_type == RecordType::Event)
        .collect()
}

#[tokio::test]
async fn deployment_reaches_every_partition() -> Result<()> {
    init_test_tracing();
    let cluster = start_cluster(3)?;

    let response = cluster.deploy([order_process()]).await?;
    assert!(!response.is_rejection());
    assert_eq!(response.intent, Intent::from(DeploymentIntent::Created));
    assert_eq!(decode_partition_id(response.key), DEPLOYMENT_PARTITION);
    let deployment = response
        .value_as::<DeploymentRecord>()
        .context("deployment value")?;
    assert_eq!(deployment.processes[0].bpmn_process_id, "order-process");
    assert_eq!(deployment.processes[0].version, 1);

    let key = response.key;
    for partition_id in 2..=3 {
        wait_for_deployment(&cluster, partition_id, key).await?;
    }
    wait_until_fully_distributed(&cluster, key).await?;

    let owner_log = cluster.log(DEPLOYMENT_PARTITION)?.records();
    let intents: Vec<_> = events_with_key(&owner_log, key)
        .into_iter()
        .map(|record| record.intent)
        .collect();
    assert_eq!(intents.first(), Some(&Intent::from(DeploymentIntent::Created)));
    assert_eq!(
        intents
            .iter()
            .filter(|intent| **intent == Intent::from(DeploymentDistributionIntent::Distributing))
            .count(),
        2
    );
    assert_eq!(
        intents
            .iter()
            .filter(|intent| **intent == Intent::from(DeploymentDistributionIntent::Completed))
            .count(),
        2
    );
    assert_eq!(intents.last(), Some(&Intent::from(DeploymentIntent::FullyDistributed)));

    let metrics = cluster.metrics(DEPLOYMENT_PARTITION)?;
    assert_eq!(metrics.distributions_started, 2);
    assert_eq!(metrics.distributions_completed, 2);

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn single_partition_is_fully_distributed_at_once() -> Result<()> {
    init_test_tracing();
    let cluster = start_cluster(1)?;

    let response = cluster.deploy([order_process()]).await?;
    assert!(!response.is_rejection());

    let owner_log = cluster.log(1)?.records();
    let intents: Vec<_> = events_with_key(&owner_log, response.key)
        .into_iter()
        .map(|record| record.intent)
        .collect();
    assert_eq!(
        intents,
        vec![
            Intent::from(DeploymentIntent::Created),
            Intent::from(DeploymentIntent::FullyDistributed)
        ]
    );

    let pending = cluster
        .query(1, |state| state.distributions().is_empty())
        .await?;
    assert!(pending);

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn distribution_completes_after_partition_becomes_reachable() -> Result<()> {
    init_test_tracing();
    let cluster = start_cluster(3)?;
    cluster.router().disconnect(2);

    let response = cluster.deploy([order_process()]).await?;
    let key = response.key;
    wait_for_deployment(&cluster, 3, key).await?;

    let pending = wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        let pending = cluster
            .query(DEPLOYMENT_PARTITION, move |state| {
                state.distributions().pending_partitions(key).cloned()
            })
            .await?;
        Ok::<_, anyhow::Error>(pending.filter(|pending| pending.len() == 1))
    })
    .await?;
    assert_eq!(pending, BTreeSet::from([2]));

    let reached = cluster
        .query(2, move |state| state.deployments().contains_deployment(key))
        .await?;
    assert!(!reached, "unreachable partition must not receive the deployment");

    cluster.router().reconnect(2);
    wait_for_deployment(&cluster, 2, key).await?;
    wait_until_fully_distributed(&cluster, key).await?;

    let metrics = cluster.metrics(DEPLOYMENT_PARTITION)?;
    assert!(metrics.redistribution_attempts >= 1);

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn repeated_distribute_is_acknowledged_without_new_event() -> Result<()> {
    init_test_tracing();
    let cluster = start_cluster(2)?;

    let response = cluster.deploy([order_process()]).await?;
    let key = response.key;
    let deployment = response
        .value_as::<DeploymentRecord>()
        .context("deployment value")?
        .clone();
    wait_until_fully_distributed(&cluster, key).await?;

    cluster
        .log(2)?
        .append(NonEmpty::new(Record::command(
            2,
            key,
            DeploymentIntent::Distribute,
            deployment,
        )))
        .await?;

    // The second acknowledgement reaches an owner that no longer waits for it.
    let rejection = wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        let rejection = cluster
            .log(DEPLOYMENT_PARTITION)?
            .records()
            .into_iter()
            .map(|logged| logged.record)
            .find(|record| {
                record.record_type == RecordType::CommandRejection
                    && record.intent == Intent::from(DeploymentDistributionIntent::Complete)
            });
        Ok::<_, anyhow::Error>(rejection)
    })
    .await?;
    assert_eq!(rejection.rejection_type, Some(RejectionType::NotFound));
    assert_eq!(rejection.key, key);

    let distributed = events_with_key(&cluster.log(2)?.records(), key)
        .into_iter()
        .filter(|record| record.intent == Intent::from(DeploymentIntent::Distributed))
        .count();
    assert_eq!(distributed, 1);

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn invalid_deployment_is_rejected_and_not_distributed() -> Result<()> {
    init_test_tracing();
    let cluster = start_cluster(2)?;

    let response = cluster.deploy(Vec::<DeploymentResource>::new()).await?;
    assert!(response.is_rejection());
    assert_eq!(response.rejection_type, Some(RejectionType::InvalidArgument));

    let owner_events = cluster
        .log(DEPLOYMENT_PARTITION)?
        .records()
        .into_iter()
        .filter(|logged| logged.record.record_type == RecordType::Event)
        .count();
    assert_eq!(owner_events, 0);
    assert!(cluster.log(2)?.is_empty());

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn distributed_definition_starts_instances_on_followers() -> Result<()> {
    init_test_tracing();
    let cluster = start_cluster(2)?;

    let first = cluster.deploy([order_process()]).await?;
    let second = cluster.deploy([order_process()]).await?;
    let version = second
        .value_as::<DeploymentRecord>()
        .context("deployment value")?
        .processes[0]
        .version;
    assert_eq!(version, 2);
    wait_for_deployment(&cluster, 2, first.key).await?;
    wait_for_deployment(&cluster, 2, second.key).await?;

    let created = cluster
        .send(
            2,
            partflow::NO_KEY,
            ProcessInstanceIntent::Create,
            ProcessInstanceRecord::latest("order-process"),
        )
        .await?;
    assert!(!created.is_rejection());
    assert_eq!(decode_partition_id(created.key), 2);
    let instance = created
        .value_as::<ProcessInstanceRecord>()
        .context("instance value")?;
    assert_eq!(instance.version, Some(2));

    let jobs = cluster.query(2, |state| state.jobs().len()).await?;
    assert_eq!(jobs, 1);

    cluster.shutdown().await?;
    Ok(())
}

fn count_events(records: &[LoggedRecord], key: i64, intent: impl Into<Intent>) -> usize {
    let intent = intent.into();
    events_with_key(records, key)
        .into_iter()
        .filter(|record| record.intent == intent)
        .count()
}

#[tokio::test]
async fn pending_distribution_survives_owner_crash() -> Result<()> {
    init_test_tracing();
    let mut cluster = start_cluster(3)?;
    cluster.router().disconnect(2);

    let response = cluster.deploy([order_process()]).await?;
    let key = response.key;
    wait_for_deployment(&cluster, 3, key).await?;
    wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        let pending = cluster
            .query(DEPLOYMENT_PARTITION, move |state| {
                state.distributions().pending_partitions(key).cloned()
            })
            .await?;
        Ok::<_, anyhow::Error>(pending.filter(|pending| pending.len() == 1))
    })
    .await?;

    cluster.crash_partition(DEPLOYMENT_PARTITION).await?;
    let pending = cluster
        .query(DEPLOYMENT_PARTITION, move |state| {
            state.distributions().pending_partitions(key).cloned()
        })
        .await?;
    assert_eq!(pending, Some(BTreeSet::from([2])));

    cluster.router().reconnect(2);
    wait_for_deployment(&cluster, 2, key).await?;
    wait_until_fully_distributed(&cluster, key).await?;

    let owner_log = cluster.log(DEPLOYMENT_PARTITION)?.records();
    assert_eq!(count_events(&owner_log, key, DeploymentIntent::FullyDistributed), 1);
    assert_eq!(
        count_events(&owner_log, key, DeploymentDistributionIntent::Completed),
        2
    );
    for partition_id in 2..=3 {
        let follower_log = cluster.log(partition_id)?.records();
        assert_eq!(
            count_events(&follower_log, key, DeploymentIntent::Distributed),
            1,
            "partition {partition_id} must apply the deployment once"
        );
    }

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn follower_crash_before_acknowledging_is_redistributed() -> Result<()> {
    init_test_tracing();
    let mut cluster = start_cluster(2)?;
    // Acknowledgements to the owner are lost until it is reconnected.
    cluster.router().disconnect(DEPLOYMENT_PARTITION);

    let response = cluster.deploy([order_process()]).await?;
    let key = response.key;
    wait_for_deployment(&cluster, 2, key).await?;
    let pending = cluster
        .query(DEPLOYMENT_PARTITION, move |state| {
            state.distributions().is_pending(key, 2)
        })
        .await?;
    assert!(pending);

    cluster.crash_partition(2).await?;
    cluster.router().reconnect(DEPLOYMENT_PARTITION);
    wait_until_fully_distributed(&cluster, key).await?;

    let follower_log = cluster.log(2)?.records();
    assert_eq!(count_events(&follower_log, key, DeploymentIntent::Distributed), 1);
    let owner_log = cluster.log(DEPLOYMENT_PARTITION)?.records();
    assert_eq!(
        count_events(&owner_log, key, DeploymentDistributionIntent::Completed),
        1
    );
    assert_eq!(count_events(&owner_log, key, DeploymentIntent::FullyDistributed), 1);

    let known = cluster
        .query(2, move |state| state.deployments().contains_deployment(key))
        .await?;
    assert!(known);

    cluster.shutdown().await?;
    Ok(())
}
