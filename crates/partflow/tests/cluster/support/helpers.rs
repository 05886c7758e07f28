use std::future::Future;
use std::time::Duration;

use anyhow::{Result, anyhow};
use partflow::{DeploymentResource, EngineConfig, RetryPolicy};

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("partflow=debug")
        .with_test_writer()
        .try_init();
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fast engine config for tests.
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(20),
        redistribution_interval: Duration::from_millis(50),
        timer_check_interval: Duration::from_millis(50),
        message_ttl_check_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(5),
        commit_retry: RetryPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        },
        ..Default::default()
    }
}

pub fn order_process() -> DeploymentResource {
    DeploymentResource::new(
        "order.bpmn",
        r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL">
  <bpmn:process id="order-process" isExecutable="true">
    <bpmn:serviceTask id="collect-money">
      <bpmn:extensionElements>
        <zeebe:taskDefinition type="payment" retries="3" />
      </bpmn:extensionElements>
    </bpmn:serviceTask>
  </bpmn:process>
</bpmn:definitions>"#,
    )
}

/// Poll until condition returns Some(T) or timeout expires.
pub async fn wait_until<F, Fut, T>(timeout: Duration, interval: Duration, check: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(result) = check().await? {
            return Ok(result);
        }

        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("timeout waiting for condition"));
        }

        tokio::time::sleep(interval).await;
    }
}
