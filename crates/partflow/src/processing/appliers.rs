//! Event appliers: the only code that mutates [`EngineState`].
//!
//! Appliers run after the batch containing the event was committed, both
//! during normal processing and during replay, so they must be pure functions
//! of (state, event).

use crate::error::{Error, Result};
use crate::record::{
    DeploymentDistributionIntent, DeploymentDistributionRecord, DeploymentIntent,
    DeploymentRecord, IncidentIntent, IncidentRecord, Intent, JobIntent, JobRecord,
    MessageIntent, MessageRecord, ProcessInstanceIntent, ProcessInstanceRecord, Record,
    TimerIntent, TimerRecord, TypedValue,
};
use crate::state::EngineState;

/// Apply one event to `state`.
pub(crate) fn apply_event(state: &mut EngineState, event: &Record) -> Result<()> {
    let key = event.key;
    match event.intent {
        Intent::Deployment(DeploymentIntent::Created | DeploymentIntent::Distributed) => {
            let deployment = value::<DeploymentRecord>(event)?;
            // Definition keys only appear inside the value.
            let keys = state.key_generator_mut();
            for process in &deployment.processes {
                keys.set_key_if_higher(process.process_definition_key);
            }
            for decision in &deployment.decisions {
                keys.set_key_if_higher(decision.decision_key);
            }
            state.deployments_mut().put_deployment(key, deployment.clone());
        }
        Intent::Deployment(DeploymentIntent::FullyDistributed) => {
            state.distributions_mut().remove(key);
        }
        Intent::DeploymentDistribution(DeploymentDistributionIntent::Distributing) => {
            let distribution = value::<DeploymentDistributionRecord>(event)?;
            state
                .distributions_mut()
                .add_pending(key, distribution.partition_id);
        }
        Intent::DeploymentDistribution(DeploymentDistributionIntent::Completed) => {
            let distribution = value::<DeploymentDistributionRecord>(event)?;
            state
                .distributions_mut()
                .remove_pending(key, distribution.partition_id);
        }
        Intent::ProcessInstance(ProcessInstanceIntent::Created) => {
            let instance = value::<ProcessInstanceRecord>(event)?;
            state.process_instances_mut().put(key, instance.clone());
        }
        Intent::ProcessInstance(ProcessInstanceIntent::Canceled) => {
            state.process_instances_mut().remove(key);
        }
        Intent::Job(JobIntent::Created | JobIntent::Failed) => {
            let job = value::<JobRecord>(event)?;
            state.jobs_mut().put(key, job.clone());
        }
        Intent::Job(JobIntent::Completed) => {
            state.jobs_mut().remove(key);
        }
        Intent::Incident(IncidentIntent::Created) => {
            let incident = value::<IncidentRecord>(event)?;
            state.incidents_mut().put(key, incident.clone());
        }
        Intent::Incident(IncidentIntent::Resolved) => {
            state.incidents_mut().remove(key);
        }
        Intent::Timer(TimerIntent::Created) => {
            let timer = value::<TimerRecord>(event)?;
            state.timers_mut().put(key, timer.clone());
        }
        Intent::Timer(TimerIntent::Triggered) => {
            state.timers_mut().remove(key);
        }
        Intent::Message(MessageIntent::Published) => {
            let message = value::<MessageRecord>(event)?;
            state.messages_mut().put(key, message.clone());
        }
        Intent::Message(MessageIntent::Expired) => {
            state.messages_mut().remove(key);
        }
        intent => {
            return Err(Error::StateInconsistency(format!(
                "no applier for {}.{intent} at key {key}",
                intent.value_type()
            )));
        }
    }
    Ok(())
}

fn value<V: TypedValue>(event: &Record) -> Result<&V> {
    event.value_as::<V>().ok_or_else(|| {
        Error::StateInconsistency(format!(
            "expected {} value for {}.{} event at key {}, got {}",
            V::VALUE_TYPE,
            event.value_type,
            event.intent,
            event.key,
            event.value.value_type()
        ))
    })
}
