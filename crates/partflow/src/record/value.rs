//! Typed record payloads.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::{PartitionId, ValueType};
use partflow_macros::RecordValue as DeriveRecordValue;

/// A payload bound to exactly one [`ValueType`].
///
/// Implemented with `#[derive(RecordValue)]`.
pub trait TypedValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const VALUE_TYPE: ValueType;

    /// Wrap the payload in the [`RecordValue`] union.
    fn into_record_value(self) -> RecordValue;

    /// Borrow the payload if `value` holds this type.
    fn from_record_value(value: &RecordValue) -> Option<&Self>;
}

/// The payload union carried by every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordValue {
    Deployment(DeploymentRecord),
    DeploymentDistribution(DeploymentDistributionRecord),
    ProcessInstance(ProcessInstanceRecord),
    Job(JobRecord),
    Incident(IncidentRecord),
    Timer(TimerRecord),
    Message(MessageRecord),
}

impl RecordValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            RecordValue::Deployment(_) => ValueType::Deployment,
            RecordValue::DeploymentDistribution(_) => ValueType::DeploymentDistribution,
            RecordValue::ProcessInstance(_) => ValueType::ProcessInstance,
            RecordValue::Job(_) => ValueType::Job,
            RecordValue::Incident(_) => ValueType::Incident,
            RecordValue::Timer(_) => ValueType::Timer,
            RecordValue::Message(_) => ValueType::Message,
        }
    }
}

/// A deployable resource as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResource {
    pub resource_name: String,
    pub resource: String,
}

impl DeploymentResource {
    pub fn new(resource_name: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            resource: resource.into(),
        }
    }
}

/// A process definition extracted from a deployed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMetadata {
    pub bpmn_process_id: String,
    pub version: u32,
    pub process_definition_key: i64,
    pub resource_name: String,
    /// Job type of the first service task, if the process declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
}

/// A decision extracted from a deployed DMN resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionMetadata {
    pub decision_id: String,
    pub version: u32,
    pub decision_key: i64,
    pub resource_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, DeriveRecordValue)]
#[value_type(Deployment)]
pub struct DeploymentRecord {
    pub resources: Vec<DeploymentResource>,
    #[serde(default)]
    pub processes: Vec<ProcessMetadata>,
    #[serde(default)]
    pub decisions: Vec<DecisionMetadata>,
}

impl DeploymentRecord {
    pub fn with_resources(resources: impl IntoIterator<Item = DeploymentResource>) -> Self {
        Self {
            resources: resources.into_iter().collect(),
            ..Default::default()
        }
    }
}

/// Acknowledgement payload; the record key is the deployment key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, DeriveRecordValue)]
#[value_type(DeploymentDistribution)]
pub struct DeploymentDistributionRecord {
    pub partition_id: PartitionId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, DeriveRecordValue)]
#[value_type(ProcessInstance)]
pub struct ProcessInstanceRecord {
    pub bpmn_process_id: String,
    /// `None` selects the latest deployed version.
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub process_definition_key: i64,
    #[serde(default)]
    pub variables: Value,
}

impl ProcessInstanceRecord {
    pub fn latest(bpmn_process_id: impl Into<String>) -> Self {
        Self {
            bpmn_process_id: bpmn_process_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, DeriveRecordValue)]
#[value_type(Job)]
pub struct JobRecord {
    pub job_type: String,
    pub retries: u32,
    #[serde(default)]
    pub process_instance_key: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, DeriveRecordValue)]
#[value_type(Incident)]
pub struct IncidentRecord {
    pub error_message: String,
    pub job_key: i64,
    pub process_instance_key: i64,
}

/// A timer; `due_date` is in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, DeriveRecordValue)]
#[value_type(Timer)]
pub struct TimerRecord {
    pub due_date: i64,
    #[serde(default)]
    pub process_instance_key: i64,
    #[serde(default)]
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, DeriveRecordValue)]
#[value_type(Message)]
pub struct MessageRecord {
    pub name: String,
    pub correlation_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Time to live in milliseconds.
    pub time_to_live: i64,
    /// Expiry in milliseconds since the Unix epoch, set when published.
    #[serde(default)]
    pub deadline: i64,
}
