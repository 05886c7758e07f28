//! Value types and the value-type-scoped intents.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The resource kind a record concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Deployment,
    DeploymentDistribution,
    ProcessInstance,
    Job,
    Incident,
    Timer,
    Message,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Deployment => "DEPLOYMENT",
            ValueType::DeploymentDistribution => "DEPLOYMENT_DISTRIBUTION",
            ValueType::ProcessInstance => "PROCESS_INSTANCE",
            ValueType::Job => "JOB",
            ValueType::Incident => "INCIDENT",
            ValueType::Timer => "TIMER",
            ValueType::Message => "MESSAGE",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declares one intent enum per value type.
///
/// Each variant is listed as `Variant => "NAME", event` where the trailing
/// flag says whether the intent describes something that happened.
macro_rules! intents {
    ($(
        $(#[$meta:meta])*
        $name:ident => $value_type:ident {
            $($variant:ident => $label:literal, $event:literal;)+
        }
    )+) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
            pub enum $name {
                $($variant,)+
            }

            impl $name {
                pub fn as_str(&self) -> &'static str {
                    match self {
                        $($name::$variant => $label,)+
                    }
                }

                pub fn is_event(&self) -> bool {
                    match self {
                        $($name::$variant => $event,)+
                    }
                }
            }

            impl From<$name> for Intent {
                fn from(intent: $name) -> Self {
                    Intent::$value_type(intent)
                }
            }
        )+

        /// The verb of a record, scoped to its [`ValueType`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum Intent {
            $($value_type($name),)+
        }

        impl Intent {
            /// The value type this intent is scoped to.
            pub fn value_type(&self) -> ValueType {
                match self {
                    $(Intent::$value_type(_) => ValueType::$value_type,)+
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Intent::$value_type(intent) => intent.as_str(),)+
                }
            }

            /// Returns `true` for intents that describe a state change that
            /// already happened (and are therefore applied to state).
            pub fn is_event(&self) -> bool {
                match self {
                    $(Intent::$value_type(intent) => intent.is_event(),)+
                }
            }
        }
    };
}

intents! {
    DeploymentIntent => Deployment {
        Create => "CREATE", false;
        Created => "CREATED", true;
        Distribute => "DISTRIBUTE", false;
        Distributed => "DISTRIBUTED", true;
        FullyDistributed => "FULLY_DISTRIBUTED", true;
    }

    DeploymentDistributionIntent => DeploymentDistribution {
        Distributing => "DISTRIBUTING", true;
        Complete => "COMPLETE", false;
        Completed => "COMPLETED", true;
    }

    ProcessInstanceIntent => ProcessInstance {
        Create => "CREATE", false;
        Created => "CREATED", true;
        Cancel => "CANCEL", false;
        Canceled => "CANCELED", true;
    }

    JobIntent => Job {
        Create => "CREATE", false;
        Created => "CREATED", true;
        Complete => "COMPLETE", false;
        Completed => "COMPLETED", true;
        Fail => "FAIL", false;
        Failed => "FAILED", true;
    }

    IncidentIntent => Incident {
        Created => "CREATED", true;
        Resolve => "RESOLVE", false;
        Resolved => "RESOLVED", true;
    }

    TimerIntent => Timer {
        Create => "CREATE", false;
        Created => "CREATED", true;
        Trigger => "TRIGGER", false;
        Triggered => "TRIGGERED", true;
    }

    MessageIntent => Message {
        Publish => "PUBLISH", false;
        Published => "PUBLISHED", true;
        Expire => "EXPIRE", false;
        Expired => "EXPIRED", true;
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_knows_its_value_type() {
        let intent: Intent = DeploymentDistributionIntent::Complete.into();
        assert_eq!(intent.value_type(), ValueType::DeploymentDistribution);
        assert_eq!(intent.to_string(), "COMPLETE");
        assert!(!intent.is_event());
    }

    #[test]
    fn event_classification() {
        assert!(Intent::from(DeploymentIntent::FullyDistributed).is_event());
        assert!(Intent::from(JobIntent::Failed).is_event());
        assert!(!Intent::from(TimerIntent::Trigger).is_event());
    }

    #[test]
    fn intent_serialization_is_scoped() {
        let json = serde_json::to_value(Intent::from(MessageIntent::Publish)).unwrap();
        assert_eq!(json, serde_json::json!({ "MESSAGE": "PUBLISH" }));

        let back: Intent = serde_json::from_value(json).unwrap();
        assert_eq!(back, Intent::Message(MessageIntent::Publish));
    }
}
