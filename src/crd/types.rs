//! Supporting types shared by the DeploymentRequest and WorkBundle CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to an object by name in an implied namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectRef {
    /// Object name
    pub name: String,
}

impl LocalObjectRef {
    /// Create a reference to the named object
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// True when the reference names nothing
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Parse the string form used in status feedback; anything unexpected is Unknown
    pub fn parse(s: &str) -> Self {
        match s {
            "True" | "true" => Self::True,
            "False" | "false" => Self::False,
            _ => Self::Unknown,
        }
    }

    /// Map a boolean onto True/False
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Condition kinds written onto a DeploymentRequest
///
/// Locally authored kinds track `observedGeneration`. Mirrored kinds are
/// copied from the WorkBundle, whose generation is unrelated to ours, so
/// they are compared on status, reason and message only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// The cloud provider secret was found and parsed
    ProviderSecretConfigured,
    /// Cloud network/DNS infrastructure exists
    PlatformConfigured,
    /// Cloud IAM roles and OIDC provider exist
    PlatformIAMConfigured,
    /// The WorkBundle was synthesized and written
    WorkConfigured,
    /// Mirrored from the bundle's Applied condition
    WorkApplied,
    /// Mirrored from the bundle's Available condition
    WorkAvailable,
    /// Mirrored from the bundle's Progressing condition
    WorkProgressing,
    /// Mirrored from the bundle's Degraded condition
    WorkDegraded,
    /// HostedCluster availability reported by the hosting cluster
    HostedClusterAvailable,
    /// HostedCluster rollout progress reported by the hosting cluster
    HostedClusterProgress,
    /// Aggregated readiness of all NodePools
    Nodepool,
}

impl ConditionType {
    /// Every condition kind, locally authored first
    pub const ALL: [ConditionType; 11] = [
        Self::ProviderSecretConfigured,
        Self::PlatformConfigured,
        Self::PlatformIAMConfigured,
        Self::WorkConfigured,
        Self::WorkApplied,
        Self::WorkAvailable,
        Self::WorkProgressing,
        Self::WorkDegraded,
        Self::HostedClusterAvailable,
        Self::HostedClusterProgress,
        Self::Nodepool,
    ];

    /// Wire name of the condition
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderSecretConfigured => "ProviderSecretConfigured",
            Self::PlatformConfigured => "PlatformConfigured",
            Self::PlatformIAMConfigured => "PlatformIAMConfigured",
            Self::WorkConfigured => "WorkConfigured",
            Self::WorkApplied => "WorkApplied",
            Self::WorkAvailable => "WorkAvailable",
            Self::WorkProgressing => "WorkProgressing",
            Self::WorkDegraded => "WorkDegraded",
            Self::HostedClusterAvailable => "HostedClusterAvailable",
            Self::HostedClusterProgress => "HostedClusterProgress",
            Self::Nodepool => "Nodepool",
        }
    }

    /// True for kinds copied from the remote WorkBundle
    pub fn is_mirrored(&self) -> bool {
        matches!(
            self,
            Self::WorkApplied
                | Self::WorkAvailable
                | Self::WorkProgressing
                | Self::WorkDegraded
                | Self::HostedClusterAvailable
                | Self::HostedClusterProgress
                | Self::Nodepool
        )
    }

    /// Mirrored kind for a WorkBundle condition type, if we track it
    pub fn from_work_condition(type_: &str) -> Option<Self> {
        match type_ {
            "Applied" => Some(Self::WorkApplied),
            "Available" => Some(Self::WorkAvailable),
            "Progressing" => Some(Self::WorkProgressing),
            "Degraded" => Some(Self::WorkDegraded),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable condition reasons
pub mod reasons {
    /// Step completed as expected
    pub const CONFIGURED_AS_EXPECTED: &str = "ConfiguredAsExpected";
    /// Input missing or provisioner call failed
    pub const MISCONFIGURED: &str = "MisConfigured";
    /// Infrastructure destroy in progress
    pub const DESTROYING: &str = "Destroying";
    /// IAM removal in progress
    pub const REMOVING: &str = "Removing";
    /// Step does not apply (configure=false)
    pub const NOT_APPLICABLE: &str = "NotApplicable";
    /// A required spec parameter is missing
    pub const MISSING_PARAMETER: &str = "MissingParameter";
    /// One or more referenced secrets/config maps could not be resolved
    pub const MISSING_REFERENCES: &str = "MissingReferences";
    /// A referenced HostedCluster/NodePool is missing or inconsistent
    pub const INVALID_REFERENCE: &str = "InvalidReference";
    /// The WorkBundle is being deleted
    pub const WORK_DELETING: &str = "Deleting";
    /// The WorkBundle and its remote children are gone
    pub const WORK_REMOVED: &str = "WorkRemoved";
    /// Every NodePool reports ready
    pub const ALL_NODEPOOLS_READY: &str = "AsExpected";
}

/// A condition on a DeploymentRequest
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., PlatformConfigured)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Generation of the request that produced this condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.as_str().to_string(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation: None,
            last_transition_time: Utc::now(),
        }
    }

    /// Set the observed generation and return self for chaining
    pub fn observed(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// True when this condition is of the given kind
    pub fn is(&self, type_: ConditionType) -> bool {
        self.type_ == type_.as_str()
    }
}

/// Find a condition by kind
pub fn find_condition(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.is(type_))
}

/// True when the condition exists and is True
pub fn is_condition_true(conditions: &[Condition], type_: ConditionType) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}
