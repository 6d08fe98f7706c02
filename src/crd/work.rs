//! WorkBundle Custom Resource Definition
//!
//! A WorkBundle carries serialized manifests to a remote cluster. The agent
//! on that cluster applies them and reports per-manifest feedback, which is
//! mirrored back onto the owning DeploymentRequest.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a WorkBundle
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "work.hcp.dev",
    version = "v1",
    kind = "WorkBundle",
    plural = "workbundles",
    status = "WorkBundleStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WorkBundleSpec {
    /// Manifests to apply
    #[serde(default)]
    pub workload: Workload,

    /// How applied children are treated when the bundle is deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_option: Option<DeleteOption>,
}

/// Manifest payload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    /// Raw manifests in apply order
    #[serde(default)]
    #[schemars(schema_with = "super::schema::free_form_list")]
    pub manifests: Vec<serde_json::Value>,
}

/// Delete behavior for applied children
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOption {
    /// Foreground deletes children; Orphan leaves them
    pub propagation_policy: PropagationPolicy,
}

/// Delete propagation policy
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PropagationPolicy {
    /// Delete applied children before the bundle
    #[default]
    Foreground,
    /// Leave applied children on the remote cluster
    Orphan,
}

/// Status reported by the remote agent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkBundleStatus {
    /// Bundle-level conditions (Applied, Available, Progressing, Degraded)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<WorkCondition>,

    /// Per-manifest status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_status: Option<ResourceStatus>,
}

/// Condition reported by the remote agent
///
/// Kept separate from the request's own condition type so a malformed or
/// unfamiliar remote status never fails deserialization of the bundle.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// True, False or Unknown
    #[serde(default)]
    pub status: String,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

/// Per-manifest status list
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// One entry per applied manifest
    #[serde(default)]
    pub manifests: Vec<ManifestCondition>,
}

/// Status of one applied manifest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCondition {
    /// Identity of the applied object
    pub resource_meta: ResourceMeta,

    /// Fields read back from the applied object
    #[serde(default)]
    pub status_feedback: StatusFeedback,

    /// Apply conditions for this manifest
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<WorkCondition>,
}

/// Identity of an applied object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMeta {
    /// API group
    #[serde(default)]
    pub group: String,
    /// API version
    #[serde(default)]
    pub version: String,
    /// Kind
    #[serde(default)]
    pub kind: String,
    /// Name
    #[serde(default)]
    pub name: String,
    /// Namespace
    #[serde(default)]
    pub namespace: String,
}

/// Values read back from an applied object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusFeedback {
    /// Named feedback values
    #[serde(default)]
    pub values: Vec<FeedbackValue>,
}

impl StatusFeedback {
    /// String rendering of the named value, if present
    pub fn get(&self, name: &str) -> Option<String> {
        self.values
            .iter()
            .find(|v| v.name == name)
            .and_then(|v| v.field_value.render())
    }
}

/// A named feedback value
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackValue {
    /// Feedback name (e.g. Available-Status)
    pub name: String,
    /// Typed value
    pub field_value: FieldValue,
}

/// Typed feedback value
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    /// String, Integer or Boolean
    #[serde(rename = "type", default)]
    pub type_: String,
    /// String value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
    /// Integer value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integer: Option<i64>,
    /// Boolean value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean: Option<bool>,
}

impl FieldValue {
    /// A string value
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            type_: "String".to_string(),
            string: Some(value.into()),
            ..Default::default()
        }
    }

    fn render(&self) -> Option<String> {
        match self.type_.as_str() {
            "Integer" => self.integer.map(|i| i.to_string()),
            "Boolean" => self.boolean.map(|b| b.to_string()),
            _ => self.string.clone(),
        }
    }
}

impl WorkBundle {
    /// Manifest statuses reported for objects of the given kind
    pub fn feedback_for_kind<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = &'a ManifestCondition> + 'a {
        self.status
            .iter()
            .filter_map(|s| s.resource_status.as_ref())
            .flat_map(|r| r.manifests.iter())
            .filter(move |m| m.resource_meta.kind == kind)
    }

    /// Shipped manifest with the given kind and name
    pub fn shipped(&self, kind: &str, name: &str) -> Option<&serde_json::Value> {
        self.spec.workload.manifests.iter().find(|m| {
            m["kind"].as_str() == Some(kind) && m["metadata"]["name"].as_str() == Some(name)
        })
    }

    /// Current delete propagation policy
    pub fn propagation_policy(&self) -> PropagationPolicy {
        self.spec
            .delete_option
            .as_ref()
            .map(|d| d.propagation_policy)
            .unwrap_or_default()
    }
}
