//! DeploymentRequest Custom Resource Definition
//!
//! A DeploymentRequest describes one hosted control plane: the cloud platform
//! that backs it, whether this controller provisions that platform's
//! infrastructure, where the resulting child resources are placed, and the
//! HostedCluster / NodePool specs (inline or by reference) they are built from.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::hosted_cluster::{HostedClusterSpec, NodePoolSpec, PlatformType};
use super::types::{Condition, LocalObjectRef};
use crate::DEFAULT_HOSTING_NAMESPACE;

/// Specification for a DeploymentRequest
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hcp.dev",
    version = "v1alpha1",
    kind = "DeploymentRequest",
    plural = "deploymentrequests",
    shortname = "dr",
    status = "DeploymentRequestStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"InfraID","type":"string","jsonPath":".spec.infraID"}"#,
    printcolumn = r#"{"name":"Hosting","type":"string","jsonPath":".spec.hostingCluster"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequestSpec {
    /// Identifier tagging every derived resource; assigned once when empty
    #[serde(rename = "infraID", default, skip_serializing_if = "String::is_empty")]
    pub infra_id: String,

    /// Cloud infrastructure settings
    #[serde(default)]
    pub infrastructure: InfrastructureSpec,

    /// Alters the default create/destroy behavior
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub override_: Option<OverrideMode>,

    /// Cluster the WorkBundle is delivered to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hosting_cluster: String,

    /// Namespace on the hosting cluster for the HostedCluster and NodePools
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hosting_namespace: String,

    /// Legacy alias for `hostingCluster`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_managed_cluster: String,

    /// Legacy alias for `hostingNamespace`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_namespace: String,

    /// Inline HostedCluster spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "super::schema::open_hosted_cluster_spec")]
    pub hosted_cluster_spec: Option<HostedClusterSpec>,

    /// Pre-existing HostedCluster in the request namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_cluster_ref: Option<LocalObjectRef>,

    /// Inline NodePools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_pools: Vec<NodePoolEntry>,

    /// Pre-existing NodePools in the request namespace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_pools_ref: Vec<LocalObjectRef>,

    /// Cloud role ARNs, filled in by infrastructure provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// Infrastructure settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    /// Provision infrastructure; false means it already exists
    #[serde(default)]
    pub configure: bool,

    /// Selected cloud platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platforms>,

    /// Secret in the request namespace with cloud credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider_secret_ref: Option<LocalObjectRef>,
}

/// Cloud platform selection; exactly one should be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Platforms {
    /// AWS placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsPlacement>,

    /// Azure placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzurePlacement>,
}

impl Platforms {
    /// The selected platform, AWS winning when both are set
    pub fn selected(&self) -> Option<PlatformType> {
        if self.aws.is_some() {
            Some(PlatformType::Aws)
        } else if self.azure.is_some() {
            Some(PlatformType::Azure)
        } else {
            None
        }
    }
}

/// AWS placement
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsPlacement {
    /// AWS region
    #[serde(default)]
    pub region: String,

    /// Availability zones; the provisioner picks one when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
}

/// Azure placement
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzurePlacement {
    /// Azure location
    #[serde(default)]
    pub location: String,
}

/// Request-level behavior overrides
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum OverrideMode {
    /// Leave remote children and infrastructure in place on delete
    Orphan,
    /// Provision infrastructure only; never ship manifests
    InfraOnly,
    /// Pull and OIDC secrets are supplied out of band
    ConfigureWithManifest,
    /// Ship the hosting namespace so deletion removes it
    DeleteHostingNamespace,
}

/// A named inline NodePool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolEntry {
    /// NodePool name
    pub name: String,

    /// NodePool spec
    #[serde(default)]
    #[schemars(schema_with = "super::schema::open_node_pool_spec")]
    pub spec: NodePoolSpec,
}

/// Cloud credentials produced by IAM provisioning
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// AWS role ARNs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsRoleArns>,
}

/// The three control-plane role ARNs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct AwsRoleArns {
    /// Role assumed by the cloud controller manager
    #[serde(rename = "kubeCloudControllerRoleARN", default)]
    pub kube_cloud_controller: String,

    /// Role assumed by node pool management
    #[serde(rename = "nodePoolManagementRoleARN", default)]
    pub node_pool_management: String,

    /// Role assumed by the control plane operator
    #[serde(rename = "controlPlaneOperatorRoleARN", default)]
    pub control_plane_operator: String,
}

/// Status for a DeploymentRequest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequestStatus {
    /// Derived lifecycle state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Conditions, unique by type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl DeploymentRequest {
    /// `<namespace>/<name>`, the value of the bundle back-reference annotation
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    /// Current conditions
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// True when the given override is set
    pub fn has_override(&self, mode: OverrideMode) -> bool {
        self.spec.override_ == Some(mode)
    }

    /// True when this controller provisions infrastructure
    pub fn configures_infra(&self) -> bool {
        self.spec.infrastructure.configure
    }

    /// Selected cloud platform
    pub fn platform(&self) -> Option<PlatformType> {
        self.spec
            .infrastructure
            .platform
            .as_ref()
            .and_then(Platforms::selected)
    }

    /// AWS placement, if selected
    pub fn aws(&self) -> Option<&AwsPlacement> {
        self.spec
            .infrastructure
            .platform
            .as_ref()
            .and_then(|p| p.aws.as_ref())
    }

    /// Azure placement, if selected
    pub fn azure(&self) -> Option<&AzurePlacement> {
        self.spec
            .infrastructure
            .platform
            .as_ref()
            .and_then(|p| p.azure.as_ref())
    }

    /// Whether the cloud provider secret must be resolved
    ///
    /// Azure needs it even for adopted infrastructure because the cloud
    /// credentials secret is always generated from it.
    pub fn requires_provider_secret(&self) -> bool {
        self.configures_infra() || self.azure().is_some()
    }

    /// Name of the WorkBundle shipped for this request
    pub fn work_bundle_name(&self) -> String {
        format!("{}-{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    /// Namespace the WorkBundle lives in (the hosting cluster's namespace)
    pub fn work_bundle_namespace(&self) -> &str {
        if self.spec.hosting_cluster.is_empty() {
            &self.spec.target_managed_cluster
        } else {
            &self.spec.hosting_cluster
        }
    }

    /// Namespace on the hosting cluster for the HostedCluster and NodePools
    pub fn hosting_namespace(&self) -> &str {
        if !self.spec.hosting_namespace.is_empty() {
            &self.spec.hosting_namespace
        } else if !self.spec.target_namespace.is_empty() {
            &self.spec.target_namespace
        } else {
            DEFAULT_HOSTING_NAMESPACE
        }
    }

    /// Name of the HostedCluster shipped for this request
    pub fn hosted_cluster_name(&self) -> String {
        match &self.spec.hosted_cluster_ref {
            Some(r) if !r.is_empty() => r.name.clone(),
            _ => self.name_any(),
        }
    }

    /// AWS role ARNs recorded by IAM provisioning
    pub fn aws_role_arns(&self) -> Option<&AwsRoleArns> {
        self.spec.credentials.as_ref().and_then(|c| c.aws.as_ref())
    }
}
