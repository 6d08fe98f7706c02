//! Typed models of the HostedCluster and NodePool resources
//!
//! Only the fields this controller scaffolds, validates, or scans for
//! references are modelled; other top-level spec fields ride along in
//! `extra`. Both types are shipped inside a WorkBundle. A request may instead
//! point at a pre-existing object in its namespace, which is shipped as stored.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::LocalObjectRef;

/// API version of HostedCluster and NodePool manifests
pub const HYPERSHIFT_API_VERSION: &str = "hypershift.openshift.io/v1beta1";

/// Desired state of a hosted control plane
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hypershift.openshift.io",
    version = "v1beta1",
    kind = "HostedCluster",
    plural = "hostedclusters",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HostedClusterSpec {
    /// OpenShift release payload
    #[serde(default)]
    pub release: Release,

    /// Unique cluster identifier
    #[serde(rename = "clusterID", default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,

    /// Identifier used to tag cloud resources
    #[serde(rename = "infraID", default, skip_serializing_if = "Option::is_none")]
    pub infra_id: Option<String>,

    /// Cloud platform configuration
    #[serde(default)]
    pub platform: PlatformSpec,

    /// Network CIDRs
    #[serde(default)]
    pub networking: ClusterNetworking,

    /// DNS configuration
    #[serde(default)]
    pub dns: DnsSpec,

    /// etcd configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd: Option<EtcdSpec>,

    /// How each control-plane service is published
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServicePublishingStrategyMapping>,

    /// Image pull secret
    #[serde(default, skip_serializing_if = "LocalObjectRef::is_empty")]
    pub pull_secret: LocalObjectRef,

    /// SSH public key secret for nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<LocalObjectRef>,

    /// OIDC issuer URL for service account tokens
    #[serde(rename = "issuerURL", default, skip_serializing_if = "Option::is_none")]
    pub issuer_url: Option<String>,

    /// Replica policy for control-plane controllers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_availability_policy: Option<String>,

    /// Replica policy for infrastructure components
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_availability_policy: Option<String>,

    /// Where OLM catalog sources run (management or guest)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub olm_catalog_placement: Option<String>,

    /// etcd secret encryption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_encryption: Option<SecretEncryptionSpec>,

    /// Cluster configuration referencing secrets and config maps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ClusterConfiguration>,

    /// Config map with an additional CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_trust_bundle: Option<LocalObjectRef>,

    /// Secret holding the service account signing key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_signing_key: Option<LocalObjectRef>,

    /// Top-level fields carried through untouched
    #[serde(flatten)]
    #[schemars(skip)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl HostedClusterSpec {
    /// Declared platform type
    pub fn platform_type(&self) -> PlatformType {
        self.platform.type_
    }
}

/// Release payload reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Release image pull spec
    #[serde(default)]
    pub image: String,
}

/// Platform type of a HostedCluster or NodePool
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PlatformType {
    /// Amazon Web Services
    #[serde(rename = "AWS")]
    Aws,
    /// Microsoft Azure
    Azure,
    /// No cloud integration
    #[default]
    None,
}

impl std::fmt::Display for PlatformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aws => write!(f, "AWS"),
            Self::Azure => write!(f, "Azure"),
            Self::None => write!(f, "None"),
        }
    }
}

/// Platform section of a HostedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Platform type
    #[serde(rename = "type", default)]
    pub type_: PlatformType,

    /// AWS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsPlatformSpec>,

    /// Azure settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzurePlatformSpec>,
}

/// AWS platform settings for a HostedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsPlatformSpec {
    /// AWS region
    #[serde(default)]
    pub region: String,

    /// Cloud provider placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider_config: Option<AwsCloudProviderConfig>,

    /// Per-service IAM roles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<AwsRoleCredentials>,

    /// Credentials secret for the cloud controller
    #[serde(default, skip_serializing_if = "LocalObjectRef::is_empty")]
    pub kube_cloud_controller_creds: LocalObjectRef,

    /// Credentials secret for node pool management
    #[serde(default, skip_serializing_if = "LocalObjectRef::is_empty")]
    pub node_pool_management_creds: LocalObjectRef,

    /// Credentials secret for the control plane operator
    #[serde(default, skip_serializing_if = "LocalObjectRef::is_empty")]
    pub control_plane_operator_creds: LocalObjectRef,

    /// Tags applied to every AWS resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_tags: Vec<AwsResourceTag>,

    /// API endpoint access (Public, PublicAndPrivate, Private)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_access: Option<String>,
}

/// AWS cloud provider placement
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsCloudProviderConfig {
    /// VPC ID
    #[serde(rename = "vpc", default)]
    pub vpc: String,

    /// Availability zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<AwsResourceReference>,
}

/// Reference to an AWS resource by ID
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsResourceReference {
    /// Resource ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// An IAM role bound to an in-cluster service account
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsRoleCredentials {
    /// Role ARN
    #[serde(rename = "arn")]
    pub arn: String,
    /// Namespace of the consuming service account
    pub namespace: String,
    /// Name of the credentials secret
    pub name: String,
}

/// AWS resource tag
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsResourceTag {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: String,
}

/// Azure platform settings for a HostedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzurePlatformSpec {
    /// Credentials secret for Azure API access
    #[serde(default, skip_serializing_if = "LocalObjectRef::is_empty")]
    pub credentials: LocalObjectRef,
    /// Azure location
    #[serde(default)]
    pub location: String,
    /// Resource group holding cluster resources
    #[serde(default)]
    pub resource_group: String,
    /// Virtual network name
    #[serde(default)]
    pub vnet_name: String,
    /// Virtual network ID
    #[serde(rename = "vnetID", default)]
    pub vnet_id: String,
    /// Subnet name
    #[serde(default)]
    pub subnet_name: String,
    /// Subscription ID
    #[serde(rename = "subscriptionID", default)]
    pub subscription_id: String,
    /// Managed identity used by machines
    #[serde(rename = "machineIdentityID", default)]
    pub machine_identity_id: String,
    /// Network security group name
    #[serde(default)]
    pub security_group_name: String,
}

/// Network configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworking {
    /// Machine (compute) network CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machine_network: Vec<NetworkEntry>,
    /// Pod network CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_network: Vec<NetworkEntry>,
    /// Service network CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_network: Vec<NetworkEntry>,
    /// CNI type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
}

/// A single CIDR
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    /// CIDR block
    pub cidr: String,
}

impl NetworkEntry {
    /// Create an entry for the given CIDR
    pub fn new(cidr: impl Into<String>) -> Self {
        Self { cidr: cidr.into() }
    }
}

/// DNS configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DnsSpec {
    /// Base domain of the cluster
    #[serde(default)]
    pub base_domain: String,
    /// Public hosted zone
    #[serde(rename = "publicZoneID", default, skip_serializing_if = "Option::is_none")]
    pub public_zone_id: Option<String>,
    /// Private hosted zone
    #[serde(rename = "privateZoneID", default, skip_serializing_if = "Option::is_none")]
    pub private_zone_id: Option<String>,
}

/// etcd configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdSpec {
    /// Managed or Unmanaged
    pub management_type: String,
    /// Settings for managed etcd
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed: Option<ManagedEtcdSpec>,
}

/// Managed etcd settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedEtcdSpec {
    /// Storage configuration
    pub storage: ManagedEtcdStorage,
}

/// Managed etcd storage
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedEtcdStorage {
    /// Storage type (PersistentVolume)
    #[serde(rename = "type")]
    pub type_: String,
    /// Persistent volume settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume: Option<PersistentVolumeEtcdStorage>,
}

/// Persistent volume settings for managed etcd
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeEtcdStorage {
    /// Storage class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    /// Volume size (e.g. 4Gi)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// Publishing strategy for one control-plane service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePublishingStrategyMapping {
    /// Service name (APIServer, OAuthServer, Konnectivity, Ignition, OIDC)
    pub service: String,
    /// How the service is published
    pub service_publishing_strategy: ServicePublishingStrategy,
}

/// Publishing strategy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePublishingStrategy {
    /// LoadBalancer, Route, NodePort or S3
    #[serde(rename = "type")]
    pub type_: String,
}

/// etcd secret encryption
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretEncryptionSpec {
    /// aescbc or kms
    #[serde(rename = "type")]
    pub type_: String,
    /// AES-CBC keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aescbc: Option<AescbcSpec>,
    /// KMS configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms: Option<KmsSpec>,
}

/// AES-CBC encryption keys
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AescbcSpec {
    /// Key used for new writes
    pub active_key: LocalObjectRef,
    /// Key still accepted for reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_key: Option<LocalObjectRef>,
}

/// KMS encryption
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KmsSpec {
    /// KMS provider (AWS)
    pub provider: String,
    /// AWS KMS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsKmsSpec>,
}

/// AWS KMS settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsKmsSpec {
    /// KMS region
    pub region: String,
    /// Key used for new writes
    pub active_key: AwsKmsKeyEntry,
    /// Key still accepted for reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_key: Option<AwsKmsKeyEntry>,
    /// Credentials used to reach KMS
    pub auth: AwsKmsAuth,
}

/// AWS KMS key
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsKmsKeyEntry {
    /// Key ARN
    #[serde(rename = "arn")]
    pub arn: String,
}

/// AWS KMS credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsKmsAuth {
    /// Secret holding AWS credentials
    pub credentials: LocalObjectRef,
}

/// Cluster configuration references
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfiguration {
    /// Secrets referenced by cluster configuration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<LocalObjectRef>,
    /// Config maps referenced by cluster configuration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_map_refs: Vec<LocalObjectRef>,
}

/// Desired state of a pool of worker nodes
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hypershift.openshift.io",
    version = "v1beta1",
    kind = "NodePool",
    plural = "nodepools",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Name of the owning HostedCluster
    #[serde(default)]
    pub cluster_name: String,

    /// Desired node count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Upgrade and repair policy
    #[serde(default)]
    pub management: NodePoolManagement,

    /// Machine platform
    #[serde(default)]
    pub platform: NodePoolPlatform,

    /// Release payload for the nodes
    #[serde(default)]
    pub release: Release,

    /// Top-level fields carried through untouched
    #[serde(flatten)]
    #[schemars(skip)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// NodePool upgrade and repair policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolManagement {
    /// Replace or InPlace
    #[serde(default)]
    pub upgrade_type: String,
    /// Replace upgrade settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<ReplaceUpgrade>,
    /// Replace unhealthy machines automatically
    #[serde(default)]
    pub auto_repair: bool,
}

/// Replace upgrade settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceUpgrade {
    /// RollingUpdate or OnDelete
    pub strategy: String,
    /// Rolling update limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdate>,
}

/// Rolling update limits
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdate {
    /// Extra machines allowed during rollout
    pub max_surge: i32,
    /// Machines allowed to be unavailable during rollout
    pub max_unavailable: i32,
}

/// Machine platform of a NodePool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolPlatform {
    /// Platform type; must agree with the HostedCluster
    #[serde(rename = "type", default)]
    pub type_: PlatformType,
    /// AWS machine settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsNodePoolPlatform>,
    /// Azure machine settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureNodePoolPlatform>,
}

/// AWS machine settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsNodePoolPlatform {
    /// EC2 instance type
    #[serde(default)]
    pub instance_type: String,
    /// IAM instance profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_profile: Option<String>,
    /// Subnet the machines join
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<AwsResourceReference>,
    /// Security groups attached to the machines
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<AwsResourceReference>,
}

/// Azure machine settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureNodePoolPlatform {
    /// VM size
    #[serde(rename = "vmsize", default)]
    pub vm_size: String,
    /// Boot image
    #[serde(rename = "imageID", default)]
    pub image_id: String,
    /// OS disk size
    #[serde(rename = "diskSizeGB", default)]
    pub disk_size_gb: i32,
}
