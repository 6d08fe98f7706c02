//! Custom Resource Definitions for hcp-deployer
//!
//! `DeploymentRequest` and `WorkBundle` are served by this controller's CRDs.
//! `HostedCluster` and `NodePool` are typed models of the hosted control plane
//! resources shipped inside a bundle.

mod deployment;
mod hosted_cluster;
mod schema;
mod types;
mod work;

pub use deployment::{
    AwsPlacement, AwsRoleArns, AzurePlacement, Credentials, DeploymentRequest,
    DeploymentRequestSpec, DeploymentRequestStatus, InfrastructureSpec, NodePoolEntry,
    OverrideMode, Platforms,
};
pub use hosted_cluster::{
    AescbcSpec, AwsCloudProviderConfig, AwsKmsAuth, AwsKmsKeyEntry, AwsKmsSpec,
    AwsNodePoolPlatform, AwsPlatformSpec, AwsResourceReference, AwsResourceTag,
    AwsRoleCredentials, AzureNodePoolPlatform, AzurePlatformSpec, ClusterConfiguration,
    ClusterNetworking, DnsSpec, EtcdSpec, HostedCluster, HostedClusterSpec, KmsSpec,
    ManagedEtcdSpec, ManagedEtcdStorage, NetworkEntry, NodePool, NodePoolManagement,
    NodePoolPlatform, NodePoolSpec, PersistentVolumeEtcdStorage, PlatformSpec, PlatformType,
    Release, ReplaceUpgrade, RollingUpdate, SecretEncryptionSpec, ServicePublishingStrategy,
    ServicePublishingStrategyMapping, HYPERSHIFT_API_VERSION,
};
pub use types::{
    find_condition, is_condition_true, reasons, Condition, ConditionStatus, ConditionType,
    LocalObjectRef,
};
pub use work::{
    DeleteOption, FeedbackValue, FieldValue, ManifestCondition, PropagationPolicy, ResourceMeta,
    ResourceStatus, StatusFeedback, WorkBundle, WorkBundleSpec, WorkBundleStatus, WorkCondition,
    Workload,
};
