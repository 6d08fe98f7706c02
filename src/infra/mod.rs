//! Cloud infrastructure lifecycle
//!
//! Creation and destruction of the network, DNS and IAM resources a hosted
//! control plane needs, per cloud platform:
//!
//! - **AWS**: infrastructure, then IAM roles and the OIDC provider
//! - **Azure**: infrastructure only; IAM is reported as configured alongside it
//!
//! # Idempotence
//!
//! Creation is gated on the PlatformConfigured and PlatformIAMConfigured
//! conditions. Once both are True the provisioner is never called again for
//! the request, no matter how often it is reconciled. Every step persists its
//! output before setting its condition, so an interrupted reconcile resumes
//! at the first step whose condition is not yet True.
//!
//! # Retries
//!
//! Failures requeue after a fixed delay: one minute on the create path,
//! thirty seconds on the destroy path.

pub mod aws;
pub mod azure;
pub mod command;
pub mod provider_secret;
pub mod secrets;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::config::ControllerConfig;
use crate::crd::DeploymentRequest;
use crate::store::ResourceStore;
use crate::Error;

pub use command::CommandProvisioner;
pub use provider_secret::{resolve_provider_secret, CloudCredentials, ProviderSecret};

/// Delay before retrying a failed create-path step
pub const CREATE_RETRY: Duration = Duration::from_secs(60);

/// Delay before retrying a failed destroy-path step
pub const DESTROY_RETRY: Duration = Duration::from_secs(30);

/// Result of a lifecycle step that did not fail outright
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Step finished; the caller may continue
    Complete,
    /// Step must be retried after the delay
    Requeue(Duration),
    /// Step is blocked on a spec edit
    AwaitChange,
}

impl Outcome {
    /// True when the caller may proceed
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Collaborators the lifecycle managers need
#[derive(Clone, Copy)]
pub struct InfraContext<'a> {
    /// Object reads and writes
    pub store: &'a dyn ResourceStore,
    /// Cloud resource creation and destruction
    pub provisioner: &'a dyn InfraProvisioner,
    /// Controller settings
    pub config: &'a ControllerConfig,
}

/// AWS access keys from the provider secret
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Azure service principal from the provider secret
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureCredentials {
    /// Subscription ID
    pub subscription_id: String,
    /// Client (application) ID
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// Tenant ID
    pub tenant_id: String,
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("subscription_id", &self.subscription_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// Input to AWS infrastructure creation
#[derive(Clone, Debug, PartialEq)]
pub struct CreateAwsInfraRequest {
    /// Request name
    pub name: String,
    /// Infra ID tagging every resource
    pub infra_id: String,
    /// AWS region
    pub region: String,
    /// Availability zones; empty lets the provisioner choose
    pub zones: Vec<String>,
    /// Base DNS domain
    pub base_domain: String,
    /// AWS credentials
    pub credentials: AwsCredentials,
}

/// A subnet created in one availability zone
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AwsZone {
    /// Zone name
    pub name: String,
    /// Subnet ID
    #[serde(rename = "subnetID")]
    pub subnet_id: String,
}

/// Output of AWS infrastructure creation
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsInfraOutput {
    /// Base DNS domain
    #[serde(default)]
    pub base_domain: String,
    /// Public hosted zone
    #[serde(rename = "publicZoneID", default)]
    pub public_zone_id: String,
    /// Private hosted zone
    #[serde(rename = "privateZoneID", default)]
    pub private_zone_id: String,
    /// Local hosted zone
    #[serde(rename = "localZoneID", default)]
    pub local_zone_id: String,
    /// VPC ID
    #[serde(rename = "vpcID", default)]
    pub vpc_id: String,
    /// Subnets per zone
    #[serde(default)]
    pub zones: Vec<AwsZone>,
    /// Machine network CIDR
    #[serde(rename = "machineCIDR", default)]
    pub compute_cidr: String,
    /// Default security group for workers
    #[serde(rename = "securityGroupID", default)]
    pub security_group_id: String,
}

/// Input to AWS IAM creation
#[derive(Clone, Debug, PartialEq)]
pub struct CreateAwsIamRequest {
    /// Infra ID tagging every role
    pub infra_id: String,
    /// AWS region
    pub region: String,
    /// Public hosted zone
    pub public_zone_id: String,
    /// Private hosted zone
    pub private_zone_id: String,
    /// Local hosted zone
    pub local_zone_id: String,
    /// Bucket serving OIDC discovery documents
    pub oidc_bucket_name: String,
    /// Region of the OIDC bucket
    pub oidc_bucket_region: String,
    /// AWS credentials
    pub credentials: AwsCredentials,
}

/// A role bound to an in-cluster service account
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AwsRole {
    /// Role ARN
    pub arn: String,
    /// Namespace of the service account
    pub namespace: String,
    /// Name of the credentials secret
    pub name: String,
}

/// Output of AWS IAM creation
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsIamOutput {
    /// OIDC issuer URL
    #[serde(rename = "issuerURL", default)]
    pub issuer_url: String,
    /// Cloud controller role
    #[serde(rename = "kubeCloudControllerRoleARN", default)]
    pub kube_cloud_controller_role_arn: String,
    /// Node pool management role
    #[serde(rename = "nodePoolManagementRoleARN", default)]
    pub node_pool_management_role_arn: String,
    /// Control plane operator role
    #[serde(rename = "controlPlaneOperatorRoleARN", default)]
    pub control_plane_operator_role_arn: String,
    /// Per-service roles
    #[serde(default)]
    pub roles: Vec<AwsRole>,
}

/// Input to AWS infrastructure destruction
#[derive(Clone, Debug, PartialEq)]
pub struct DestroyAwsInfraRequest {
    /// Request name
    pub name: String,
    /// Infra ID tagging every resource
    pub infra_id: String,
    /// AWS region
    pub region: String,
    /// Base DNS domain
    pub base_domain: String,
    /// AWS credentials
    pub credentials: AwsCredentials,
}

/// Input to AWS IAM destruction
#[derive(Clone, Debug, PartialEq)]
pub struct DestroyAwsIamRequest {
    /// Infra ID tagging every role
    pub infra_id: String,
    /// AWS region
    pub region: String,
    /// AWS credentials
    pub credentials: AwsCredentials,
}

/// Input to Azure infrastructure creation
#[derive(Clone, Debug, PartialEq)]
pub struct CreateAzureInfraRequest {
    /// Request name
    pub name: String,
    /// Infra ID tagging every resource
    pub infra_id: String,
    /// Azure location
    pub location: String,
    /// Base DNS domain
    pub base_domain: String,
    /// Service principal
    pub credentials: AzureCredentials,
}

/// Output of Azure infrastructure creation
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureInfraOutput {
    /// Base DNS domain
    #[serde(default)]
    pub base_domain: String,
    /// Public DNS zone
    #[serde(rename = "publicZoneID", default)]
    pub public_zone_id: String,
    /// Private DNS zone
    #[serde(rename = "privateZoneID", default)]
    pub private_zone_id: String,
    /// Azure location
    #[serde(default)]
    pub location: String,
    /// Resource group holding cluster resources
    #[serde(default)]
    pub resource_group_name: String,
    /// Virtual network name
    #[serde(default)]
    pub vnet_name: String,
    /// Virtual network ID
    #[serde(rename = "vnetID", default)]
    pub vnet_id: String,
    /// Subnet name
    #[serde(default)]
    pub subnet_name: String,
    /// Boot image for worker machines
    #[serde(rename = "bootImageID", default)]
    pub boot_image_id: String,
    /// Managed identity for machines
    #[serde(rename = "machineIdentityID", default)]
    pub machine_identity_id: String,
    /// Network security group name
    #[serde(default)]
    pub security_group_name: String,
}

/// Input to Azure infrastructure destruction
#[derive(Clone, Debug, PartialEq)]
pub struct DestroyAzureInfraRequest {
    /// Request name
    pub name: String,
    /// Infra ID tagging every resource
    pub infra_id: String,
    /// Azure location
    pub location: String,
    /// Service principal
    pub credentials: AzureCredentials,
}

/// Delete every secret generated for the request
pub async fn delete_generated_secrets(
    store: &dyn ResourceStore,
    dr: &DeploymentRequest,
) -> Result<(), Error> {
    let namespace = dr.namespace().unwrap_or_default();
    for name in secrets::generated_secret_names(dr) {
        store.delete_secret(&namespace, &name).await?;
    }
    Ok(())
}

/// Trait abstracting cloud resource creation and destruction
///
/// Every operation must be safe to call again after a failure; the
/// reconciler retries without tracking partial external state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InfraProvisioner: Send + Sync {
    /// Create VPC, subnets, DNS zones and security groups
    async fn create_aws_infra(&self, request: &CreateAwsInfraRequest)
        -> Result<AwsInfraOutput, Error>;

    /// Create the OIDC provider and control-plane IAM roles
    async fn create_aws_iam(&self, request: &CreateAwsIamRequest) -> Result<AwsIamOutput, Error>;

    /// Destroy everything `create_aws_infra` created
    async fn destroy_aws_infra(&self, request: &DestroyAwsInfraRequest) -> Result<(), Error>;

    /// Destroy everything `create_aws_iam` created
    async fn destroy_aws_iam(&self, request: &DestroyAwsIamRequest) -> Result<(), Error>;

    /// Create resource group, network, DNS zones and identity
    async fn create_azure_infra(
        &self,
        request: &CreateAzureInfraRequest,
    ) -> Result<AzureInfraOutput, Error>;

    /// Destroy everything `create_azure_infra` created
    async fn destroy_azure_infra(&self, request: &DestroyAzureInfraRequest) -> Result<(), Error>;
}
