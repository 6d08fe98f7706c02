//! Cloud provider secret parsing
//!
//! The secret named by `spec.infrastructure.cloudProviderSecretRef` lives in
//! the request namespace and carries the cloud credentials, the base DNS
//! domain and the image pull secret.
//!
//! AWS keys: `aws_access_key_id`, `aws_secret_access_key`, `baseDomain`,
//! `pullSecret`. Azure keys: `osServicePrincipal.json` (subscriptionId,
//! clientId, clientSecret, tenantId), `baseDomain`, `pullSecret`.

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

use super::{AwsCredentials, AzureCredentials};
use crate::crd::{DeploymentRequest, PlatformType};
use crate::store::ResourceStore;
use crate::Error;

/// Field path of the secret reference, for validation messages
const SECRET_REF_FIELD: &str = "spec.infrastructure.cloudProviderSecretRef";

/// Platform credentials
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloudCredentials {
    /// AWS access keys
    Aws(AwsCredentials),
    /// Azure service principal
    Azure(AzureCredentials),
}

/// Parsed provider secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSecret {
    /// Base DNS domain
    pub base_domain: String,
    /// Image pull secret (dockerconfigjson)
    pub pull_secret: String,
    /// Platform credentials
    pub credentials: CloudCredentials,
}

impl ProviderSecret {
    /// AWS credentials, or a validation error on another platform
    pub fn aws(&self) -> Result<&AwsCredentials, Error> {
        match &self.credentials {
            CloudCredentials::Aws(c) => Ok(c),
            CloudCredentials::Azure(_) => Err(Error::validation_for_field(
                SECRET_REF_FIELD,
                "provider secret holds Azure credentials but the platform is AWS",
            )),
        }
    }

    /// Azure credentials, or a validation error on another platform
    pub fn azure(&self) -> Result<&AzureCredentials, Error> {
        match &self.credentials {
            CloudCredentials::Azure(c) => Ok(c),
            CloudCredentials::Aws(_) => Err(Error::validation_for_field(
                SECRET_REF_FIELD,
                "provider secret holds AWS credentials but the platform is Azure",
            )),
        }
    }
}

fn read_key(secret: &Secret, key: &str) -> Result<String, Error> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| b.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|s| s.as_bytes().to_vec())
        })
        .filter(|b| !b.is_empty())
        .ok_or_else(|| {
            Error::validation_for_field(
                SECRET_REF_FIELD,
                format!("secret {} is missing key {key}", secret.name_any()),
            )
        })?;

    String::from_utf8(bytes).map_err(|_| {
        Error::validation_for_field(
            SECRET_REF_FIELD,
            format!("secret {} key {key} is not valid UTF-8", secret.name_any()),
        )
    })
}

/// Parse a provider secret for the given platform
pub fn parse_provider_secret(
    secret: &Secret,
    platform: PlatformType,
) -> Result<ProviderSecret, Error> {
    let credentials = match platform {
        PlatformType::Aws => CloudCredentials::Aws(AwsCredentials {
            access_key_id: read_key(secret, "aws_access_key_id")?,
            secret_access_key: read_key(secret, "aws_secret_access_key")?,
        }),
        PlatformType::Azure => {
            let raw = read_key(secret, "osServicePrincipal.json")?;
            let principal: AzureCredentials = serde_json::from_str(&raw).map_err(|e| {
                Error::validation_for_field(
                    SECRET_REF_FIELD,
                    format!("osServicePrincipal.json is invalid: {e}"),
                )
            })?;
            CloudCredentials::Azure(principal)
        }
        PlatformType::None => {
            return Err(Error::validation_for_field(
                "spec.infrastructure.platform",
                "a platform (aws or azure) is required",
            ))
        }
    };

    Ok(ProviderSecret {
        base_domain: read_key(secret, "baseDomain")?,
        pull_secret: read_key(secret, "pullSecret")?,
        credentials,
    })
}

/// Fetch and parse the provider secret a request points at
pub async fn resolve_provider_secret(
    store: &dyn ResourceStore,
    dr: &DeploymentRequest,
) -> Result<ProviderSecret, Error> {
    let secret_name = dr
        .spec
        .infrastructure
        .cloud_provider_secret_ref
        .as_ref()
        .map(|r| r.name.as_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            Error::validation_for_field(SECRET_REF_FIELD, "cloudProviderSecretRef is required")
        })?;
    let platform = dr.platform().ok_or_else(|| {
        Error::validation_for_field(
            "spec.infrastructure.platform",
            "a platform (aws or azure) is required",
        )
    })?;

    let namespace = dr.namespace().unwrap_or_default();
    let secret = store
        .get_secret(&namespace, secret_name)
        .await?
        .ok_or_else(|| {
            Error::validation_for_field(
                SECRET_REF_FIELD,
                format!("secret {namespace}/{secret_name} not found"),
            )
        })?;

    parse_provider_secret(&secret, platform)
}
