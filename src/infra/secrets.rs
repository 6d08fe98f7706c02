//! Secrets generated for a request
//!
//! All generated secrets live in the request namespace, carry the infra ID
//! label, and are copied into the WorkBundle by the manifest resolver.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::core::ObjectMeta;
use kube::ResourceExt;
use rand::RngCore;

use super::{AwsCredentials, AzureCredentials};
use crate::crd::{AwsRoleArns, DeploymentRequest};
use crate::INFRA_ID_LABEL;

/// Token file projected into hosted control plane pods
const WEB_IDENTITY_TOKEN_FILE: &str = "/var/run/secrets/openshift/serviceaccount/token";

/// Name of the generated pull secret
pub fn pull_secret_name(dr: &DeploymentRequest) -> String {
    format!("{}-pull-secret", dr.name_any())
}

/// Name of the cloud controller credentials secret
pub fn cloud_controller_creds_name(dr: &DeploymentRequest) -> String {
    format!("{}-cloud-ctrl-creds", dr.name_any())
}

/// Name of the node pool management credentials secret
pub fn node_pool_creds_name(dr: &DeploymentRequest) -> String {
    format!("{}-node-mgmt-creds", dr.name_any())
}

/// Name of the control plane operator credentials secret
pub fn control_plane_creds_name(dr: &DeploymentRequest) -> String {
    format!("{}-cpo-creds", dr.name_any())
}

/// Name of the Azure cloud credentials secret
pub fn azure_credentials_name(dr: &DeploymentRequest) -> String {
    format!("{}-cloud-credentials", dr.name_any())
}

/// Name of the generated etcd encryption key
pub fn encryption_key_name(dr: &DeploymentRequest) -> String {
    format!("{}-etcd-encryption-key", dr.name_any())
}

/// Every secret name this controller may generate for a request
pub fn generated_secret_names(dr: &DeploymentRequest) -> Vec<String> {
    vec![
        pull_secret_name(dr),
        cloud_controller_creds_name(dr),
        node_pool_creds_name(dr),
        control_plane_creds_name(dr),
        azure_credentials_name(dr),
        encryption_key_name(dr),
    ]
}

fn labeled_secret(
    dr: &DeploymentRequest,
    name: String,
    type_: &str,
    data: BTreeMap<String, ByteString>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: dr.namespace(),
            labels: Some(BTreeMap::from([(
                INFRA_ID_LABEL.to_string(),
                dr.spec.infra_id.clone(),
            )])),
            ..Default::default()
        },
        type_: Some(type_.to_string()),
        data: Some(data),
        ..Default::default()
    }
}

fn bytes(s: impl Into<String>) -> ByteString {
    ByteString(s.into().into_bytes())
}

/// Image pull secret built from the provider secret
pub fn pull_secret(dr: &DeploymentRequest, dockerconfigjson: &str) -> Secret {
    labeled_secret(
        dr,
        pull_secret_name(dr),
        "kubernetes.io/dockerconfigjson",
        BTreeMap::from([(".dockerconfigjson".to_string(), bytes(dockerconfigjson))]),
    )
}

/// STS web-identity credentials file for a role
pub fn web_identity_credentials(role_arn: &str) -> String {
    format!("[default]\nrole_arn = {role_arn}\nweb_identity_token_file = {WEB_IDENTITY_TOKEN_FILE}\n")
}

/// The three control-plane role credential secrets
pub fn aws_role_secrets(dr: &DeploymentRequest, arns: &AwsRoleArns) -> Vec<Secret> {
    [
        (cloud_controller_creds_name(dr), &arns.kube_cloud_controller),
        (node_pool_creds_name(dr), &arns.node_pool_management),
        (control_plane_creds_name(dr), &arns.control_plane_operator),
    ]
    .into_iter()
    .map(|(name, arn)| {
        labeled_secret(
            dr,
            name,
            "Opaque",
            BTreeMap::from([("credentials".to_string(), bytes(web_identity_credentials(arn)))]),
        )
    })
    .collect()
}

/// Azure cloud credentials for the control plane
pub fn azure_credentials(dr: &DeploymentRequest, creds: &AzureCredentials) -> Secret {
    labeled_secret(
        dr,
        azure_credentials_name(dr),
        "Opaque",
        BTreeMap::from([
            ("AZURE_CLIENT_ID".to_string(), bytes(&creds.client_id)),
            ("AZURE_CLIENT_SECRET".to_string(), bytes(&creds.client_secret)),
            ("AZURE_SUBSCRIPTION_ID".to_string(), bytes(&creds.subscription_id)),
            ("AZURE_TENANT_ID".to_string(), bytes(&creds.tenant_id)),
        ]),
    )
}

/// AES-CBC etcd encryption key with 32 random bytes
pub fn encryption_key(namespace: &str, name: &str, infra_id: &str) -> Secret {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                INFRA_ID_LABEL.to_string(),
                infra_id.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([("key".to_string(), ByteString(key.to_vec()))])),
        ..Default::default()
    }
}

/// AWS shared credentials file for the provisioner CLI
pub fn aws_credentials_file(creds: &AwsCredentials) -> String {
    format!(
        "[default]\naws_access_key_id = {}\naws_secret_access_key = {}\n",
        creds.access_key_id, creds.secret_access_key
    )
}
