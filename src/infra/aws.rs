//! AWS infrastructure lifecycle
//!
//! Creation runs in two gated steps. Infrastructure (VPC, subnets, DNS
//! zones) comes first; its output is scaffolded into the request spec and
//! persisted before PlatformConfigured is set. IAM (OIDC provider and
//! control-plane roles) comes second and needs the OIDC bucket location; its
//! role ARNs are persisted and the credential secrets generated before
//! PlatformIAMConfigured is set.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{
    delete_generated_secrets, secrets, CreateAwsIamRequest, CreateAwsInfraRequest,
    DestroyAwsIamRequest, DestroyAwsInfraRequest, InfraContext, Outcome, ProviderSecret,
    CREATE_RETRY, DESTROY_RETRY,
};
use crate::conditions::set_if_changed;
use crate::crd::{
    is_condition_true, reasons, AwsRoleArns, ConditionStatus, ConditionType, Credentials,
    DeploymentRequest, OverrideMode,
};
use crate::scaffold;
use crate::store::persist_spec;
use crate::Error;

/// Where the OIDC discovery documents are published
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidcLocation {
    /// S3 bucket name
    pub bucket: String,
    /// S3 bucket region
    pub region: String,
}

/// Locate the OIDC bucket
///
/// With `ConfigureWithManifest` the bucket comes from a secret in the hosting
/// cluster's namespace (keys `bucket`, `region`); otherwise from the
/// well-known config map (keys `name`, `region`).
pub async fn resolve_oidc_location(
    ictx: InfraContext<'_>,
    dr: &DeploymentRequest,
) -> Result<OidcLocation, Error> {
    let config = ictx.config;
    if dr.has_override(OverrideMode::ConfigureWithManifest) {
        let namespace = dr.work_bundle_namespace();
        let secret = ictx
            .store
            .get_secret(namespace, &config.oidc_secret_name)
            .await?
            .ok_or_else(|| {
                Error::validation(format!(
                    "OIDC secret {namespace}/{} not found",
                    config.oidc_secret_name
                ))
            })?;
        let read = |key: &str| -> Result<String, Error> {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .and_then(|b| String::from_utf8(b.0.clone()).ok())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    Error::validation(format!(
                        "OIDC secret {} is missing key {key}",
                        config.oidc_secret_name
                    ))
                })
        };
        return Ok(OidcLocation {
            bucket: read("bucket")?,
            region: read("region")?,
        });
    }

    let namespace = &config.oidc_config_map_namespace;
    let name = &config.oidc_config_map_name;
    let cm = ictx
        .store
        .get_config_map(namespace, name)
        .await?
        .ok_or_else(|| Error::validation(format!("OIDC config map {namespace}/{name} not found")))?;
    let read = |key: &str| -> Result<String, Error> {
        cm.data
            .as_ref()
            .and_then(|d| d.get(key))
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| {
                Error::validation(format!("OIDC config map {name} is missing key {key}"))
            })
    };
    Ok(OidcLocation {
        bucket: read("name")?,
        region: read("region")?,
    })
}

/// Create AWS infrastructure and IAM for a request
pub async fn create(
    ictx: InfraContext<'_>,
    dr: &mut DeploymentRequest,
    provider: &ProviderSecret,
) -> Result<Outcome, Error> {
    let store = ictx.store;
    let platform_ready = is_condition_true(dr.conditions(), ConditionType::PlatformConfigured);
    let iam_ready = is_condition_true(dr.conditions(), ConditionType::PlatformIAMConfigured);
    if platform_ready && iam_ready {
        debug!(infra_id = %dr.spec.infra_id, "AWS infrastructure already configured");
        return Ok(Outcome::Complete);
    }

    let region = dr.aws().map(|a| a.region.clone()).unwrap_or_default();
    if region.is_empty() {
        set_if_changed(
            store,
            dr,
            ConditionType::PlatformConfigured,
            ConditionStatus::False,
            reasons::MISCONFIGURED,
            "spec.infrastructure.platform.aws.region is required",
        )
        .await?;
        return Ok(Outcome::AwaitChange);
    }
    let credentials = provider.aws()?.clone();

    if !platform_ready {
        info!(infra_id = %dr.spec.infra_id, region = %region, "creating AWS infrastructure");
        let request = CreateAwsInfraRequest {
            name: dr.name_any(),
            infra_id: dr.spec.infra_id.clone(),
            region: region.clone(),
            zones: dr.aws().map(|a| a.zones.clone()).unwrap_or_default(),
            base_domain: provider.base_domain.clone(),
            credentials: credentials.clone(),
        };
        let output = match ictx.provisioner.create_aws_infra(&request).await {
            Ok(output) => output,
            Err(e) => {
                warn!(infra_id = %dr.spec.infra_id, error = %e, "AWS infrastructure creation failed");
                set_if_changed(
                    store,
                    dr,
                    ConditionType::PlatformConfigured,
                    ConditionStatus::False,
                    reasons::MISCONFIGURED,
                    &e.to_string(),
                )
                .await?;
                return Ok(Outcome::Requeue(CREATE_RETRY));
            }
        };

        scaffold::scaffold_hosted_cluster(dr, ictx.config);
        scaffold::scaffold_node_pools(dr, ictx.config);
        scaffold::apply_aws_infra(dr, &output);
        persist_spec(store, dr).await?;
        set_if_changed(
            store,
            dr,
            ConditionType::PlatformConfigured,
            ConditionStatus::True,
            reasons::CONFIGURED_AS_EXPECTED,
            "",
        )
        .await?;
    }

    info!(infra_id = %dr.spec.infra_id, "creating AWS IAM");
    let oidc = match resolve_oidc_location(ictx, dr).await {
        Ok(oidc) => oidc,
        Err(e) => {
            warn!(error = %e, "OIDC bucket location unavailable");
            set_if_changed(
                store,
                dr,
                ConditionType::PlatformIAMConfigured,
                ConditionStatus::False,
                reasons::MISCONFIGURED,
                &e.to_string(),
            )
            .await?;
            return Ok(Outcome::Requeue(CREATE_RETRY));
        }
    };

    let dns = dr
        .spec
        .hosted_cluster_spec
        .as_ref()
        .map(|s| s.dns.clone())
        .unwrap_or_default();
    let request = CreateAwsIamRequest {
        infra_id: dr.spec.infra_id.clone(),
        region,
        public_zone_id: dns.public_zone_id.unwrap_or_default(),
        private_zone_id: dns.private_zone_id.unwrap_or_default(),
        local_zone_id: String::new(),
        oidc_bucket_name: oidc.bucket,
        oidc_bucket_region: oidc.region,
        credentials,
    };
    let output = match ictx.provisioner.create_aws_iam(&request).await {
        Ok(output) => output,
        Err(e) => {
            warn!(infra_id = %dr.spec.infra_id, error = %e, "AWS IAM creation failed");
            set_if_changed(
                store,
                dr,
                ConditionType::PlatformIAMConfigured,
                ConditionStatus::False,
                reasons::MISCONFIGURED,
                &e.to_string(),
            )
            .await?;
            return Ok(Outcome::Requeue(CREATE_RETRY));
        }
    };

    let arns = AwsRoleArns {
        kube_cloud_controller: output.kube_cloud_controller_role_arn.clone(),
        node_pool_management: output.node_pool_management_role_arn.clone(),
        control_plane_operator: output.control_plane_operator_role_arn.clone(),
    };
    dr.spec.credentials = Some(Credentials {
        aws: Some(arns.clone()),
    });
    scaffold::apply_aws_iam(dr, &output);
    persist_spec(store, dr).await?;

    // Supplied out of band when manifests are configured externally
    if !dr.has_override(OverrideMode::ConfigureWithManifest) {
        store
            .apply_secret(&secrets::pull_secret(dr, &provider.pull_secret))
            .await?;
        for secret in secrets::aws_role_secrets(dr, &arns) {
            store.apply_secret(&secret).await?;
        }
    }

    set_if_changed(
        store,
        dr,
        ConditionType::PlatformIAMConfigured,
        ConditionStatus::True,
        reasons::CONFIGURED_AS_EXPECTED,
        "",
    )
    .await?;
    info!(infra_id = %dr.spec.infra_id, "AWS infrastructure and IAM configured");
    Ok(Outcome::Complete)
}

/// Destroy AWS infrastructure and IAM for a request
pub async fn destroy(
    ictx: InfraContext<'_>,
    dr: &mut DeploymentRequest,
    provider: &ProviderSecret,
) -> Result<Outcome, Error> {
    let store = ictx.store;
    let credentials = provider.aws()?.clone();
    let region = dr.aws().map(|a| a.region.clone()).unwrap_or_default();
    let base_domain = dr
        .spec
        .hosted_cluster_spec
        .as_ref()
        .map(|s| s.dns.base_domain.clone())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| provider.base_domain.clone());

    if let Err(e) = set_if_changed(
        store,
        dr,
        ConditionType::PlatformConfigured,
        ConditionStatus::False,
        reasons::DESTROYING,
        "destroying AWS infrastructure",
    )
    .await
    {
        debug!(error = %e, "could not record infrastructure destroy");
    }

    info!(infra_id = %dr.spec.infra_id, "destroying AWS infrastructure");
    let request = DestroyAwsInfraRequest {
        name: dr.name_any(),
        infra_id: dr.spec.infra_id.clone(),
        region: region.clone(),
        base_domain,
        credentials: credentials.clone(),
    };
    if let Err(e) = ictx.provisioner.destroy_aws_infra(&request).await {
        warn!(infra_id = %dr.spec.infra_id, error = %e, "AWS infrastructure destroy failed");
        return Ok(Outcome::Requeue(DESTROY_RETRY));
    }

    if let Err(e) = set_if_changed(
        store,
        dr,
        ConditionType::PlatformIAMConfigured,
        ConditionStatus::False,
        reasons::REMOVING,
        "removing AWS IAM",
    )
    .await
    {
        debug!(error = %e, "could not record IAM removal");
    }

    info!(infra_id = %dr.spec.infra_id, "destroying AWS IAM");
    let request = DestroyAwsIamRequest {
        infra_id: dr.spec.infra_id.clone(),
        region,
        credentials,
    };
    if let Err(e) = ictx.provisioner.destroy_aws_iam(&request).await {
        warn!(infra_id = %dr.spec.infra_id, error = %e, "AWS IAM destroy failed");
        return Ok(Outcome::Requeue(DESTROY_RETRY));
    }

    delete_generated_secrets(store, dr).await?;
    info!(infra_id = %dr.spec.infra_id, "AWS infrastructure destroyed");
    Ok(Outcome::Complete)
}
