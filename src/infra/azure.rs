//! Azure infrastructure lifecycle
//!
//! Azure has no separate IAM step. A successful infrastructure create sets
//! PlatformConfigured and PlatformIAMConfigured together, keeping the
//! two-condition gate the same shape as on AWS.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{
    delete_generated_secrets, secrets, CreateAzureInfraRequest, DestroyAzureInfraRequest,
    InfraContext, Outcome, ProviderSecret, CREATE_RETRY, DESTROY_RETRY,
};
use crate::conditions::{set_if_changed, StatusPatch};
use crate::crd::{
    is_condition_true, reasons, ConditionStatus, ConditionType, DeploymentRequest, OverrideMode,
};
use crate::scaffold;
use crate::store::persist_spec;
use crate::Error;

const IAM_NOT_REQUIRED: &str = "IAM is not required on Azure";

/// Create Azure infrastructure for a request
pub async fn create(
    ictx: InfraContext<'_>,
    dr: &mut DeploymentRequest,
    provider: &ProviderSecret,
) -> Result<Outcome, Error> {
    let store = ictx.store;
    if is_condition_true(dr.conditions(), ConditionType::PlatformConfigured)
        && is_condition_true(dr.conditions(), ConditionType::PlatformIAMConfigured)
    {
        debug!(infra_id = %dr.spec.infra_id, "Azure infrastructure already configured");
        return Ok(Outcome::Complete);
    }

    let location = dr.azure().map(|a| a.location.clone()).unwrap_or_default();
    if location.is_empty() {
        set_if_changed(
            store,
            dr,
            ConditionType::PlatformConfigured,
            ConditionStatus::False,
            reasons::MISCONFIGURED,
            "spec.infrastructure.platform.azure.location is required",
        )
        .await?;
        return Ok(Outcome::AwaitChange);
    }
    let credentials = provider.azure()?.clone();

    info!(infra_id = %dr.spec.infra_id, location = %location, "creating Azure infrastructure");
    let request = CreateAzureInfraRequest {
        name: dr.name_any(),
        infra_id: dr.spec.infra_id.clone(),
        location,
        base_domain: provider.base_domain.clone(),
        credentials: credentials.clone(),
    };
    let output = match ictx.provisioner.create_azure_infra(&request).await {
        Ok(output) => output,
        Err(e) => {
            warn!(infra_id = %dr.spec.infra_id, error = %e, "Azure infrastructure creation failed");
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
    scaffold::apply_azure_infra(dr, &output);
    scaffold::apply_azure_subscription(dr, &credentials.subscription_id);
    persist_spec(store, dr).await?;

    if !dr.has_override(OverrideMode::ConfigureWithManifest) {
        store
            .apply_secret(&secrets::pull_secret(dr, &provider.pull_secret))
            .await?;
        store
            .apply_secret(&secrets::azure_credentials(dr, &credentials))
            .await?;
    }

    let mut patch = StatusPatch::new(dr);
    patch.set(
        ConditionType::PlatformConfigured,
        ConditionStatus::True,
        reasons::CONFIGURED_AS_EXPECTED,
        "",
    );
    patch.set(
        ConditionType::PlatformIAMConfigured,
        ConditionStatus::True,
        reasons::CONFIGURED_AS_EXPECTED,
        IAM_NOT_REQUIRED,
    );
    patch.commit(store, dr).await?;
    info!(infra_id = %dr.spec.infra_id, "Azure infrastructure configured");
    Ok(Outcome::Complete)
}

/// Make pre-existing Azure infrastructure usable without provisioning it
///
/// The control plane still needs the service principal as a cloud
/// credentials secret, and the HostedCluster needs the subscription ID.
pub async fn ensure_adopted_credentials(
    ictx: InfraContext<'_>,
    dr: &mut DeploymentRequest,
    provider: &ProviderSecret,
) -> Result<(), Error> {
    let credentials = provider.azure()?;
    let namespace = dr.namespace().unwrap_or_default();
    let name = secrets::azure_credentials_name(dr);
    if ictx.store.get_secret(&namespace, &name).await?.is_none() {
        info!(secret = %name, "creating Azure cloud credentials");
        ictx.store
            .apply_secret(&secrets::azure_credentials(dr, credentials))
            .await?;
    }

    if scaffold::apply_azure_subscription(dr, &credentials.subscription_id) {
        persist_spec(ictx.store, dr).await?;
    }
    Ok(())
}

/// Destroy Azure infrastructure for a request
pub async fn destroy(
    ictx: InfraContext<'_>,
    dr: &mut DeploymentRequest,
    provider: &ProviderSecret,
) -> Result<Outcome, Error> {
    let store = ictx.store;
    let credentials = provider.azure()?.clone();

    if let Err(e) = set_if_changed(
        store,
        dr,
        ConditionType::PlatformConfigured,
        ConditionStatus::False,
        reasons::DESTROYING,
        "destroying Azure infrastructure",
    )
    .await
    {
        debug!(error = %e, "could not record infrastructure destroy");
    }

    info!(infra_id = %dr.spec.infra_id, "destroying Azure infrastructure");
    let request = DestroyAzureInfraRequest {
        name: dr.name_any(),
        infra_id: dr.spec.infra_id.clone(),
        location: dr.azure().map(|a| a.location.clone()).unwrap_or_default(),
        credentials,
    };
    if let Err(e) = ictx.provisioner.destroy_azure_infra(&request).await {
        warn!(infra_id = %dr.spec.infra_id, error = %e, "Azure infrastructure destroy failed");
        return Ok(Outcome::Requeue(DESTROY_RETRY));
    }

    if let Err(e) = set_if_changed(
        store,
        dr,
        ConditionType::PlatformIAMConfigured,
        ConditionStatus::False,
        reasons::REMOVING,
        IAM_NOT_REQUIRED,
    )
    .await
    {
        debug!(error = %e, "could not record IAM removal");
    }

    delete_generated_secrets(store, dr).await?;
    info!(infra_id = %dr.spec.infra_id, "Azure infrastructure destroyed");
    Ok(Outcome::Complete)
}
