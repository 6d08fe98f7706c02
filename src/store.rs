//! Resource store abstraction over the Kubernetes API
//!
//! Every read the reconciler performs and every write it issues goes through
//! [`ResourceStore`], so the reconciliation logic can be exercised against
//! mocks or the in-memory store without an API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::crd::{DeploymentRequest, HostedCluster, NodePool, WorkBundle};
use crate::{Error, FIELD_MANAGER};

/// Trait abstracting the namespace-scoped object operations the controller needs
///
/// Getters return `Ok(None)` when the object does not exist. Merge patches
/// that carry `metadata.resourceVersion` fail with a 409 conflict when the
/// stored object has moved on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a DeploymentRequest
    async fn get_deployment_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DeploymentRequest>, Error>;

    /// Merge-patch a DeploymentRequest (metadata and spec), returning the stored object
    async fn patch_deployment_request(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DeploymentRequest, Error>;

    /// Merge-patch the status subresource of a DeploymentRequest
    async fn patch_deployment_request_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DeploymentRequest, Error>;

    /// Fetch a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create or replace a Secret
    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Delete a Secret; a missing secret is not an error
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Fetch a ConfigMap
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, Error>;

    /// Fetch a HostedCluster as stored, including fields the typed model lacks
    async fn get_hosted_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Fetch a NodePool as stored
    async fn get_node_pool(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Fetch a WorkBundle
    async fn get_work_bundle(&self, namespace: &str, name: &str)
        -> Result<Option<WorkBundle>, Error>;

    /// Create a WorkBundle
    async fn create_work_bundle(&self, bundle: &WorkBundle) -> Result<WorkBundle, Error>;

    /// Merge-patch a WorkBundle
    async fn patch_work_bundle(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<WorkBundle, Error>;

    /// Delete a WorkBundle; a missing bundle is not an error
    async fn delete_work_bundle(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Merge-patch a request against the snapshot it was computed from
///
/// The patch carries the snapshot's resourceVersion, so a concurrent write
/// fails with 409 instead of being overwritten. On success `dr` is replaced
/// by the stored object.
pub async fn persist_request(
    store: &dyn ResourceStore,
    dr: &mut DeploymentRequest,
    mut patch: Value,
) -> Result<(), Error> {
    patch["metadata"]["resourceVersion"] = json!(dr.resource_version());
    let namespace = dr.namespace().unwrap_or_default();
    let name = dr.name_any();
    match store
        .patch_deployment_request(&namespace, &name, &patch)
        .await
    {
        Ok(updated) => {
            *dr = updated;
            Ok(())
        }
        Err(e) => {
            if e.is_conflict() {
                warn!(deployment = %name, "request update conflicted, will retry on next reconcile");
            }
            Err(e)
        }
    }
}

/// Persist the request's spec (scaffolded specs, credentials, infra ID)
pub async fn persist_spec(
    store: &dyn ResourceStore,
    dr: &mut DeploymentRequest,
) -> Result<(), Error> {
    let patch = json!({ "spec": dr.spec });
    persist_request(store, dr, patch).await
}

/// Kubernetes-backed resource store
pub struct KubeResourceStore {
    client: Client,
}

impl KubeResourceStore {
    /// Create a store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Untyped API for `K`, so reads keep every field of the stored object
    fn dynamic_api<K>(&self, namespace: &str) -> Api<DynamicObject>
    where
        K: kube::Resource<DynamicType = ()>,
    {
        Api::namespaced_with(self.client.clone(), namespace, &ApiResource::erase::<K>(&()))
    }
}

/// Delete through `api`, treating 404 as success
async fn delete_tolerant<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) => match Error::from(e) {
            err if err.is_not_found() => Ok(()),
            err => Err(err),
        },
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get_deployment_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DeploymentRequest>, Error> {
        Ok(self.api::<DeploymentRequest>(namespace).get_opt(name).await?)
    }

    async fn patch_deployment_request(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DeploymentRequest, Error> {
        Ok(self
            .api::<DeploymentRequest>(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?)
    }

    async fn patch_deployment_request_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DeploymentRequest, Error> {
        Ok(self
            .api::<DeploymentRequest>(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.api::<Secret>(namespace).get_opt(name).await?)
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret
            .namespace()
            .ok_or_else(|| Error::internal("secret has no namespace"))?;
        self.api::<Secret>(&namespace)
            .patch(
                &secret.name_any(),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(secret),
            )
            .await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        delete_tolerant(&self.api::<Secret>(namespace), name).await
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        Ok(self.api::<ConfigMap>(namespace).get_opt(name).await?)
    }

    async fn get_hosted_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self
            .dynamic_api::<HostedCluster>(namespace)
            .get_opt(name)
            .await?)
    }

    async fn get_node_pool(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.dynamic_api::<NodePool>(namespace).get_opt(name).await?)
    }

    async fn get_work_bundle(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkBundle>, Error> {
        Ok(self.api::<WorkBundle>(namespace).get_opt(name).await?)
    }

    async fn create_work_bundle(&self, bundle: &WorkBundle) -> Result<WorkBundle, Error> {
        let namespace = bundle
            .namespace()
            .ok_or_else(|| Error::internal("work bundle has no namespace"))?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(self
            .api::<WorkBundle>(&namespace)
            .create(&params, bundle)
            .await?)
    }

    async fn patch_work_bundle(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<WorkBundle, Error> {
        Ok(self
            .api::<WorkBundle>(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?)
    }

    async fn delete_work_bundle(&self, namespace: &str, name: &str) -> Result<(), Error> {
        delete_tolerant(&self.api::<WorkBundle>(namespace), name).await
    }
}
