//! In-memory resource store for tests
//!
//! Objects are kept as JSON. Merge patches follow RFC 7386, every write bumps
//! `resourceVersion`, and a patch carrying a stale `resourceVersion` fails
//! with 409 the way the API server does. Removing the last finalizer from a
//! deleting request removes the object.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::DynamicObject;
use kube::core::ObjectMeta;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::crd::{
    AwsPlacement, AzurePlacement, DeploymentRequest, DeploymentRequestSpec, InfrastructureSpec,
    LocalObjectRef, PlatformType, Platforms, WorkBundle,
};
use crate::error::api_error;
use crate::infra::provider_secret::parse_provider_secret;
use crate::infra::ProviderSecret;
use crate::store::ResourceStore;
use crate::Error;

type Key = (String, String, String);

fn key(kind: &str, namespace: &str, name: &str) -> Key {
    (kind.to_string(), namespace.to_string(), name.to_string())
}

/// Apply an RFC 7386 JSON merge patch
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(existing) = target {
                for (k, v) in fields {
                    if v.is_null() {
                        existing.remove(k);
                    } else {
                        merge_patch(existing.entry(k.clone()).or_insert(Value::Null), v);
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    version: u64,
    patches: usize,
    status_patches: usize,
    bundle_patches: usize,
    hold_bundle_deletion: bool,
    log: Vec<String>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn stamp(&mut self, obj: &mut Value) {
        let version = self.next_version();
        obj["metadata"]["resourceVersion"] = json!(version);
    }
}

/// In-memory ResourceStore
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert any object under the given kind
    pub fn insert<T: Serialize + kube::Resource>(&self, kind: &str, obj: &T) {
        let mut inner = self.inner.lock().unwrap();
        let mut value = serde_json::to_value(obj).unwrap();
        inner.stamp(&mut value);
        if value["metadata"].get("generation").is_none() {
            value["metadata"]["generation"] = json!(1);
        }
        inner.objects.insert(
            key(kind, &obj.namespace().unwrap_or_default(), &obj.name_any()),
            value,
        );
    }

    /// Insert a raw object under its own kind
    pub fn insert_raw(&self, object: Value) {
        let object: DynamicObject = serde_json::from_value(object).unwrap();
        let kind = object.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
        self.insert(&kind, &object);
    }

    /// Insert a DeploymentRequest
    pub fn insert_request(&self, dr: &DeploymentRequest) {
        self.insert("DeploymentRequest", dr);
    }

    /// Insert a Secret
    pub fn insert_secret(&self, secret: &Secret) {
        self.insert("Secret", secret);
    }

    /// Insert a ConfigMap
    pub fn insert_config_map(&self, cm: &ConfigMap) {
        self.insert("ConfigMap", cm);
    }

    /// Insert a WorkBundle
    pub fn insert_bundle(&self, bundle: &WorkBundle) {
        self.insert("WorkBundle", bundle);
    }

    fn read<T: DeserializeOwned>(&self, kind: &str, namespace: &str, name: &str) -> Option<T> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&key(kind, namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Current stored request
    pub fn request(&self, namespace: &str, name: &str) -> Option<DeploymentRequest> {
        self.read("DeploymentRequest", namespace, name)
    }

    /// Current stored secret
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.read("Secret", namespace, name)
    }

    /// Current stored bundle
    pub fn bundle(&self, namespace: &str, name: &str) -> Option<WorkBundle> {
        self.read("WorkBundle", namespace, name)
    }

    /// Mark a stored request as deleting
    pub fn mark_deleting(&self, namespace: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(obj) = inner
            .objects
            .get_mut(&key("DeploymentRequest", namespace, name))
        {
            obj["metadata"]["deletionTimestamp"] = json!("2024-01-01T00:00:00Z");
        }
    }

    /// Keep deleted bundles around (marked deleting) until released
    pub fn hold_bundle_deletion(&self, hold: bool) {
        self.inner.lock().unwrap().hold_bundle_deletion = hold;
    }

    /// Drop a held bundle, as the remote agent does once children are gone
    pub fn release_bundle(&self, namespace: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.remove(&key("WorkBundle", namespace, name));
    }

    /// Replace the status of a stored bundle, as the remote agent does
    pub fn set_bundle_status(&self, namespace: &str, name: &str, status: Value) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(obj) = inner.objects.get_mut(&key("WorkBundle", namespace, name)) {
            obj["status"] = status;
        }
    }

    /// Bump the resourceVersion of a stored request, simulating a concurrent writer
    pub fn touch_request(&self, namespace: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        if let Some(obj) = inner
            .objects
            .get_mut(&key("DeploymentRequest", namespace, name))
        {
            obj["metadata"]["resourceVersion"] = json!(version);
        }
    }

    /// Number of request patches (metadata/spec)
    pub fn patch_count(&self) -> usize {
        self.inner.lock().unwrap().patches
    }

    /// Number of request status patches
    pub fn status_patch_count(&self) -> usize {
        self.inner.lock().unwrap().status_patches
    }

    /// Number of bundle patches
    pub fn bundle_patch_count(&self) -> usize {
        self.inner.lock().unwrap().bundle_patches
    }

    /// Ordered log of mutating operations (`<verb> <Kind> <ns>/<name>`)
    pub fn log(&self) -> Vec<String> {
        self.inner.lock().unwrap().log.clone()
    }

    fn patch_request(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        status_only: bool,
    ) -> Result<DeploymentRequest, Error> {
        let mut inner = self.inner.lock().unwrap();
        let k = key("DeploymentRequest", namespace, name);
        let Some(mut current) = inner.objects.get(&k).cloned() else {
            return Err(api_error(404, "NotFound", format!("{namespace}/{name} not found")));
        };

        if let Some(expected) = patch["metadata"]["resourceVersion"].as_str() {
            if current["metadata"]["resourceVersion"].as_str() != Some(expected) {
                return Err(api_error(
                    409,
                    "Conflict",
                    "the object has been modified; please apply your changes to the latest version",
                ));
            }
        }

        let before_spec = current["spec"].clone();
        if status_only {
            if let Some(status) = patch.get("status") {
                merge_patch(&mut current["status"], status);
            }
            inner.status_patches += 1;
        } else {
            let mut body = patch.clone();
            if let Some(obj) = body.as_object_mut() {
                obj.remove("status");
            }
            merge_patch(&mut current, &body);
            if current["spec"] != before_spec {
                let generation = current["metadata"]["generation"].as_i64().unwrap_or(1);
                current["metadata"]["generation"] = json!(generation + 1);
            }
            inner.patches += 1;
        }
        inner.stamp(&mut current);
        inner
            .log
            .push(format!("patch DeploymentRequest {namespace}/{name}"));

        let deleting = current["metadata"].get("deletionTimestamp").is_some();
        let finalizers_left = current["metadata"]["finalizers"]
            .as_array()
            .is_some_and(|f| !f.is_empty());
        let result: DeploymentRequest = serde_json::from_value(current.clone())?;
        if deleting && !finalizers_left {
            inner.objects.remove(&k);
            inner
                .log
                .push(format!("remove DeploymentRequest {namespace}/{name}"));
        } else {
            inner.objects.insert(k, current);
        }
        Ok(result)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_deployment_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DeploymentRequest>, Error> {
        Ok(self.request(namespace, name))
    }

    async fn patch_deployment_request(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DeploymentRequest, Error> {
        self.patch_request(namespace, name, patch, false)
    }

    async fn patch_deployment_request_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DeploymentRequest, Error> {
        self.patch_request(namespace, name, patch, true)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.secret(namespace, name))
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        self.insert("Secret", secret);
        self.inner
            .lock()
            .unwrap()
            .log
            .push(format!("apply Secret {namespace}/{name}"));
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .objects
            .remove(&key("Secret", namespace, name))
            .is_some()
        {
            inner.log.push(format!("delete Secret {namespace}/{name}"));
        }
        Ok(())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        Ok(self.read("ConfigMap", namespace, name))
    }

    async fn get_hosted_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.read("HostedCluster", namespace, name))
    }

    async fn get_node_pool(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.read("NodePool", namespace, name))
    }

    async fn get_work_bundle(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkBundle>, Error> {
        Ok(self.bundle(namespace, name))
    }

    async fn create_work_bundle(&self, bundle: &WorkBundle) -> Result<WorkBundle, Error> {
        let namespace = bundle.namespace().unwrap_or_default();
        let name = bundle.name_any();
        if self.bundle(&namespace, &name).is_some() {
            return Err(api_error(409, "AlreadyExists", format!("{name} already exists")));
        }
        self.insert("WorkBundle", bundle);
        self.inner
            .lock()
            .unwrap()
            .log
            .push(format!("create WorkBundle {namespace}/{name}"));
        self.bundle(&namespace, &name)
            .ok_or_else(|| Error::internal("bundle vanished"))
    }

    async fn patch_work_bundle(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<WorkBundle, Error> {
        let mut inner = self.inner.lock().unwrap();
        let k = key("WorkBundle", namespace, name);
        let Some(mut current) = inner.objects.get(&k).cloned() else {
            return Err(api_error(404, "NotFound", format!("{name} not found")));
        };
        merge_patch(&mut current, patch);
        inner.stamp(&mut current);
        inner.bundle_patches += 1;
        inner.log.push(format!("patch WorkBundle {namespace}/{name}"));
        let result = serde_json::from_value(current.clone())?;
        inner.objects.insert(k, current);
        Ok(result)
    }

    async fn delete_work_bundle(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let k = key("WorkBundle", namespace, name);
        if !inner.objects.contains_key(&k) {
            return Ok(());
        }
        inner.log.push(format!("delete WorkBundle {namespace}/{name}"));
        if inner.hold_bundle_deletion {
            if let Some(obj) = inner.objects.get_mut(&k) {
                obj["metadata"]["deletionTimestamp"] = json!("2024-01-01T00:00:00Z");
            }
        } else {
            inner.objects.remove(&k);
        }
        Ok(())
    }
}

/// Object metadata in a namespace
pub fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// An Opaque secret with string data
pub fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: meta(namespace, name),
        data: Some(
            data.iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        k8s_openapi::ByteString(v.as_bytes().to_vec()),
                    )
                })
                .collect(),
        ),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Namespace test requests live in
pub const NAMESPACE: &str = "team-a";

/// Managed cluster hosting test control planes
pub const HOSTING_CLUSTER: &str = "local-cluster";

/// Name of the provider secret test requests reference
pub const PROVIDER_SECRET: &str = "cloud-creds";

fn request(name: &str, configure: bool, platform: Platforms) -> DeploymentRequest {
    DeploymentRequest {
        metadata: meta(NAMESPACE, name),
        spec: DeploymentRequestSpec {
            infra_id: format!("{name}-abc12"),
            infrastructure: InfrastructureSpec {
                configure,
                platform: Some(platform),
                cloud_provider_secret_ref: Some(LocalObjectRef::new(PROVIDER_SECRET)),
            },
            hosting_cluster: HOSTING_CLUSTER.to_string(),
            hosting_namespace: "clusters".to_string(),
            ..Default::default()
        },
        status: None,
    }
}

/// An AWS request in us-east-1
pub fn aws_request(name: &str, configure: bool) -> DeploymentRequest {
    request(
        name,
        configure,
        Platforms {
            aws: Some(AwsPlacement {
                region: "us-east-1".to_string(),
                zones: vec![],
            }),
            azure: None,
        },
    )
}

/// An Azure request in eastus
pub fn azure_request(name: &str, configure: bool) -> DeploymentRequest {
    request(
        name,
        configure,
        Platforms {
            aws: None,
            azure: Some(AzurePlacement {
                location: "eastus".to_string(),
            }),
        },
    )
}

/// Provider secret holding AWS keys
pub fn aws_provider_secret() -> Secret {
    secret(
        NAMESPACE,
        PROVIDER_SECRET,
        &[
            ("aws_access_key_id", "AKIA"),
            ("aws_secret_access_key", "shh"),
            ("baseDomain", "example.com"),
            ("pullSecret", r#"{"auths":{}}"#),
        ],
    )
}

/// Provider secret holding an Azure service principal
pub fn azure_provider_secret() -> Secret {
    secret(
        NAMESPACE,
        PROVIDER_SECRET,
        &[
            (
                "osServicePrincipal.json",
                r#"{"subscriptionId":"sub-1","clientId":"client","clientSecret":"x","tenantId":"tenant"}"#,
            ),
            ("baseDomain", "example.com"),
            ("pullSecret", r#"{"auths":{}}"#),
        ],
    )
}

/// Parsed AWS provider secret
pub fn aws_provider() -> ProviderSecret {
    parse_provider_secret(&aws_provider_secret(), PlatformType::Aws).unwrap()
}

/// Parsed Azure provider secret
pub fn azure_provider() -> ProviderSecret {
    parse_provider_secret(&azure_provider_secret(), PlatformType::Azure).unwrap()
}

/// The well-known OIDC bucket config map
pub fn oidc_config_map() -> ConfigMap {
    ConfigMap {
        metadata: meta("kube-public", "oidc-storage-provider-s3-config"),
        data: Some(BTreeMap::from([
            ("name".to_string(), "oidc-bucket".to_string()),
            ("region".to_string(), "us-east-1".to_string()),
        ])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_patch_follows_rfc7386() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}, "list": [1, 2]});
        merge_patch(
            &mut target,
            &json!({"a": "z", "c": {"f": null}, "list": [3]}),
        );
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}, "list": [3]}));
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        let dr = DeploymentRequest {
            metadata: meta("ns", "demo"),
            spec: Default::default(),
            status: None,
        };
        store.insert_request(&dr);
        let stored = store.request("ns", "demo").unwrap();
        let rv = stored.resource_version().unwrap();

        store.touch_request("ns", "demo");
        let err = store
            .patch_deployment_request(
                "ns",
                "demo",
                &json!({"metadata": {"resourceVersion": rv}, "spec": {"infraID": "x"}}),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.patch_count(), 0);
    }

    #[tokio::test]
    async fn test_spec_patch_bumps_generation() {
        let store = MemoryStore::new();
        let dr = DeploymentRequest {
            metadata: meta("ns", "demo"),
            spec: Default::default(),
            status: None,
        };
        store.insert_request(&dr);
        let updated = store
            .patch_deployment_request("ns", "demo", &json!({"spec": {"infraID": "demo-1"}}))
            .await
            .unwrap();
        assert_eq!(updated.metadata.generation, Some(2));
        assert_eq!(updated.spec.infra_id, "demo-1");
    }
}
