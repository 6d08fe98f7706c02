//! Manifest synthesis
//!
//! Builds the WorkBundle payload for a request, in a fixed order:
//!
//! 1. the hosting namespace (when this controller owns it)
//! 2. the HostedCluster
//! 3. the NodePools
//! 4. every secret and config map the HostedCluster references
//!
//! The HostedCluster and NodePools each come from one [`Source`]: an inline
//! spec carried by the request, or a reference to an object in the request
//! namespace. Referenced objects are cross-validated against each other
//! before anything is emitted, then shipped as stored with only their
//! metadata moved to the hosting namespace. The payload is computed fresh on
//! every call.

pub mod resolver;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::DynamicObject;
use kube::core::{ObjectMeta, TypeMeta};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::crd::{
    DeploymentRequest, HostedCluster, HostedClusterSpec, NodePool, NodePoolSpec, OverrideMode,
    WorkBundle,
};
use crate::store::ResourceStore;
use crate::{Error, INFRA_ID_LABEL};

pub use resolver::{ConfigRef, Generator, RefKind, ResolveContext, ResolveStrategy, Resolver};

/// Message for a NodePool whose clusterName does not name the HostedCluster
pub const CLUSTER_NAME_MISMATCH: &str = "incorrect Spec.ClusterName in NodePool";

/// Message for a NodePool on a different platform than its HostedCluster
pub const PLATFORM_MISMATCH: &str = "Platform.Type value mismatch";

/// Where an object's desired state comes from
#[derive(Clone, Debug, PartialEq)]
pub enum Source<T> {
    /// Spec carried on the request
    Inline {
        /// Object name
        name: String,
        /// Desired spec
        spec: T,
    },
    /// Pre-existing object in the request namespace
    Reference(String),
}

/// HostedCluster source of a request; a reference wins over an inline spec
pub fn hosted_cluster_source(dr: &DeploymentRequest) -> Result<Source<HostedClusterSpec>, Error> {
    if let Some(r) = dr.spec.hosted_cluster_ref.as_ref().filter(|r| !r.is_empty()) {
        return Ok(Source::Reference(r.name.clone()));
    }
    dr.spec
        .hosted_cluster_spec
        .clone()
        .map(|spec| Source::Inline {
            name: dr.hosted_cluster_name(),
            spec,
        })
        .ok_or_else(|| {
            Error::validation_for_field(
                "spec.hostedClusterSpec",
                "either hostedClusterSpec or hostedClusterRef is required",
            )
        })
}

/// NodePool sources of a request; references win over inline pools
pub fn node_pool_sources(dr: &DeploymentRequest) -> Vec<Source<NodePoolSpec>> {
    if !dr.spec.node_pools_ref.is_empty() {
        return dr
            .spec
            .node_pools_ref
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| Source::Reference(r.name.clone()))
            .collect();
    }
    dr.spec
        .node_pools
        .iter()
        .map(|p| Source::Inline {
            name: p.name.clone(),
            spec: p.spec.clone(),
        })
        .collect()
}

/// Object metadata for a shipped object
fn shipped_meta(dr: &DeploymentRequest, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(dr.hosting_namespace().to_string()),
        labels: Some([(INFRA_ID_LABEL.to_string(), dr.spec.infra_id.clone())].into()),
        ..Default::default()
    }
}

/// Metadata of a referenced object, moved to the hosting namespace
fn rehomed_meta(source: &ObjectMeta, dr: &DeploymentRequest) -> ObjectMeta {
    ObjectMeta {
        name: source.name.clone(),
        namespace: Some(dr.hosting_namespace().to_string()),
        labels: source.labels.clone(),
        annotations: source.annotations.clone(),
        ..Default::default()
    }
}

/// An object ready to ship, plus the typed view used to validate it
struct Loaded<K> {
    object: K,
    manifest: Value,
}

impl<K> Loaded<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    fn inline(object: K) -> Result<Self, Error> {
        let manifest = serde_json::to_value(&object)?;
        Ok(Self { object, manifest })
    }

    /// Ship `found` as stored, moved to the hosting namespace and without status
    fn referenced(found: DynamicObject, dr: &DeploymentRequest) -> Result<Self, Error> {
        let origin = format!(
            "{} {}/{}",
            K::kind(&()),
            found.namespace().unwrap_or_default(),
            found.name_any()
        );
        let rehomed = DynamicObject {
            types: Some(TypeMeta {
                api_version: K::api_version(&()).into_owned(),
                kind: K::kind(&()).into_owned(),
            }),
            metadata: rehomed_meta(&found.metadata, dr),
            data: found.data,
        };
        let mut manifest = serde_json::to_value(&rehomed)?;
        if let Some(fields) = manifest.as_object_mut() {
            fields.remove("status");
        }
        let object = serde_json::from_value(manifest.clone())
            .map_err(|e| Error::reference(format!("{origin} is malformed: {e}")))?;
        Ok(Self { object, manifest })
    }
}

/// Assembles WorkBundle manifests for requests
pub struct Synthesizer<'a> {
    store: &'a dyn ResourceStore,
    resolver: Resolver,
}

impl<'a> Synthesizer<'a> {
    /// Synthesizer with the standard resolution policy
    pub fn new(store: &'a dyn ResourceStore) -> Self {
        Self {
            store,
            resolver: Resolver::default(),
        }
    }

    async fn load_hosted_cluster(
        &self,
        dr: &DeploymentRequest,
        source: Source<HostedClusterSpec>,
    ) -> Result<Loaded<HostedCluster>, Error> {
        match source {
            Source::Inline { name, spec } => Loaded::inline(HostedCluster {
                metadata: shipped_meta(dr, &name),
                spec,
            }),
            Source::Reference(name) => {
                let namespace = dr.namespace().unwrap_or_default();
                let found = self
                    .store
                    .get_hosted_cluster(&namespace, &name)
                    .await?
                    .ok_or_else(|| {
                        Error::reference(format!("HostedCluster {namespace}/{name} not found"))
                    })?;
                Loaded::referenced(found, dr)
            }
        }
    }

    async fn load_node_pool(
        &self,
        dr: &DeploymentRequest,
        source: Source<NodePoolSpec>,
    ) -> Result<Loaded<NodePool>, Error> {
        match source {
            Source::Inline { name, spec } => Loaded::inline(NodePool {
                metadata: shipped_meta(dr, &name),
                spec,
            }),
            Source::Reference(name) => {
                let namespace = dr.namespace().unwrap_or_default();
                let found = self
                    .store
                    .get_node_pool(&namespace, &name)
                    .await?
                    .ok_or_else(|| {
                        Error::reference(format!("NodePool {namespace}/{name} not found"))
                    })?;
                Loaded::referenced(found, dr)
            }
        }
    }

    /// Build the full payload for `dr`
    ///
    /// `previous` is the bundle currently shipped, consulted when a
    /// referenced secret has disappeared from the request namespace.
    pub async fn synthesize(
        &self,
        dr: &DeploymentRequest,
        previous: Option<&WorkBundle>,
    ) -> Result<Vec<Value>, Error> {
        let hc_source = hosted_cluster_source(dr)?;
        let np_sources = node_pool_sources(dr);
        let any_reference = matches!(hc_source, Source::Reference(_))
            || np_sources.iter().any(|s| matches!(s, Source::Reference(_)));

        let hosted_cluster = self.load_hosted_cluster(dr, hc_source).await?;
        let mut node_pools = Vec::with_capacity(np_sources.len());
        let mut pool_manifests = Vec::with_capacity(np_sources.len());
        for source in np_sources {
            let pool = self.load_node_pool(dr, source).await?;
            node_pools.push(pool.object);
            pool_manifests.push(pool.manifest);
        }
        if any_reference {
            validate_node_pools(&hosted_cluster.object, &node_pools)?;
        }

        let mut manifests = Vec::new();
        if dr.configures_infra() || dr.has_override(OverrideMode::DeleteHostingNamespace) {
            let namespace = Namespace {
                metadata: ObjectMeta {
                    name: Some(dr.hosting_namespace().to_string()),
                    ..Default::default()
                },
                ..Default::default()
            };
            manifests.push(serde_json::to_value(namespace)?);
        }
        manifests.push(hosted_cluster.manifest);
        manifests.extend(pool_manifests);

        let references = config_references(&hosted_cluster.object.spec);
        let cx = ResolveContext {
            store: self.store,
            request: dr,
            previous,
        };
        manifests.extend(self.resolver.resolve_all(&cx, &references).await?);

        debug!(
            deployment = %dr.name_any(),
            manifests = manifests.len(),
            references = references.len(),
            "synthesized bundle payload"
        );
        Ok(manifests)
    }
}

/// Check every NodePool agrees with the HostedCluster it belongs to
pub fn validate_node_pools(hc: &HostedCluster, pools: &[NodePool]) -> Result<(), Error> {
    let cluster_name = hc.name_any();
    for pool in pools {
        if pool.spec.cluster_name != cluster_name {
            return Err(Error::reference(CLUSTER_NAME_MISMATCH));
        }
        if pool.spec.platform.type_ != hc.spec.platform_type() {
            return Err(Error::reference(PLATFORM_MISMATCH));
        }
    }
    Ok(())
}

/// Every secret and config map a HostedCluster spec points at, each once
pub fn config_references(spec: &HostedClusterSpec) -> Vec<ConfigRef> {
    let mut refs: Vec<ConfigRef> = Vec::new();
    let mut add = |reference: ConfigRef| {
        if reference.name.is_empty() {
            return;
        }
        match refs
            .iter_mut()
            .find(|r| r.kind == reference.kind && r.name == reference.name)
        {
            Some(existing) => {
                if existing.generator.is_none() {
                    existing.generator = reference.generator;
                }
            }
            None => refs.push(reference),
        }
    };

    add(ConfigRef::secret(&spec.pull_secret.name));
    if let Some(ssh) = &spec.ssh_key {
        add(ConfigRef::secret(&ssh.name));
    }
    if let Some(configuration) = &spec.configuration {
        for r in &configuration.secret_refs {
            add(ConfigRef::secret(&r.name));
        }
    }
    if let Some(encryption) = &spec.secret_encryption {
        if let Some(aescbc) = &encryption.aescbc {
            add(ConfigRef::secret(&aescbc.active_key.name).generated_by(Generator::EncryptionKey));
            if let Some(backup) = &aescbc.backup_key {
                add(ConfigRef::secret(&backup.name));
            }
        }
        if let Some(aws) = encryption.kms.as_ref().and_then(|k| k.aws.as_ref()) {
            add(ConfigRef::secret(&aws.auth.credentials.name));
        }
    }
    if let Some(key) = &spec.service_account_signing_key {
        add(ConfigRef::secret(&key.name));
    }
    if let Some(aws) = &spec.platform.aws {
        add(ConfigRef::secret(&aws.kube_cloud_controller_creds.name));
        add(ConfigRef::secret(&aws.node_pool_management_creds.name));
        add(ConfigRef::secret(&aws.control_plane_operator_creds.name));
    }
    if let Some(azure) = &spec.platform.azure {
        add(ConfigRef::secret(&azure.credentials.name));
    }

    if let Some(configuration) = &spec.configuration {
        for r in &configuration.config_map_refs {
            add(ConfigRef::config_map(&r.name));
        }
    }
    if let Some(bundle) = &spec.additional_trust_bundle {
        add(ConfigRef::config_map(&bundle.name));
    }

    refs
}
