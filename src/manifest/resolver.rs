//! Resolution of secrets and config maps referenced by a HostedCluster
//!
//! Each reference is offered to an ordered list of [`ResolveStrategy`]s. The
//! first strategy returning an object wins. A reference no strategy can
//! satisfy is recorded and the next reference is tried, so one pass reports
//! every unresolved reference at once.
//!
//! The standard order is:
//!
//! 1. copy from the request namespace
//! 2. reuse the object from the previous bundle revision, unchanged
//! 3. generate (secrets with a registered generator, `configure=true` only)

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::core::ObjectMeta;
use kube::ResourceExt;
use serde_json::Value;
use tracing::debug;

use crate::crd::{DeploymentRequest, WorkBundle};
use crate::infra::secrets;
use crate::store::ResourceStore;
use crate::Error;

/// Kind of a referenced configuration object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// core/v1 Secret
    Secret,
    /// core/v1 ConfigMap
    ConfigMap,
}

impl RefKind {
    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secret => "Secret",
            Self::ConfigMap => "ConfigMap",
        }
    }
}

/// Generator able to produce a missing object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Generator {
    /// Random AES-CBC etcd encryption key
    EncryptionKey,
}

/// A configuration object the HostedCluster points at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigRef {
    /// Object kind
    pub kind: RefKind,
    /// Object name
    pub name: String,
    /// Generator used when no existing object is found
    pub generator: Option<Generator>,
}

impl ConfigRef {
    /// Reference to a secret
    pub fn secret(name: impl Into<String>) -> Self {
        Self {
            kind: RefKind::Secret,
            name: name.into(),
            generator: None,
        }
    }

    /// Reference to a config map
    pub fn config_map(name: impl Into<String>) -> Self {
        Self {
            kind: RefKind::ConfigMap,
            name: name.into(),
            generator: None,
        }
    }

    /// Attach a generator
    pub fn generated_by(mut self, generator: Generator) -> Self {
        self.generator = Some(generator);
        self
    }
}

/// Everything a strategy may consult
pub struct ResolveContext<'a> {
    /// Object reads
    pub store: &'a dyn ResourceStore,
    /// Request being synthesized
    pub request: &'a DeploymentRequest,
    /// Bundle revision currently shipped, if any
    pub previous: Option<&'a WorkBundle>,
}

impl ResolveContext<'_> {
    fn source_namespace(&self) -> String {
        self.request.namespace().unwrap_or_default()
    }

    fn target_namespace(&self) -> &str {
        self.request.hosting_namespace()
    }
}

/// One tier of the resolution policy
#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Return the manifest for `reference`, or `None` to defer to the next tier
    ///
    /// An error ends resolution of this reference.
    async fn resolve(
        &self,
        cx: &ResolveContext<'_>,
        reference: &ConfigRef,
    ) -> Result<Option<Value>, Error>;
}

/// Metadata for a copy placed in the hosting namespace
///
/// Server-populated fields (uid, resourceVersion, owner references, managed
/// fields, timestamps) are dropped.
fn copied_meta(source: &ObjectMeta, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: source.name.clone(),
        namespace: Some(namespace.to_string()),
        labels: source.labels.clone(),
        annotations: source.annotations.as_ref().map(|a| {
            a.iter()
                .filter(|(k, _)| k.as_str() != "kubectl.kubernetes.io/last-applied-configuration")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }),
        ..Default::default()
    }
}

/// Copy from the request namespace into the hosting namespace
pub struct SourceNamespace;

#[async_trait]
impl ResolveStrategy for SourceNamespace {
    fn name(&self) -> &'static str {
        "source-namespace"
    }

    async fn resolve(
        &self,
        cx: &ResolveContext<'_>,
        reference: &ConfigRef,
    ) -> Result<Option<Value>, Error> {
        let namespace = cx.source_namespace();
        match reference.kind {
            RefKind::Secret => {
                let Some(secret) = cx.store.get_secret(&namespace, &reference.name).await? else {
                    return Ok(None);
                };
                let copy = Secret {
                    metadata: copied_meta(&secret.metadata, cx.target_namespace()),
                    type_: secret.type_,
                    data: secret.data,
                    string_data: secret.string_data,
                    immutable: secret.immutable,
                };
                Ok(Some(serde_json::to_value(copy)?))
            }
            RefKind::ConfigMap => {
                let Some(cm) = cx
                    .store
                    .get_config_map(&namespace, &reference.name)
                    .await?
                else {
                    return Ok(None);
                };
                let copy = ConfigMap {
                    metadata: copied_meta(&cm.metadata, cx.target_namespace()),
                    data: cm.data,
                    binary_data: cm.binary_data,
                    immutable: cm.immutable,
                };
                Ok(Some(serde_json::to_value(copy)?))
            }
        }
    }
}

/// Reuse the object already shipped in the previous bundle revision
pub struct PreviousBundle;

#[async_trait]
impl ResolveStrategy for PreviousBundle {
    fn name(&self) -> &'static str {
        "previous-bundle"
    }

    async fn resolve(
        &self,
        cx: &ResolveContext<'_>,
        reference: &ConfigRef,
    ) -> Result<Option<Value>, Error> {
        let Some(previous) = cx.previous else {
            return Ok(None);
        };
        Ok(previous
            .shipped(reference.kind.as_str(), &reference.name)
            .cloned())
    }
}

/// Generate a fresh object when this controller provisions the infrastructure
pub struct Generate;

#[async_trait]
impl ResolveStrategy for Generate {
    fn name(&self) -> &'static str {
        "generate"
    }

    async fn resolve(
        &self,
        cx: &ResolveContext<'_>,
        reference: &ConfigRef,
    ) -> Result<Option<Value>, Error> {
        if !cx.request.configures_infra() || reference.kind != RefKind::Secret {
            return Ok(None);
        }
        match reference.generator {
            Some(Generator::EncryptionKey) => {
                let secret = secrets::encryption_key(
                    cx.target_namespace(),
                    &reference.name,
                    &cx.request.spec.infra_id,
                );
                Ok(Some(serde_json::to_value(secret)?))
            }
            None => Ok(None),
        }
    }
}

/// Ordered resolution policy
pub struct Resolver {
    strategies: Vec<Box<dyn ResolveStrategy>>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(vec![
            Box::new(SourceNamespace),
            Box::new(PreviousBundle),
            Box::new(Generate),
        ])
    }
}

impl Resolver {
    /// Resolver trying `strategies` in order
    pub fn new(strategies: Vec<Box<dyn ResolveStrategy>>) -> Self {
        Self { strategies }
    }

    async fn resolve_one(
        &self,
        cx: &ResolveContext<'_>,
        reference: &ConfigRef,
    ) -> Result<Value, String> {
        for strategy in &self.strategies {
            match strategy.resolve(cx, reference).await {
                Ok(Some(manifest)) => {
                    debug!(
                        kind = reference.kind.as_str(),
                        name = %reference.name,
                        strategy = strategy.name(),
                        "resolved reference"
                    );
                    return Ok(manifest);
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(format!(
                        "{} {}: {e}",
                        reference.kind.as_str(),
                        reference.name
                    ))
                }
            }
        }
        Err(format!(
            "{} {} not found in namespace {} or the previous bundle",
            reference.kind.as_str(),
            reference.name,
            cx.source_namespace()
        ))
    }

    /// Resolve every reference, failing with all unresolved ones together
    pub async fn resolve_all(
        &self,
        cx: &ResolveContext<'_>,
        references: &[ConfigRef],
    ) -> Result<Vec<Value>, Error> {
        let mut manifests = Vec::with_capacity(references.len());
        let mut failures = Vec::new();
        for reference in references {
            match self.resolve_one(cx, reference).await {
                Ok(manifest) => manifests.push(manifest),
                Err(message) => failures.push(message),
            }
        }
        if failures.is_empty() {
            Ok(manifests)
        } else {
            Err(Error::synthesis(failures))
        }
    }
}
