//! hcp-deployer - reconciles DeploymentRequest resources into hosted control planes
//!
//! A `DeploymentRequest` describes a hosted control plane: where it runs, which
//! cloud platform backs it, and (optionally) the HostedCluster and NodePool
//! specs it should be created from. The controller provisions or adopts the
//! cloud infrastructure, synthesizes the child resources, ships them to the
//! hosting cluster inside a `WorkBundle`, and mirrors the remote status back
//! onto the request until it is deleted. Deletion unwinds everything in
//! dependency order: bundle first, infrastructure second, finalizer last.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (DeploymentRequest, WorkBundle, HostedCluster, NodePool)
//! - [`conditions`] - Change-detecting condition writes
//! - [`state`] - Lifecycle state derived from conditions
//! - [`store`] - Resource store abstraction over the Kubernetes API
//! - [`infra`] - Cloud infrastructure lifecycle (AWS, Azure)
//! - [`scaffold`] - Defaulting of HostedCluster and NodePool specs
//! - [`manifest`] - Bundle payload synthesis and reference resolution
//! - [`controller`] - Reconciliation entry points
//! - [`config`] - Controller configuration
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod conditions;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod infra;
pub mod manifest;
pub mod scaffold;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer owned by this controller; removed only after teardown completes
pub const DESTROY_FINALIZER: &str = "hcp.dev/destroy";

/// Finalizer owned by the managed-cluster controller
///
/// While present, teardown waits without requeueing. Its removal is an update
/// event on the watched request and re-triggers reconciliation.
pub const MANAGED_CLUSTER_CLEANUP_FINALIZER: &str = "hcp.dev/managedcluster-cleanup";

/// Label carrying the infra ID on the request and on generated secrets
pub const INFRA_ID_LABEL: &str = "hcp.dev/infra-id";

/// Annotation on a WorkBundle pointing back at its owning request (`<ns>/<name>`)
pub const DEPLOYMENT_REQUEST_ANNOTATION: &str = "hcp.dev/deployment-request";

/// Field manager used for all writes
pub const FIELD_MANAGER: &str = "hcp-deployer";

/// Namespace HostedCluster and NodePool objects land in when none is given
pub const DEFAULT_HOSTING_NAMESPACE: &str = "clusters";
