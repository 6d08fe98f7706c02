//! Lifecycle state of a DeploymentRequest
//!
//! The state is never stored. It is derived from the request's conditions,
//! deletion timestamp and finalizers, so the persisted condition list stays
//! the single source of truth and the derivation can be tested on its own.

use kube::ResourceExt;

use crate::crd::{
    find_condition, is_condition_true, reasons, ConditionType, DeploymentRequest, OverrideMode,
};
use crate::{DESTROY_FINALIZER, MANAGED_CLUSTER_CLEANUP_FINALIZER};

/// Where a request is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing resolved yet
    Init,
    /// Provider secret parsed, no infrastructure attempted
    ProviderSecretResolved,
    /// Infrastructure or IAM creation attempted but not complete
    InfraProvisioning,
    /// Infrastructure ready (or adopted), bundle not yet written
    InfraReady,
    /// Bundle written for the current generation and the control plane is available
    ManifestShipped,
    /// Bundle out of date or the control plane is still rolling out
    Updating,
    /// Teardown in progress
    Deleting(TeardownStep),
}

/// Teardown steps, strictly ordered
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TeardownStep {
    /// Waiting for the managed-cluster controller to release its finalizer
    WaitManagedClusterCleanup,
    /// Deleting the bundle and waiting for remote children to disappear
    ManifestTeardown,
    /// Destroying cloud infrastructure
    InfraTeardown,
    /// Destroy finalizer removed
    Finalized,
}

impl LifecycleState {
    /// Value written to `status.phase`
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::ProviderSecretResolved => "ProviderSecretResolved",
            Self::InfraProvisioning => "InfraProvisioning",
            Self::InfraReady => "InfraReady",
            Self::ManifestShipped => "ManifestShipped",
            Self::Updating => "Updating",
            Self::Deleting(_) => "Deleting",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deleting(step) => write!(f, "Deleting/{step:?}"),
            other => f.write_str(other.phase()),
        }
    }
}

/// True when the request carries the named finalizer
pub fn has_finalizer(dr: &DeploymentRequest, finalizer: &str) -> bool {
    dr.finalizers().iter().any(|f| f == finalizer)
}

/// Derive the lifecycle state of a request
pub fn derive_state(dr: &DeploymentRequest) -> LifecycleState {
    let conditions = dr.conditions();

    if dr.metadata.deletion_timestamp.is_some() {
        let step = if !has_finalizer(dr, DESTROY_FINALIZER) {
            TeardownStep::Finalized
        } else if has_finalizer(dr, MANAGED_CLUSTER_CLEANUP_FINALIZER) {
            TeardownStep::WaitManagedClusterCleanup
        } else if !dr.has_override(OverrideMode::InfraOnly)
            && find_condition(conditions, ConditionType::WorkConfigured)
                .is_some_and(|c| c.reason != reasons::WORK_REMOVED)
        {
            TeardownStep::ManifestTeardown
        } else {
            TeardownStep::InfraTeardown
        };
        return LifecycleState::Deleting(step);
    }

    if dr.requires_provider_secret()
        && !is_condition_true(conditions, ConditionType::ProviderSecretConfigured)
    {
        return LifecycleState::Init;
    }

    if dr.configures_infra() {
        let platform = is_condition_true(conditions, ConditionType::PlatformConfigured);
        let iam = is_condition_true(conditions, ConditionType::PlatformIAMConfigured);
        if !(platform && iam) {
            let attempted = find_condition(conditions, ConditionType::PlatformConfigured)
                .is_some()
                || find_condition(conditions, ConditionType::PlatformIAMConfigured).is_some();
            return if attempted {
                LifecycleState::InfraProvisioning
            } else {
                LifecycleState::ProviderSecretResolved
            };
        }
    }

    let Some(work) = find_condition(conditions, ConditionType::WorkConfigured)
        .filter(|c| c.status == crate::crd::ConditionStatus::True)
    else {
        return LifecycleState::InfraReady;
    };

    let current = work.observed_generation == dr.metadata.generation;
    if current && is_condition_true(conditions, ConditionType::HostedClusterAvailable) {
        LifecycleState::ManifestShipped
    } else {
        LifecycleState::Updating
    }
}
