//! WorkBundle reconciliation
//!
//! Ships the synthesized payload to the hosting cluster's namespace, mirrors
//! what the remote agent reports back onto the request, and drives bundle
//! deletion during teardown.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::core::ObjectMeta;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::conditions::{set_if_changed, StatusPatch};
use crate::crd::{
    reasons, ConditionStatus, ConditionType, DeleteOption, DeploymentRequest, OverrideMode,
    PropagationPolicy, WorkBundle, WorkBundleSpec, Workload,
};
use crate::infra::Outcome;
use crate::manifest::Synthesizer;
use crate::store::ResourceStore;
use crate::{Error, DEPLOYMENT_REQUEST_ANNOTATION};

/// Delay between checks while a bundle is being deleted
pub const BUNDLE_DELETE_RETRY: Duration = Duration::from_secs(20);

/// Delay before retrying when referenced objects are missing
pub const MISSING_REFERENCE_RETRY: Duration = Duration::from_secs(60);

const HOSTED_CLUSTER_KIND: &str = "HostedCluster";
const NODE_POOL_KIND: &str = "NodePool";

/// Delete propagation the request asks for
pub fn propagation_policy(dr: &DeploymentRequest) -> PropagationPolicy {
    if dr.has_override(OverrideMode::Orphan) {
        PropagationPolicy::Orphan
    } else {
        PropagationPolicy::Foreground
    }
}

/// Request a bundle belongs to, read from its back-reference annotation
///
/// Maps bundle watch events onto the owning request. Bundles without the
/// annotation are not ours.
pub fn owning_request(bundle: &WorkBundle) -> Option<ObjectRef<DeploymentRequest>> {
    let key = bundle.annotations().get(DEPLOYMENT_REQUEST_ANNOTATION)?;
    let (namespace, name) = key.split_once('/')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some(ObjectRef::new(name).within(namespace))
}

fn desired_spec(dr: &DeploymentRequest, manifests: Vec<serde_json::Value>) -> WorkBundleSpec {
    WorkBundleSpec {
        workload: Workload { manifests },
        delete_option: Some(DeleteOption {
            propagation_policy: propagation_policy(dr),
        }),
    }
}

/// Create or update the bundle for `dr`, then mirror its status
pub async fn sync_bundle(
    store: &dyn ResourceStore,
    dr: &mut DeploymentRequest,
) -> Result<Outcome, Error> {
    let namespace = dr.work_bundle_namespace().to_string();
    let name = dr.work_bundle_name();
    if namespace.is_empty() {
        set_if_changed(
            store,
            dr,
            ConditionType::WorkConfigured,
            ConditionStatus::False,
            reasons::MISSING_PARAMETER,
            "spec.hostingCluster is required",
        )
        .await?;
        return Ok(Outcome::AwaitChange);
    }

    let previous = store.get_work_bundle(&namespace, &name).await?;
    if previous
        .as_ref()
        .is_some_and(|b| b.metadata.deletion_timestamp.is_some())
    {
        debug!(bundle = %name, "previous bundle still deleting");
        return Ok(Outcome::Requeue(BUNDLE_DELETE_RETRY));
    }

    let manifests = match Synthesizer::new(store)
        .synthesize(dr, previous.as_ref())
        .await
    {
        Ok(manifests) => manifests,
        Err(Error::Reference { message }) => {
            warn!(deployment = %dr.name_any(), %message, "invalid object reference");
            set_if_changed(
                store,
                dr,
                ConditionType::WorkConfigured,
                ConditionStatus::False,
                reasons::INVALID_REFERENCE,
                &message,
            )
            .await?;
            return Ok(Outcome::AwaitChange);
        }
        Err(e @ Error::Synthesis { .. }) => {
            warn!(deployment = %dr.name_any(), error = %e, "unresolved references");
            set_if_changed(
                store,
                dr,
                ConditionType::WorkConfigured,
                ConditionStatus::False,
                reasons::MISSING_REFERENCES,
                &e.to_string(),
            )
            .await?;
            return Ok(Outcome::Requeue(MISSING_REFERENCE_RETRY));
        }
        Err(Error::Validation { message, .. }) => {
            set_if_changed(
                store,
                dr,
                ConditionType::WorkConfigured,
                ConditionStatus::False,
                reasons::MISSING_PARAMETER,
                &message,
            )
            .await?;
            return Ok(Outcome::AwaitChange);
        }
        Err(e) => return Err(e),
    };

    let desired = desired_spec(dr, manifests);
    let bundle = match previous {
        None => {
            info!(bundle = %name, namespace = %namespace, "creating WorkBundle");
            let bundle = WorkBundle {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(namespace.clone()),
                    annotations: Some(BTreeMap::from([(
                        DEPLOYMENT_REQUEST_ANNOTATION.to_string(),
                        dr.key(),
                    )])),
                    ..Default::default()
                },
                spec: desired,
                status: None,
            };
            store.create_work_bundle(&bundle).await?
        }
        Some(current) if current.spec != desired => {
            info!(bundle = %name, "updating WorkBundle");
            let patch = json!({
                "metadata": {"annotations": {DEPLOYMENT_REQUEST_ANNOTATION: dr.key()}},
                "spec": desired,
            });
            store.patch_work_bundle(&namespace, &name, &patch).await?
        }
        Some(current) => current,
    };

    let mut status = StatusPatch::new(dr);
    status.set(
        ConditionType::WorkConfigured,
        ConditionStatus::True,
        reasons::CONFIGURED_AS_EXPECTED,
        "",
    );
    mirror_status(&mut status, &bundle);
    status.commit(store, dr).await?;
    Ok(Outcome::Complete)
}

/// Copy bundle conditions and HostedCluster/NodePool feedback into `status`
pub fn mirror_status(status: &mut StatusPatch, bundle: &WorkBundle) {
    let Some(bundle_status) = &bundle.status else {
        return;
    };
    for condition in &bundle_status.conditions {
        if let Some(kind) = ConditionType::from_work_condition(&condition.type_) {
            status.set(
                kind,
                ConditionStatus::parse(&condition.status),
                &condition.reason,
                &condition.message,
            );
        }
    }

    if let Some(hc) = bundle.feedback_for_kind(HOSTED_CLUSTER_KIND).next() {
        let feedback = &hc.status_feedback;
        if let Some(available) = feedback.get("Available-Status") {
            status.set(
                ConditionType::HostedClusterAvailable,
                ConditionStatus::parse(&available),
                &feedback.get("Available-Reason").unwrap_or_default(),
                &feedback.get("Available-Message").unwrap_or_default(),
            );
        }
        if let Some(progress) = feedback.get("Progress") {
            status.set(
                ConditionType::HostedClusterProgress,
                ConditionStatus::from_bool(progress == "Completed"),
                &progress,
                &feedback.get("Progressing-Message").unwrap_or_default(),
            );
        }
    }

    let mut pools = 0;
    let mut failing: Option<(ConditionStatus, String, String)> = None;
    for pool in bundle.feedback_for_kind(NODE_POOL_KIND) {
        let feedback = &pool.status_feedback;
        let Some(ready) = feedback.get("Ready-Status") else {
            continue;
        };
        pools += 1;
        let ready = ConditionStatus::parse(&ready);
        if ready != ConditionStatus::True {
            failing = Some((
                ready,
                feedback.get("Ready-Reason").unwrap_or_default(),
                feedback.get("Ready-Message").unwrap_or_default(),
            ));
        }
    }
    match failing {
        Some((ready, reason, message)) => {
            status.set(ConditionType::Nodepool, ready, &reason, &message);
        }
        None if pools > 0 => {
            status.set(
                ConditionType::Nodepool,
                ConditionStatus::True,
                reasons::ALL_NODEPOOLS_READY,
                "All nodepools are ready",
            );
        }
        None => {}
    }
}

/// Delete the bundle and report whether it is gone
///
/// Returns `Requeue` until the bundle (and with it the remote children) has
/// disappeared, so the caller never proceeds while it still exists.
pub async fn delete_bundle(
    store: &dyn ResourceStore,
    dr: &mut DeploymentRequest,
) -> Result<Outcome, Error> {
    let namespace = dr.work_bundle_namespace().to_string();
    let name = dr.work_bundle_name();
    let current = if namespace.is_empty() {
        None
    } else {
        store.get_work_bundle(&namespace, &name).await?
    };

    let Some(bundle) = current else {
        set_if_changed(
            store,
            dr,
            ConditionType::WorkConfigured,
            ConditionStatus::False,
            reasons::WORK_REMOVED,
            "WorkBundle removed",
        )
        .await?;
        return Ok(Outcome::Complete);
    };

    if bundle.metadata.deletion_timestamp.is_none() {
        let policy = propagation_policy(dr);
        if bundle.propagation_policy() != policy {
            let patch = json!({"spec": {"deleteOption": {"propagationPolicy": policy}}});
            store.patch_work_bundle(&namespace, &name, &patch).await?;
        }
        info!(bundle = %name, ?policy, "deleting WorkBundle");
        store.delete_work_bundle(&namespace, &name).await?;
        set_if_changed(
            store,
            dr,
            ConditionType::WorkConfigured,
            ConditionStatus::False,
            reasons::WORK_DELETING,
            "waiting for WorkBundle removal",
        )
        .await?;
    } else {
        debug!(bundle = %name, "waiting for WorkBundle removal");
    }
    Ok(Outcome::Requeue(BUNDLE_DELETE_RETRY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::crd::find_condition;
    use crate::scaffold;
    use crate::testing::{self, MemoryStore};

    fn stored(store: &MemoryStore, mut dr: DeploymentRequest) -> DeploymentRequest {
        let config = ControllerConfig::default();
        scaffold::scaffold_hosted_cluster(&mut dr, &config);
        scaffold::scaffold_node_pools(&mut dr, &config);
        store.insert_request(&dr);
        store.request(testing::NAMESPACE, &dr.name_any()).unwrap()
    }

    fn feedback(values: &[(&str, &str)]) -> serde_json::Value {
        json!({
            "values": values
                .iter()
                .map(|(k, v)| json!({"name": k, "fieldValue": {"type": "String", "string": v}}))
                .collect::<Vec<_>>()
        })
    }

    /// Story: First sight creates an annotated bundle; a settled request never re-patches it
    #[tokio::test]
    async fn story_create_then_leave_untouched() {
        let store = MemoryStore::new();
        let mut dr = stored(&store, testing::aws_request("demo", false));

        assert_eq!(sync_bundle(&store, &mut dr).await.unwrap(), Outcome::Complete);
        let bundle = store
            .bundle(testing::HOSTING_CLUSTER, "team-a-demo")
            .unwrap();
        assert_eq!(
            bundle.annotations().get(DEPLOYMENT_REQUEST_ANNOTATION).map(String::as_str),
            Some("team-a/demo")
        );
        assert_eq!(bundle.propagation_policy(), PropagationPolicy::Foreground);

        let status_patches = store.status_patch_count();
        assert_eq!(sync_bundle(&store, &mut dr).await.unwrap(), Outcome::Complete);
        assert_eq!(store.bundle_patch_count(), 0);
        assert_eq!(store.status_patch_count(), status_patches);
    }

    #[tokio::test]
    async fn test_orphan_override_sets_orphan_propagation() {
        let store = MemoryStore::new();
        let mut request = testing::aws_request("demo", false);
        request.spec.override_ = Some(OverrideMode::Orphan);
        let mut dr = stored(&store, request);

        sync_bundle(&store, &mut dr).await.unwrap();
        let bundle = store
            .bundle(testing::HOSTING_CLUSTER, "team-a-demo")
            .unwrap();
        assert_eq!(bundle.propagation_policy(), PropagationPolicy::Orphan);
    }

    /// Story: Remote status is mirrored, surfacing the last failing NodePool
    #[tokio::test]
    async fn story_status_is_mirrored() {
        let store = MemoryStore::new();
        let mut dr = stored(&store, testing::aws_request("demo", false));
        sync_bundle(&store, &mut dr).await.unwrap();

        store.set_bundle_status(
            testing::HOSTING_CLUSTER,
            "team-a-demo",
            json!({
                "conditions": [
                    {"type": "Applied", "status": "True", "reason": "AppliedManifestComplete", "message": "applied"},
                    {"type": "Ignored", "status": "True", "reason": "x", "message": ""}
                ],
                "resourceStatus": {"manifests": [
                    {
                        "resourceMeta": {"kind": "HostedCluster", "name": "demo"},
                        "statusFeedback": feedback(&[
                            ("Available-Status", "True"),
                            ("Available-Reason", "AsExpected"),
                            ("Available-Message", "The hosted control plane is available"),
                            ("Progress", "Partial"),
                            ("Progressing-Message", "rolling out"),
                        ])
                    },
                    {
                        "resourceMeta": {"kind": "NodePool", "name": "a"},
                        "statusFeedback": feedback(&[("Ready-Status", "False"), ("Ready-Reason", "WaitingForMachines"), ("Ready-Message", "0 of 2")])
                    },
                    {
                        "resourceMeta": {"kind": "NodePool", "name": "b"},
                        "statusFeedback": feedback(&[("Ready-Status", "False"), ("Ready-Reason", "InstanceTypeUnavailable"), ("Ready-Message", "no capacity")])
                    }
                ]}
            }),
        );
        sync_bundle(&store, &mut dr).await.unwrap();

        let applied = find_condition(dr.conditions(), ConditionType::WorkApplied).unwrap();
        assert_eq!(applied.status, ConditionStatus::True);
        assert!(applied.observed_generation.is_none());
        let available =
            find_condition(dr.conditions(), ConditionType::HostedClusterAvailable).unwrap();
        assert_eq!(available.reason, "AsExpected");
        let progress =
            find_condition(dr.conditions(), ConditionType::HostedClusterProgress).unwrap();
        assert_eq!(progress.status, ConditionStatus::False);
        assert_eq!(progress.reason, "Partial");
        let pools = find_condition(dr.conditions(), ConditionType::Nodepool).unwrap();
        assert_eq!(pools.status, ConditionStatus::False);
        assert_eq!(pools.reason, "InstanceTypeUnavailable");
    }

    #[test]
    fn test_owning_request_from_annotation() {
        let mut bundle = WorkBundle::new("team-a-demo", WorkBundleSpec::default());
        assert!(owning_request(&bundle).is_none());

        bundle.annotations_mut().insert(
            DEPLOYMENT_REQUEST_ANNOTATION.to_string(),
            "team-a/demo".to_string(),
        );
        let owner = owning_request(&bundle).unwrap();
        assert_eq!(owner.name, "demo");
        assert_eq!(owner.namespace.as_deref(), Some("team-a"));

        bundle.annotations_mut().insert(
            DEPLOYMENT_REQUEST_ANNOTATION.to_string(),
            "malformed".to_string(),
        );
        assert!(owning_request(&bundle).is_none());
    }

    #[test]
    fn test_all_ready_pools_aggregate_true() {
        let mut bundle = WorkBundle::new("b", WorkBundleSpec::default());
        bundle.status = serde_json::from_value(json!({
            "resourceStatus": {"manifests": [
                {"resourceMeta": {"kind": "NodePool", "name": "a"}, "statusFeedback": feedback(&[("Ready-Status", "True")])},
                {"resourceMeta": {"kind": "NodePool", "name": "b"}, "statusFeedback": feedback(&[("Ready-Status", "True")])}
            ]}
        }))
        .unwrap();
        let dr = testing::aws_request("demo", false);
        let mut status = StatusPatch::new(&dr);
        mirror_status(&mut status, &bundle);
        let pools = status
            .conditions()
            .iter()
            .find(|c| c.is(ConditionType::Nodepool))
            .unwrap();
        assert_eq!(pools.status, ConditionStatus::True);
        assert_eq!(pools.reason, reasons::ALL_NODEPOOLS_READY);
    }

    /// Story: Missing referenced secrets are reported and retried after a minute
    #[tokio::test]
    async fn story_missing_references_requeue() {
        let store = MemoryStore::new();
        let mut request = testing::aws_request("demo", false);
        scaffold::scaffold_hosted_cluster(&mut request, &ControllerConfig::default());
        if let Some(spec) = request.spec.hosted_cluster_spec.as_mut() {
            spec.pull_secret = crate::crd::LocalObjectRef::new("absent");
        }
        let mut dr = stored(&store, request);

        let outcome = sync_bundle(&store, &mut dr).await.unwrap();
        assert_eq!(outcome, Outcome::Requeue(MISSING_REFERENCE_RETRY));
        let work = find_condition(dr.conditions(), ConditionType::WorkConfigured).unwrap();
        assert_eq!(work.reason, reasons::MISSING_REFERENCES);
        assert!(work.message.contains("absent"));
        assert!(store
            .bundle(testing::HOSTING_CLUSTER, "team-a-demo")
            .is_none());
    }

    /// Story: Deletion keeps requeueing until the bundle is gone
    #[tokio::test]
    async fn story_delete_waits_for_bundle() {
        let store = MemoryStore::new();
        let mut dr = stored(&store, testing::aws_request("demo", false));
        sync_bundle(&store, &mut dr).await.unwrap();
        store.hold_bundle_deletion(true);

        assert_eq!(
            delete_bundle(&store, &mut dr).await.unwrap(),
            Outcome::Requeue(BUNDLE_DELETE_RETRY)
        );
        assert_eq!(
            delete_bundle(&store, &mut dr).await.unwrap(),
            Outcome::Requeue(BUNDLE_DELETE_RETRY)
        );

        store.release_bundle(testing::HOSTING_CLUSTER, "team-a-demo");
        assert_eq!(delete_bundle(&store, &mut dr).await.unwrap(), Outcome::Complete);
        let work = find_condition(dr.conditions(), ConditionType::WorkConfigured).unwrap();
        assert_eq!(work.reason, reasons::WORK_REMOVED);
        let deletes = store
            .log()
            .iter()
            .filter(|l| l.starts_with("delete WorkBundle"))
            .count();
        assert_eq!(deletes, 1);
    }
}
