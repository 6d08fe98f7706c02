//! DeploymentRequest controller implementation
//!
//! Drives a request from first sight to a shipped WorkBundle, then back down
//! through teardown when it is deleted.
//!
//! Create path, in order:
//! 1. Resolve the cloud provider secret when one is required
//! 2. Assign the infra ID and persist it with the destroy finalizer
//! 3. Provision (or mark as not applicable) platform infrastructure and IAM
//! 4. Default the cluster spec and sync the WorkBundle
//!
//! Teardown waits for the managed-cluster finalizer, deletes the bundle and
//! waits for it to disappear, destroys infrastructure, then drops the
//! destroy finalizer.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::conditions::{set_if_changed, StatusPatch};
use crate::config::ControllerConfig;
use crate::crd::{
    reasons, ConditionStatus, ConditionType, DeploymentRequest, OverrideMode, PlatformType,
};
use crate::infra::{
    self, aws, azure, resolve_provider_secret, CommandProvisioner, InfraContext,
    InfraProvisioner, Outcome, ProviderSecret,
};
use crate::scaffold;
use crate::state::{derive_state, has_finalizer};
use crate::store::{persist_request, persist_spec, KubeResourceStore, ResourceStore};
use crate::{Error, DESTROY_FINALIZER, INFRA_ID_LABEL, MANAGED_CLUSTER_CLEANUP_FINALIZER};

use super::work::{delete_bundle, sync_bundle};

/// Delay before retrying after the provider secret could not be resolved
pub const PROVIDER_SECRET_RETRY: Duration = Duration::from_secs(30);

/// Delay applied by [`error_policy`]
pub const ERROR_RETRY: Duration = Duration::from_secs(30);

/// Controller context shared by every reconcile
pub struct Context {
    /// Object reads and writes (trait object for testability)
    pub store: Arc<dyn ResourceStore>,
    /// Cloud resource creation and destruction
    pub provisioner: Arc<dyn InfraProvisioner>,
    /// Controller settings
    pub config: ControllerConfig,
}

impl Context {
    /// Create a context backed by the API server and the provisioner CLI
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self {
            store: Arc::new(KubeResourceStore::new(client)),
            provisioner: Arc::new(CommandProvisioner::from_config(&config)),
            config,
        }
    }

    /// Create a context for testing with custom collaborators
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn ResourceStore>,
        provisioner: Arc<dyn InfraProvisioner>,
    ) -> Self {
        Self {
            store,
            provisioner,
            config: ControllerConfig::default(),
        }
    }

    fn infra(&self) -> InfraContext<'_> {
        InfraContext {
            store: self.store.as_ref(),
            provisioner: self.provisioner.as_ref(),
            config: &self.config,
        }
    }
}

/// Reconcile a DeploymentRequest
///
/// Optimistic-concurrency conflicts are not retried here. The write that
/// caused the conflict produces a watch event that triggers the next pass.
#[instrument(skip(dr, ctx), fields(deployment = %dr.key()))]
pub async fn reconcile(dr: Arc<DeploymentRequest>, ctx: Arc<Context>) -> Result<Action, Error> {
    match reconcile_request(&dr, &ctx).await {
        Err(e) if e.is_conflict() => {
            debug!("request changed underneath this reconcile, waiting for the next event");
            Ok(Action::await_change())
        }
        other => other,
    }
}

async fn reconcile_request(dr: &DeploymentRequest, ctx: &Context) -> Result<Action, Error> {
    let namespace = dr.namespace().unwrap_or_default();
    let name = dr.name_any();
    let store = ctx.store.as_ref();

    // Work from a fresh read so every patch carries a current resourceVersion
    let Some(mut dr) = store.get_deployment_request(&namespace, &name).await? else {
        debug!("request no longer exists");
        return Ok(Action::await_change());
    };
    debug!(state = %derive_state(&dr), "reconciling deployment request");

    if dr.metadata.deletion_timestamp.is_some() {
        return teardown(ctx, &mut dr).await;
    }

    // With configure set but no platform selected there is nothing to read
    // credentials for; that case stops at the PlatformConfigured check below.
    let provider = if dr.requires_provider_secret() && selected_platform(&dr).is_some() {
        match resolve_provider_secret(store, &dr).await {
            Ok(provider) => {
                set_if_changed(
                    store,
                    &mut dr,
                    ConditionType::ProviderSecretConfigured,
                    ConditionStatus::True,
                    reasons::CONFIGURED_AS_EXPECTED,
                    "",
                )
                .await?;
                Some(provider)
            }
            Err(e) => {
                warn!(error = %e, "cloud provider secret could not be resolved");
                set_if_changed(
                    store,
                    &mut dr,
                    ConditionType::ProviderSecretConfigured,
                    ConditionStatus::False,
                    reasons::MISCONFIGURED,
                    &e.to_string(),
                )
                .await?;
                return Ok(Action::requeue(PROVIDER_SECRET_RETRY));
            }
        }
    } else {
        None
    };

    ensure_tracked(store, &mut dr).await?;

    if dr.configures_infra() {
        let (Some(platform), Some(provider)) = (selected_platform(&dr), provider.as_ref()) else {
            set_if_changed(
                store,
                &mut dr,
                ConditionType::PlatformConfigured,
                ConditionStatus::False,
                reasons::MISSING_PARAMETER,
                "spec.infrastructure.platform must select aws or azure when configure is true",
            )
            .await?;
            return Ok(Action::await_change());
        };
        let outcome = match platform {
            PlatformType::Aws => aws::create(ctx.infra(), &mut dr, provider).await?,
            PlatformType::Azure => azure::create(ctx.infra(), &mut dr, provider).await?,
            PlatformType::None => Outcome::AwaitChange,
        };
        if !outcome.is_complete() {
            return Ok(to_action(outcome));
        }
    } else {
        let mut status = StatusPatch::new(&dr);
        status.set(
            ConditionType::PlatformConfigured,
            ConditionStatus::True,
            reasons::NOT_APPLICABLE,
            "",
        );
        status.set(
            ConditionType::PlatformIAMConfigured,
            ConditionStatus::True,
            reasons::NOT_APPLICABLE,
            "",
        );
        status.commit(store, &mut dr).await?;
        if let (Some(PlatformType::Azure), Some(provider)) = (selected_platform(&dr), &provider) {
            azure::ensure_adopted_credentials(ctx.infra(), &mut dr, provider).await?;
        }
    }

    if dr.has_override(OverrideMode::InfraOnly) {
        debug!("infra-only request, no bundle shipped");
        return Ok(Action::await_change());
    }

    let mut changed = scaffold::scaffold_hosted_cluster(&mut dr, &ctx.config);
    changed |= scaffold::scaffold_node_pools(&mut dr, &ctx.config);
    changed |= scaffold::apply_cluster_defaults(&mut dr);
    if changed {
        persist_spec(store, &mut dr).await?;
    }

    let outcome = sync_bundle(store, &mut dr).await?;
    Ok(to_action(outcome))
}

/// Platform selected by the request, if any
fn selected_platform(dr: &DeploymentRequest) -> Option<PlatformType> {
    dr.platform().filter(|p| *p != PlatformType::None)
}

fn to_action(outcome: Outcome) -> Action {
    match outcome {
        Outcome::Complete | Outcome::AwaitChange => Action::await_change(),
        Outcome::Requeue(delay) => Action::requeue(delay),
    }
}

/// `<name>-<5 lowercase alphanumerics>`
fn generate_infra_id(name: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{name}-{suffix}")
}

/// Persist the infra ID, its label and the destroy finalizer in one write
///
/// Runs before any side effect so a deleted request always has its
/// finalizer and infra ID available to teardown.
async fn ensure_tracked(store: &dyn ResourceStore, dr: &mut DeploymentRequest) -> Result<(), Error> {
    let assigned = dr.spec.infra_id.is_empty();
    if assigned {
        dr.spec.infra_id = generate_infra_id(&dr.name_any());
        info!(infra_id = %dr.spec.infra_id, "assigned infra ID");
    }

    let labeled = dr.labels().get(INFRA_ID_LABEL) == Some(&dr.spec.infra_id);
    if !assigned && labeled && has_finalizer(dr, DESTROY_FINALIZER) {
        return Ok(());
    }

    let mut finalizers = dr.finalizers().to_vec();
    if !finalizers.iter().any(|f| f == DESTROY_FINALIZER) {
        finalizers.push(DESTROY_FINALIZER.to_string());
    }
    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "labels": { INFRA_ID_LABEL: dr.spec.infra_id },
        },
        "spec": { "infraID": dr.spec.infra_id },
    });
    persist_request(store, dr, patch).await
}

async fn remove_destroy_finalizer(
    store: &dyn ResourceStore,
    dr: &mut DeploymentRequest,
) -> Result<(), Error> {
    let finalizers: Vec<String> = dr
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != DESTROY_FINALIZER)
        .cloned()
        .collect();
    persist_request(store, dr, json!({ "metadata": { "finalizers": finalizers } })).await
}

/// Unwind a deleted request in dependency order
async fn teardown(ctx: &Context, dr: &mut DeploymentRequest) -> Result<Action, Error> {
    let store = ctx.store.as_ref();
    if !has_finalizer(dr, DESTROY_FINALIZER) {
        debug!("destroy finalizer already removed");
        return Ok(Action::await_change());
    }

    // Removal of the cleanup finalizer is itself a watch event
    if has_finalizer(dr, MANAGED_CLUSTER_CLEANUP_FINALIZER) {
        info!("waiting for managed cluster cleanup");
        return Ok(Action::await_change());
    }

    if !dr.has_override(OverrideMode::InfraOnly) {
        let outcome = delete_bundle(store, dr).await?;
        if !outcome.is_complete() {
            return Ok(to_action(outcome));
        }
    }

    let platform = selected_platform(dr);
    if dr.configures_infra() && !dr.has_override(OverrideMode::Orphan) && platform.is_some() {
        let provider = match resolve_provider_secret(store, dr).await {
            Ok(provider) => provider,
            Err(e) => {
                warn!(error = %e, "cloud provider secret needed to destroy infrastructure");
                set_if_changed(
                    store,
                    dr,
                    ConditionType::ProviderSecretConfigured,
                    ConditionStatus::False,
                    reasons::MISCONFIGURED,
                    &e.to_string(),
                )
                .await?;
                return Ok(Action::requeue(PROVIDER_SECRET_RETRY));
            }
        };
        let outcome = destroy_platform(ctx, dr, platform, &provider).await?;
        if !outcome.is_complete() {
            return Ok(to_action(outcome));
        }
    } else {
        infra::delete_generated_secrets(store, dr).await?;
    }

    remove_destroy_finalizer(store, dr).await?;
    info!("teardown complete");
    Ok(Action::await_change())
}

async fn destroy_platform(
    ctx: &Context,
    dr: &mut DeploymentRequest,
    platform: Option<PlatformType>,
    provider: &ProviderSecret,
) -> Result<Outcome, Error> {
    match platform {
        Some(PlatformType::Aws) => aws::destroy(ctx.infra(), dr, provider).await,
        Some(PlatformType::Azure) => azure::destroy(ctx.infra(), dr, provider).await,
        _ => Ok(Outcome::Complete),
    }
}

/// Error policy for the controller
pub fn error_policy(dr: Arc<DeploymentRequest>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        deployment = %dr.key(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_RETRY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::BUNDLE_DELETE_RETRY;
    use crate::crd::{find_condition, is_condition_true, LocalObjectRef, PropagationPolicy};
    use crate::infra::{AwsIamOutput, AwsInfraOutput, AzureInfraOutput, MockInfraProvisioner};
    use crate::manifest::CLUSTER_NAME_MISMATCH;
    use crate::testing::{self, MemoryStore};

    const BUNDLE: &str = "team-a-demo";

    fn aws_infra_output() -> AwsInfraOutput {
        AwsInfraOutput {
            base_domain: "example.com".to_string(),
            public_zone_id: "Z1".to_string(),
            private_zone_id: "Z2".to_string(),
            vpc_id: "vpc-1".to_string(),
            compute_cidr: "10.0.0.0/16".to_string(),
            ..Default::default()
        }
    }

    fn aws_iam_output() -> AwsIamOutput {
        AwsIamOutput {
            issuer_url: "https://oidc-bucket.s3.us-east-1.amazonaws.com/demo-abc12".to_string(),
            kube_cloud_controller_role_arn: "arn:aws:iam::1:role/ctrl".to_string(),
            node_pool_management_role_arn: "arn:aws:iam::1:role/np".to_string(),
            control_plane_operator_role_arn: "arn:aws:iam::1:role/cpo".to_string(),
            roles: vec![],
        }
    }

    /// Provisioner that creates AWS infrastructure exactly once
    fn aws_provisioner() -> MockInfraProvisioner {
        let mut provisioner = MockInfraProvisioner::new();
        provisioner
            .expect_create_aws_infra()
            .times(1)
            .returning(|_| Ok(aws_infra_output()));
        provisioner
            .expect_create_aws_iam()
            .times(1)
            .returning(|_| Ok(aws_iam_output()));
        provisioner
    }

    fn context(store: &Arc<MemoryStore>, provisioner: MockInfraProvisioner) -> Arc<Context> {
        Arc::new(Context::for_testing(store.clone(), Arc::new(provisioner)))
    }

    async fn run(store: &MemoryStore, ctx: &Arc<Context>) -> Action {
        let dr = store
            .request(testing::NAMESPACE, "demo")
            .expect("request should exist");
        reconcile(Arc::new(dr), ctx.clone()).await.unwrap()
    }

    fn stored(store: &MemoryStore) -> DeploymentRequest {
        store.request(testing::NAMESPACE, "demo").unwrap()
    }

    fn shipped_kinds(store: &MemoryStore) -> Vec<String> {
        store
            .bundle(testing::HOSTING_CLUSTER, BUNDLE)
            .unwrap()
            .spec
            .workload
            .manifests
            .iter()
            .map(|m| m["kind"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Story: Adopted AWS infrastructure ships a HostedCluster and one NodePool
    #[tokio::test]
    async fn story_adopted_infra_ships_two_manifests() {
        let store = Arc::new(MemoryStore::new());
        store.insert_request(&testing::aws_request("demo", false));
        let ctx = context(&store, MockInfraProvisioner::new());

        let action = run(&store, &ctx).await;
        assert_eq!(action, Action::await_change());

        let dr = stored(&store);
        assert!(has_finalizer(&dr, DESTROY_FINALIZER));
        assert_eq!(
            dr.labels().get(INFRA_ID_LABEL).map(String::as_str),
            Some("demo-abc12")
        );
        let platform = find_condition(dr.conditions(), ConditionType::PlatformConfigured).unwrap();
        assert_eq!(platform.reason, reasons::NOT_APPLICABLE);
        assert!(is_condition_true(
            dr.conditions(),
            ConditionType::PlatformIAMConfigured
        ));
        assert!(is_condition_true(dr.conditions(), ConditionType::WorkConfigured));
        assert_eq!(shipped_kinds(&store), vec!["HostedCluster", "NodePool"]);
    }

    /// Story: A settled request costs no writes on the next pass
    ///
    /// The first pass persists the scaffolded spec, bumping the generation,
    /// so the second pass restamps local conditions. After that it is quiet.
    #[tokio::test]
    async fn story_settled_pass_is_quiet() {
        let store = Arc::new(MemoryStore::new());
        store.insert_request(&testing::aws_request("demo", false));
        let ctx = context(&store, MockInfraProvisioner::new());

        run(&store, &ctx).await;
        run(&store, &ctx).await;
        let patches = store.patch_count();
        let status_patches = store.status_patch_count();
        let bundle_patches = store.bundle_patch_count();

        run(&store, &ctx).await;
        assert_eq!(store.patch_count(), patches);
        assert_eq!(store.status_patch_count(), status_patches);
        assert_eq!(store.bundle_patch_count(), bundle_patches);
    }

    /// Story: Provisioned AWS infrastructure ships eight manifests
    #[tokio::test]
    async fn story_provisioned_aws_ships_eight_manifests() {
        let store = Arc::new(MemoryStore::new());
        store.insert_request(&testing::aws_request("demo", true));
        store.insert_secret(&testing::aws_provider_secret());
        store.insert_config_map(&testing::oidc_config_map());
        let ctx = context(&store, aws_provisioner());

        run(&store, &ctx).await;

        let dr = stored(&store);
        assert!(is_condition_true(
            dr.conditions(),
            ConditionType::ProviderSecretConfigured
        ));
        assert!(is_condition_true(dr.conditions(), ConditionType::PlatformConfigured));
        assert!(is_condition_true(
            dr.conditions(),
            ConditionType::PlatformIAMConfigured
        ));
        let kinds = shipped_kinds(&store);
        assert_eq!(kinds.len(), 8);
        assert_eq!(kinds[0], "Namespace");
        assert_eq!(kinds.iter().filter(|k| *k == "Secret").count(), 5);

        // Provisioner expectations are times(1); a second pass must not call it
        run(&store, &ctx).await;
    }

    #[tokio::test]
    async fn test_infra_id_generated_when_unset() {
        let store = Arc::new(MemoryStore::new());
        let mut request = testing::aws_request("demo", false);
        request.spec.infra_id.clear();
        store.insert_request(&request);
        let ctx = context(&store, MockInfraProvisioner::new());

        run(&store, &ctx).await;

        let dr = stored(&store);
        let infra_id = dr.spec.infra_id.clone();
        let suffix = infra_id.strip_prefix("demo-").unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(dr.labels().get(INFRA_ID_LABEL), Some(&infra_id));

        run(&store, &ctx).await;
        assert_eq!(stored(&store).spec.infra_id, infra_id);
    }

    /// Story: A missing provider secret blocks everything and retries
    #[tokio::test]
    async fn story_missing_provider_secret_requeues() {
        let store = Arc::new(MemoryStore::new());
        store.insert_request(&testing::aws_request("demo", true));
        let ctx = context(&store, MockInfraProvisioner::new());

        let action = run(&store, &ctx).await;
        assert_eq!(action, Action::requeue(PROVIDER_SECRET_RETRY));

        let dr = stored(&store);
        let secret =
            find_condition(dr.conditions(), ConditionType::ProviderSecretConfigured).unwrap();
        assert_eq!(secret.status, ConditionStatus::False);
        assert!(secret.message.contains("cloud-creds"));
        assert!(!has_finalizer(&dr, DESTROY_FINALIZER));
        assert!(store.bundle(testing::HOSTING_CLUSTER, BUNDLE).is_none());
    }

    #[tokio::test]
    async fn test_configure_without_platform_waits_for_edit() {
        let store = Arc::new(MemoryStore::new());
        let mut request = testing::aws_request("demo", true);
        request.spec.infrastructure.platform = None;
        store.insert_request(&request);
        let ctx = context(&store, MockInfraProvisioner::new());

        assert_eq!(run(&store, &ctx).await, Action::await_change());
        let dr = stored(&store);
        let platform = find_condition(dr.conditions(), ConditionType::PlatformConfigured).unwrap();
        assert_eq!(platform.status, ConditionStatus::False);
        assert_eq!(platform.reason, reasons::MISSING_PARAMETER);
        assert!(store.bundle(testing::HOSTING_CLUSTER, BUNDLE).is_none());
    }

    /// Story: A referenced NodePool that belongs to another cluster blocks shipping
    #[tokio::test]
    async fn story_referenced_pool_for_other_cluster_ships_nothing() {
        let store = Arc::new(MemoryStore::new());
        let mut dr = testing::aws_request("demo", false);
        dr.spec.node_pools_ref = vec![LocalObjectRef::new("workers")];
        store.insert_request(&dr);
        store.insert_raw(json!({
            "apiVersion": "hypershift.openshift.io/v1beta1",
            "kind": "NodePool",
            "metadata": {"name": "workers", "namespace": testing::NAMESPACE},
            "spec": {"clusterName": "someone-else", "platform": {"type": "AWS"}}
        }));
        let ctx = context(&store, MockInfraProvisioner::new());

        let action = run(&store, &ctx).await;
        assert_eq!(action, Action::await_change());

        let dr = stored(&store);
        let work = find_condition(dr.conditions(), ConditionType::WorkConfigured).unwrap();
        assert_eq!(work.status, ConditionStatus::False);
        assert_eq!(work.reason, reasons::INVALID_REFERENCE);
        assert_eq!(work.message, CLUSTER_NAME_MISMATCH);
        assert!(store.bundle(testing::HOSTING_CLUSTER, BUNDLE).is_none());
    }

    /// Story: Referenced objects reach the bundle with every field they were written with
    #[tokio::test]
    async fn story_referenced_objects_ship_verbatim() {
        let store = Arc::new(MemoryStore::new());
        let mut dr = testing::aws_request("demo", false);
        dr.spec.hosted_cluster_ref = Some(LocalObjectRef::new("existing"));
        dr.spec.node_pools_ref = vec![LocalObjectRef::new("workers")];
        store.insert_request(&dr);
        store.insert_raw(json!({
            "apiVersion": "hypershift.openshift.io/v1beta1",
            "kind": "HostedCluster",
            "metadata": {"name": "existing", "namespace": testing::NAMESPACE},
            "spec": {
                "release": {"image": "quay.io/x:1"},
                "platform": {"type": "AWS"},
                "pullSecret": {"name": "existing-pull"},
                "fips": true
            }
        }));
        store.insert_raw(json!({
            "apiVersion": "hypershift.openshift.io/v1beta1",
            "kind": "NodePool",
            "metadata": {"name": "workers", "namespace": testing::NAMESPACE},
            "spec": {
                "clusterName": "existing",
                "platform": {"type": "AWS"},
                "autoscaling": {"min": 1, "max": 3}
            }
        }));
        store.insert_secret(&testing::secret(
            testing::NAMESPACE,
            "existing-pull",
            &[(".dockerconfigjson", "{}")],
        ));
        let ctx = context(&store, MockInfraProvisioner::new());

        run(&store, &ctx).await;
        assert_eq!(
            shipped_kinds(&store),
            vec!["HostedCluster", "NodePool", "Secret"]
        );
        let manifests = store
            .bundle(testing::HOSTING_CLUSTER, BUNDLE)
            .unwrap()
            .spec
            .workload
            .manifests;
        assert_eq!(manifests[0]["spec"]["fips"], true);
        assert!(manifests[0]["spec"].get("dns").is_none());
        assert_eq!(manifests[1]["spec"]["autoscaling"]["max"], 3);
    }

    /// Story: Infra-only requests provision infrastructure and ship nothing
    #[tokio::test]
    async fn story_infra_only_ships_nothing() {
        let store = Arc::new(MemoryStore::new());
        let mut request = testing::aws_request("demo", true);
        request.spec.override_ = Some(OverrideMode::InfraOnly);
        store.insert_request(&request);
        store.insert_secret(&testing::aws_provider_secret());
        store.insert_config_map(&testing::oidc_config_map());
        let ctx = context(&store, aws_provisioner());

        run(&store, &ctx).await;
        assert!(is_condition_true(
            stored(&store).conditions(),
            ConditionType::PlatformIAMConfigured
        ));
        assert!(store.bundle(testing::HOSTING_CLUSTER, BUNDLE).is_none());
    }

    /// Story: Adopted Azure infrastructure still gets cloud credentials
    #[tokio::test]
    async fn story_adopted_azure_gets_credentials() {
        let store = Arc::new(MemoryStore::new());
        store.insert_request(&testing::azure_request("demo", false));
        store.insert_secret(&testing::azure_provider_secret());
        let ctx = context(&store, MockInfraProvisioner::new());

        run(&store, &ctx).await;

        assert!(store
            .secret(testing::NAMESPACE, "demo-cloud-credentials")
            .is_some());
        let dr = stored(&store);
        assert_eq!(
            dr.spec
                .hosted_cluster_spec
                .as_ref()
                .and_then(|s| s.platform.azure.as_ref())
                .map(|a| a.subscription_id.as_str()),
            Some("sub-1")
        );
    }

    /// Story: Infrastructure is destroyed only after the bundle is gone
    #[tokio::test]
    async fn story_teardown_deletes_bundle_before_infra() {
        let store = Arc::new(MemoryStore::new());
        store.insert_request(&testing::aws_request("demo", true));
        store.insert_secret(&testing::aws_provider_secret());
        store.insert_config_map(&testing::oidc_config_map());

        let mut provisioner = aws_provisioner();
        let observer = store.clone();
        provisioner
            .expect_destroy_aws_infra()
            .times(1)
            .returning(move |_| {
                assert!(
                    observer.bundle(testing::HOSTING_CLUSTER, BUNDLE).is_none(),
                    "infrastructure destroyed while the bundle still exists"
                );
                Ok(())
            });
        provisioner
            .expect_destroy_aws_iam()
            .times(1)
            .returning(|_| Ok(()));
        let ctx = context(&store, provisioner);

        run(&store, &ctx).await;
        store.hold_bundle_deletion(true);
        store.mark_deleting(testing::NAMESPACE, "demo");

        let action = run(&store, &ctx).await;
        assert_eq!(action, Action::requeue(BUNDLE_DELETE_RETRY));
        assert!(has_finalizer(&stored(&store), DESTROY_FINALIZER));

        store.release_bundle(testing::HOSTING_CLUSTER, BUNDLE);
        assert_eq!(run(&store, &ctx).await, Action::await_change());

        assert!(store.request(testing::NAMESPACE, "demo").is_none());
        assert!(store.secret(testing::NAMESPACE, "demo-pull-secret").is_none());
        let log = store.log();
        let bundle_delete = log
            .iter()
            .position(|l| l.starts_with("delete WorkBundle"))
            .unwrap();
        let removed = log
            .iter()
            .position(|l| l.starts_with("remove DeploymentRequest"))
            .unwrap();
        assert!(bundle_delete < removed);
    }

    /// Story: Teardown waits on the managed-cluster finalizer without polling
    #[tokio::test]
    async fn story_teardown_waits_for_cleanup_finalizer() {
        let store = Arc::new(MemoryStore::new());
        store.insert_request(&testing::aws_request("demo", false));
        let ctx = context(&store, MockInfraProvisioner::new());
        run(&store, &ctx).await;

        let dr = stored(&store);
        let mut finalizers = dr.finalizers().to_vec();
        finalizers.push(MANAGED_CLUSTER_CLEANUP_FINALIZER.to_string());
        store
            .patch_deployment_request(
                testing::NAMESPACE,
                "demo",
                &json!({"metadata": {"finalizers": finalizers}}),
            )
            .await
            .unwrap();
        store.mark_deleting(testing::NAMESPACE, "demo");

        assert_eq!(run(&store, &ctx).await, Action::await_change());
        assert!(store.bundle(testing::HOSTING_CLUSTER, BUNDLE).is_some());
        assert!(!store
            .log()
            .iter()
            .any(|l| l.starts_with("delete WorkBundle")));
    }

    /// Story: Orphaned teardown leaves remote children and cloud resources
    #[tokio::test]
    async fn story_orphan_skips_infra_destroy() {
        let store = Arc::new(MemoryStore::new());
        let mut request = testing::aws_request("demo", true);
        request.spec.override_ = Some(OverrideMode::Orphan);
        store.insert_request(&request);
        store.insert_secret(&testing::aws_provider_secret());
        store.insert_config_map(&testing::oidc_config_map());
        // No destroy expectations: any destroy call panics
        let ctx = context(&store, aws_provisioner());

        run(&store, &ctx).await;
        assert_eq!(
            store
                .bundle(testing::HOSTING_CLUSTER, BUNDLE)
                .unwrap()
                .propagation_policy(),
            PropagationPolicy::Orphan
        );

        store.mark_deleting(testing::NAMESPACE, "demo");
        assert_eq!(
            run(&store, &ctx).await,
            Action::requeue(BUNDLE_DELETE_RETRY)
        );
        assert_eq!(run(&store, &ctx).await, Action::await_change());
        assert!(store.request(testing::NAMESPACE, "demo").is_none());
    }

    #[tokio::test]
    async fn test_infra_destroy_failure_keeps_finalizer() {
        let store = Arc::new(MemoryStore::new());
        let mut request = testing::azure_request("demo", true);
        request.spec.override_ = Some(OverrideMode::InfraOnly);
        store.insert_request(&request);
        store.insert_secret(&testing::azure_provider_secret());

        let mut provisioner = MockInfraProvisioner::new();
        provisioner
            .expect_create_azure_infra()
            .times(1)
            .returning(|_| {
                Ok(AzureInfraOutput {
                    base_domain: "example.com".to_string(),
                    location: "eastus".to_string(),
                    ..Default::default()
                })
            });
        provisioner
            .expect_destroy_azure_infra()
            .returning(|_| Err(Error::provisioner("azure", "destroy-infra", "locked")));
        let ctx = context(&store, provisioner);

        run(&store, &ctx).await;
        store.mark_deleting(testing::NAMESPACE, "demo");

        assert_eq!(run(&store, &ctx).await, Action::requeue(infra::DESTROY_RETRY));
        let dr = stored(&store);
        assert!(has_finalizer(&dr, DESTROY_FINALIZER));
        assert_eq!(
            dr.status.as_ref().and_then(|s| s.phase.as_deref()),
            Some("Deleting")
        );
    }

    #[tokio::test]
    async fn test_missing_request_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(&store, MockInfraProvisioner::new());
        let dr = testing::aws_request("demo", false);
        let action = reconcile(Arc::new(dr), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(store.log().is_empty());
    }

    #[test]
    fn test_error_policy_requeues() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(&store, MockInfraProvisioner::new());
        let action = error_policy(
            Arc::new(testing::aws_request("demo", false)),
            &Error::internal("boom"),
            ctx,
        );
        assert_eq!(action, Action::requeue(ERROR_RETRY));
    }
}
