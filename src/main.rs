//! hcp-deployer - provisions hosted control planes from DeploymentRequest resources

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::controller::Config as ControllerSettings;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hcp_deployer::config::ControllerConfig;
use hcp_deployer::controller::{error_policy, owning_request, reconcile, Context};
use hcp_deployer::crd::{DeploymentRequest, WorkBundle};
use hcp_deployer::FIELD_MANAGER;

/// hcp-deployer - reconciles DeploymentRequests into hosted control planes
#[derive(Parser, Debug)]
#[command(name = "hcp-deployer", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Emit logs as JSON
    #[arg(long, env = "HCP_LOG_JSON")]
    log_json: bool,

    #[command(flatten)]
    config: ControllerConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default mode)
    ///
    /// Watches DeploymentRequests, and the WorkBundles they own, across all
    /// namespaces.
    Controller,
}

fn init_tracing(json: bool) {
    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("failed to install the aws-lc-rs crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if cli.crd {
        let request = serde_yaml::to_string(&DeploymentRequest::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        let bundle = serde_yaml::to_string(&WorkBundle::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{request}---\n{bundle}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

/// Install the DeploymentRequest CRD with server-side apply
///
/// The WorkBundle CRD belongs to the work distribution layer and is only
/// printed by `--crd`.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crd = DeploymentRequest::crd();
    let name = crd.metadata.name.clone().unwrap_or_default();
    tracing::info!(crd = %name, "installing CRD");
    crds.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&crd),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install DeploymentRequest CRD: {}", e))?;
    Ok(())
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let requests: Api<DeploymentRequest> = Api::all(client.clone());
    let bundles: Api<WorkBundle> = Api::all(client.clone());
    let ctx = Arc::new(Context::new(client, config));

    tracing::info!("starting DeploymentRequest controller");
    Controller::new(requests, WatcherConfig::default())
        .watches(bundles, WatcherConfig::default(), |bundle| {
            owning_request(&bundle)
        })
        .with_config(ControllerSettings::default().concurrency(1))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("hcp-deployer shutting down");
    Ok(())
}
