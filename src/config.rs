//! Controller configuration
//!
//! Every setting is a command-line flag with an environment fallback so the
//! controller can be configured from a Deployment manifest without a config
//! file.

use std::time::Duration;

use clap::Args;

/// Settings shared by every reconcile
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Hosted control plane CLI used to create and destroy infrastructure
    #[arg(long, env = "HCP_PROVISIONER_BINARY", default_value = "hypershift")]
    pub provisioner_binary: String,

    /// Arguments placed before every provisioner subcommand, for wrappers
    /// such as `podman run ... hypershift`
    #[arg(long = "provisioner-arg", env = "HCP_PROVISIONER_ARGS", value_delimiter = ' ')]
    pub provisioner_args: Vec<String>,

    /// Release image used when a HostedCluster or NodePool names none
    #[arg(
        long,
        env = "HCP_DEFAULT_RELEASE_IMAGE",
        default_value = "quay.io/openshift-release-dev/ocp-release:4.14.0-x86_64"
    )]
    pub default_release_image: String,

    /// Namespace of the config map locating the OIDC bucket
    #[arg(long, env = "HCP_OIDC_CONFIG_MAP_NAMESPACE", default_value = "kube-public")]
    pub oidc_config_map_namespace: String,

    /// Name of the config map locating the OIDC bucket
    #[arg(
        long,
        env = "HCP_OIDC_CONFIG_MAP_NAME",
        default_value = "oidc-storage-provider-s3-config"
    )]
    pub oidc_config_map_name: String,

    /// Secret in the hosting cluster namespace locating the OIDC bucket
    /// when manifests are configured out of band
    #[arg(
        long,
        env = "HCP_OIDC_SECRET_NAME",
        default_value = "hypershift-operator-oidc-provider-s3-credentials"
    )]
    pub oidc_secret_name: String,

    /// Upper bound on a single provisioner invocation
    #[arg(long, env = "HCP_PROVISIONER_TIMEOUT_SECS", default_value = "1800")]
    pub provisioner_timeout_secs: u64,
}

impl ControllerConfig {
    /// Provisioner timeout as a Duration
    pub fn provisioner_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioner_timeout_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            provisioner_binary: "hypershift".to_string(),
            provisioner_args: Vec::new(),
            default_release_image: "quay.io/openshift-release-dev/ocp-release:4.14.0-x86_64"
                .to_string(),
            oidc_config_map_namespace: "kube-public".to_string(),
            oidc_config_map_name: "oidc-storage-provider-s3-config".to_string(),
            oidc_secret_name: "hypershift-operator-oidc-provider-s3-credentials".to_string(),
            provisioner_timeout_secs: 1800,
        }
    }
}
