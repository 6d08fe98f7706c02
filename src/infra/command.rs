//! InfraProvisioner backed by the hosted control plane CLI
//!
//! Each operation runs `<bin> create|destroy infra|iam aws|azure ...` as a
//! child process. Cloud credentials are written to a private temp file for
//! the duration of the call, and create operations read their result from an
//! `--output-file` the CLI writes as JSON.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{info, warn};

use super::secrets::aws_credentials_file;
use super::{
    AwsCredentials, AwsIamOutput, AwsInfraOutput, AzureCredentials, AzureInfraOutput,
    CreateAwsIamRequest, CreateAwsInfraRequest, CreateAzureInfraRequest, DestroyAwsIamRequest,
    DestroyAwsInfraRequest, DestroyAzureInfraRequest, InfraProvisioner,
};
use crate::config::ControllerConfig;
use crate::Error;

/// Runs the provisioner CLI for every infrastructure operation
#[derive(Clone, Debug)]
pub struct CommandProvisioner {
    binary: String,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl CommandProvisioner {
    /// Provisioner invoking `binary` with the given per-call timeout
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            leading_args: Vec::new(),
            timeout,
        }
    }

    /// Provisioner configured from controller settings
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(&config.provisioner_binary, config.provisioner_timeout())
            .with_leading_args(config.provisioner_args.iter().cloned())
    }

    /// Arguments placed before every subcommand (e.g. a wrapper script path)
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    async fn run(&self, platform: &str, operation: &str, args: &[String]) -> Result<(), Error> {
        let description = format!("{} {}", self.binary, args[..args.len().min(3)].join(" "));
        info!(%platform, %operation, "running {}", description);

        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.leading_args).args(args).kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!("{} timed out after {:?}", description, self.timeout);
                Error::provisioner(
                    platform,
                    operation,
                    format!("timed out after {:?}", self.timeout),
                )
            })?
            .map_err(|e| {
                warn!("{} spawn failed: {}", description, e);
                Error::provisioner(platform, operation, format!("failed to execute: {e}"))
            })?;

        if output.status.success() {
            info!(%platform, %operation, "provisioner succeeded");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(%platform, %operation, "provisioner failed: {}", stderr);
            let message = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            };
            Err(Error::provisioner(platform, operation, message))
        }
    }

    async fn run_with_output<T: DeserializeOwned>(
        &self,
        platform: &str,
        operation: &str,
        mut args: Vec<String>,
    ) -> Result<T, Error> {
        let output_file = temp_file(platform, operation)?;
        args.push("--output-file".to_string());
        args.push(path_arg(output_file.path()));
        self.run(platform, operation, &args).await?;

        let raw = tokio::fs::read(output_file.path()).await.map_err(|e| {
            Error::provisioner(platform, operation, format!("reading output: {e}"))
        })?;
        serde_json::from_slice(&raw).map_err(|e| {
            Error::provisioner(platform, operation, format!("parsing output: {e}"))
        })
    }
}

fn temp_file(platform: &str, operation: &str) -> Result<NamedTempFile, Error> {
    tempfile::Builder::new()
        .prefix("hcp-")
        .tempfile()
        .map_err(|e| Error::provisioner(platform, operation, format!("temp file: {e}")))
}

/// Write credentials to a temp file readable only by this process
fn credentials_file(platform: &str, operation: &str, contents: &str) -> Result<NamedTempFile, Error> {
    let mut file = temp_file(platform, operation)?;
    file.write_all(contents.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| Error::provisioner(platform, operation, format!("writing credentials: {e}")))?;
    Ok(file)
}

fn aws_credentials(operation: &str, creds: &AwsCredentials) -> Result<NamedTempFile, Error> {
    credentials_file("aws", operation, &aws_credentials_file(creds))
}

fn azure_credentials(operation: &str, creds: &AzureCredentials) -> Result<NamedTempFile, Error> {
    let json = serde_json::to_string(creds)?;
    credentials_file("azure", operation, &json)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn flag(args: &mut Vec<String>, name: &str, value: &str) {
    if !value.is_empty() {
        args.push(format!("--{name}"));
        args.push(value.to_string());
    }
}

pub(crate) fn create_aws_infra_args(req: &CreateAwsInfraRequest, creds: &Path) -> Vec<String> {
    let mut args = vec!["create".into(), "infra".into(), "aws".into()];
    flag(&mut args, "name", &req.name);
    flag(&mut args, "infra-id", &req.infra_id);
    flag(&mut args, "region", &req.region);
    flag(&mut args, "base-domain", &req.base_domain);
    flag(&mut args, "aws-creds", &path_arg(creds));
    flag(&mut args, "zones", &req.zones.join(","));
    args
}

pub(crate) fn create_aws_iam_args(req: &CreateAwsIamRequest, creds: &Path) -> Vec<String> {
    let mut args = vec!["create".into(), "iam".into(), "aws".into()];
    flag(&mut args, "infra-id", &req.infra_id);
    flag(&mut args, "aws-creds", &path_arg(creds));
    flag(&mut args, "oidc-storage-provider-s3-bucket-name", &req.oidc_bucket_name);
    flag(&mut args, "oidc-storage-provider-s3-region", &req.oidc_bucket_region);
    flag(&mut args, "region", &req.region);
    flag(&mut args, "public-zone-id", &req.public_zone_id);
    flag(&mut args, "private-zone-id", &req.private_zone_id);
    flag(&mut args, "local-zone-id", &req.local_zone_id);
    args
}

pub(crate) fn destroy_aws_infra_args(req: &DestroyAwsInfraRequest, creds: &Path) -> Vec<String> {
    let mut args = vec!["destroy".into(), "infra".into(), "aws".into()];
    flag(&mut args, "name", &req.name);
    flag(&mut args, "infra-id", &req.infra_id);
    flag(&mut args, "aws-creds", &path_arg(creds));
    flag(&mut args, "base-domain", &req.base_domain);
    flag(&mut args, "region", &req.region);
    args
}

pub(crate) fn destroy_aws_iam_args(req: &DestroyAwsIamRequest, creds: &Path) -> Vec<String> {
    let mut args = vec!["destroy".into(), "iam".into(), "aws".into()];
    flag(&mut args, "infra-id", &req.infra_id);
    flag(&mut args, "aws-creds", &path_arg(creds));
    flag(&mut args, "region", &req.region);
    args
}

pub(crate) fn create_azure_infra_args(req: &CreateAzureInfraRequest, creds: &Path) -> Vec<String> {
    let mut args = vec!["create".into(), "infra".into(), "azure".into()];
    flag(&mut args, "name", &req.name);
    flag(&mut args, "infra-id", &req.infra_id);
    flag(&mut args, "azure-creds", &path_arg(creds));
    flag(&mut args, "location", &req.location);
    flag(&mut args, "base-domain", &req.base_domain);
    args
}

pub(crate) fn destroy_azure_infra_args(
    req: &DestroyAzureInfraRequest,
    creds: &Path,
) -> Vec<String> {
    let mut args = vec!["destroy".into(), "infra".into(), "azure".into()];
    flag(&mut args, "name", &req.name);
    flag(&mut args, "infra-id", &req.infra_id);
    flag(&mut args, "azure-creds", &path_arg(creds));
    flag(&mut args, "location", &req.location);
    args
}

#[async_trait]
impl InfraProvisioner for CommandProvisioner {
    async fn create_aws_infra(
        &self,
        request: &CreateAwsInfraRequest,
    ) -> Result<AwsInfraOutput, Error> {
        let creds = aws_credentials("create-infra", &request.credentials)?;
        let args = create_aws_infra_args(request, creds.path());
        self.run_with_output("aws", "create-infra", args).await
    }

    async fn create_aws_iam(&self, request: &CreateAwsIamRequest) -> Result<AwsIamOutput, Error> {
        let creds = aws_credentials("create-iam", &request.credentials)?;
        let args = create_aws_iam_args(request, creds.path());
        self.run_with_output("aws", "create-iam", args).await
    }

    async fn destroy_aws_infra(&self, request: &DestroyAwsInfraRequest) -> Result<(), Error> {
        let creds = aws_credentials("destroy-infra", &request.credentials)?;
        let args = destroy_aws_infra_args(request, creds.path());
        self.run("aws", "destroy-infra", &args).await
    }

    async fn destroy_aws_iam(&self, request: &DestroyAwsIamRequest) -> Result<(), Error> {
        let creds = aws_credentials("destroy-iam", &request.credentials)?;
        let args = destroy_aws_iam_args(request, creds.path());
        self.run("aws", "destroy-iam", &args).await
    }

    async fn create_azure_infra(
        &self,
        request: &CreateAzureInfraRequest,
    ) -> Result<AzureInfraOutput, Error> {
        let creds = azure_credentials("create-infra", &request.credentials)?;
        let args = create_azure_infra_args(request, creds.path());
        self.run_with_output("azure", "create-infra", args).await
    }

    async fn destroy_azure_infra(&self, request: &DestroyAzureInfraRequest) -> Result<(), Error> {
        let creds = azure_credentials("destroy-infra", &request.credentials)?;
        let args = destroy_azure_infra_args(request, creds.path());
        self.run("azure", "destroy-infra", &args).await
    }
}
