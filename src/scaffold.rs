//! HostedCluster and NodePool spec defaulting
//!
//! Every function here fills only fields that are unset and reports whether
//! it changed anything, so callers persist only real changes and a value set
//! by the user (or by an earlier scaffold) is never overwritten. The one
//! exception is NodePool `clusterName`, which is always forced to the owning
//! HostedCluster's name.

use kube::ResourceExt;
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::crd::{
    AescbcSpec, AwsCloudProviderConfig, AwsNodePoolPlatform, AwsPlatformSpec,
    AwsResourceReference, AwsResourceTag, AwsRoleCredentials, AzureNodePoolPlatform,
    AzurePlatformSpec, DeploymentRequest, EtcdSpec, HostedClusterSpec, LocalObjectRef,
    ManagedEtcdSpec, ManagedEtcdStorage, NetworkEntry, NodePoolEntry, NodePoolManagement,
    NodePoolSpec, PersistentVolumeEtcdStorage, PlatformType, ReplaceUpgrade, RollingUpdate,
    SecretEncryptionSpec, ServicePublishingStrategy, ServicePublishingStrategyMapping,
};
use crate::infra::secrets;
use crate::infra::{AwsIamOutput, AwsInfraOutput, AzureInfraOutput};

/// Service network CIDR
pub const SERVICE_CIDR: &str = "172.31.0.0/16";
/// Pod network CIDR
pub const POD_CIDR: &str = "10.132.0.0/14";
/// Replicas in the default NodePool
pub const DEFAULT_NODE_POOL_REPLICAS: i32 = 2;
/// Availability policy for control-plane and infrastructure components
pub const DEFAULT_AVAILABILITY_POLICY: &str = "SingleReplica";
/// Managed etcd volume size
pub const DEFAULT_ETCD_SIZE: &str = "8Gi";
/// OLM catalog placement when none is set
pub const DEFAULT_OLM_PLACEMENT: &str = "management";
/// Worker instance type on AWS
pub const DEFAULT_AWS_INSTANCE_TYPE: &str = "t3.large";
/// Worker VM size on Azure
pub const DEFAULT_AZURE_VM_SIZE: &str = "Standard_D4s_v4";
/// Worker OS disk size on Azure
pub const DEFAULT_AZURE_DISK_SIZE_GB: i32 = 120;

/// Default publishing strategy per control-plane service
const SERVICE_PUBLISHING: [(&str, &str); 5] = [
    ("APIServer", "LoadBalancer"),
    ("OAuthServer", "Route"),
    ("Konnectivity", "Route"),
    ("Ignition", "Route"),
    ("OIDC", "S3"),
];

/// Fill an unset string; returns true when it was filled
fn fill(field: &mut String, value: &str) -> bool {
    if field.is_empty() && !value.is_empty() {
        *field = value.to_string();
        true
    } else {
        false
    }
}

/// Fill an unset optional string; returns true when it was filled
fn fill_opt(field: &mut Option<String>, value: &str) -> bool {
    if field.as_deref().map_or(true, str::is_empty) && !value.is_empty() {
        *field = Some(value.to_string());
        true
    } else {
        false
    }
}

/// Fill an empty object reference; returns true when it was filled
fn fill_ref(field: &mut LocalObjectRef, name: String) -> bool {
    if field.is_empty() {
        *field = LocalObjectRef::new(name);
        true
    } else {
        false
    }
}

fn etcd_storage_class(platform: PlatformType) -> Option<String> {
    match platform {
        PlatformType::Aws => Some("gp3-csi".to_string()),
        PlatformType::Azure => Some("managed-csi".to_string()),
        PlatformType::None => None,
    }
}

/// The inline HostedCluster spec, created when the request uses no reference
fn inline_spec(dr: &mut DeploymentRequest) -> Option<&mut HostedClusterSpec> {
    if dr
        .spec
        .hosted_cluster_ref
        .as_ref()
        .is_some_and(|r| !r.is_empty())
    {
        return None;
    }
    Some(
        dr.spec
            .hosted_cluster_spec
            .get_or_insert_with(HostedClusterSpec::default),
    )
}

/// Fill infra-independent HostedCluster defaults
pub fn scaffold_hosted_cluster(dr: &mut DeploymentRequest, config: &ControllerConfig) -> bool {
    let platform = dr.platform().unwrap_or_default();
    let infra_id = dr.spec.infra_id.clone();
    let configure = dr.configures_infra();
    let pull_secret = secrets::pull_secret_name(dr);
    let encryption_key = secrets::encryption_key_name(dr);
    let existed = dr.spec.hosted_cluster_spec.is_some();
    let Some(spec) = inline_spec(dr) else {
        return false;
    };

    let mut changed = !existed;
    changed |= fill(&mut spec.release.image, &config.default_release_image);
    changed |= fill_opt(&mut spec.infra_id, &infra_id);
    if spec.platform.type_ == PlatformType::None && platform != PlatformType::None {
        spec.platform.type_ = platform;
        changed = true;
    }
    changed |= fill_opt(
        &mut spec.controller_availability_policy,
        DEFAULT_AVAILABILITY_POLICY,
    );
    changed |= fill_opt(
        &mut spec.infrastructure_availability_policy,
        DEFAULT_AVAILABILITY_POLICY,
    );

    if spec.networking.service_network.is_empty() {
        spec.networking.service_network = vec![NetworkEntry::new(SERVICE_CIDR)];
        changed = true;
    }
    if spec.networking.cluster_network.is_empty() {
        spec.networking.cluster_network = vec![NetworkEntry::new(POD_CIDR)];
        changed = true;
    }
    changed |= fill_opt(&mut spec.networking.network_type, "OVNKubernetes");

    if spec.etcd.is_none() {
        spec.etcd = Some(EtcdSpec {
            management_type: "Managed".to_string(),
            managed: Some(ManagedEtcdSpec {
                storage: ManagedEtcdStorage {
                    type_: "PersistentVolume".to_string(),
                    persistent_volume: Some(PersistentVolumeEtcdStorage {
                        storage_class_name: etcd_storage_class(platform),
                        size: Some(DEFAULT_ETCD_SIZE.to_string()),
                    }),
                },
            }),
        });
        changed = true;
    }

    if spec.services.is_empty() {
        spec.services = SERVICE_PUBLISHING
            .iter()
            .map(|(service, type_)| ServicePublishingStrategyMapping {
                service: service.to_string(),
                service_publishing_strategy: ServicePublishingStrategy {
                    type_: type_.to_string(),
                },
            })
            .collect();
        changed = true;
    }

    // Pull secret and encryption key are produced by this controller only
    // when it provisions the infrastructure
    if configure {
        changed |= fill_ref(&mut spec.pull_secret, pull_secret);
        if spec.secret_encryption.is_none() {
            spec.secret_encryption = Some(SecretEncryptionSpec {
                type_: "aescbc".to_string(),
                aescbc: Some(AescbcSpec {
                    active_key: LocalObjectRef::new(encryption_key),
                    backup_key: None,
                }),
                kms: None,
            });
            changed = true;
        }
    }

    changed
}

/// Ensure at least one NodePool exists and every pool points at the HostedCluster
pub fn scaffold_node_pools(dr: &mut DeploymentRequest, config: &ControllerConfig) -> bool {
    if !dr.spec.node_pools_ref.is_empty() {
        return false;
    }

    let cluster_name = dr.hosted_cluster_name();
    let platform = dr.platform().unwrap_or_default();
    let mut changed = false;

    if dr.spec.node_pools.is_empty() {
        dr.spec.node_pools.push(NodePoolEntry {
            name: dr.name_any(),
            spec: NodePoolSpec {
                cluster_name: cluster_name.clone(),
                replicas: Some(DEFAULT_NODE_POOL_REPLICAS),
                management: NodePoolManagement {
                    upgrade_type: "Replace".to_string(),
                    replace: Some(ReplaceUpgrade {
                        strategy: "RollingUpdate".to_string(),
                        rolling_update: Some(RollingUpdate {
                            max_surge: 1,
                            max_unavailable: 0,
                        }),
                    }),
                    auto_repair: false,
                },
                ..Default::default()
            },
        });
        changed = true;
    }

    for pool in &mut dr.spec.node_pools {
        if pool.spec.cluster_name != cluster_name {
            pool.spec.cluster_name = cluster_name.clone();
            changed = true;
        }
        changed |= fill(&mut pool.spec.release.image, &config.default_release_image);
        if pool.spec.platform.type_ == PlatformType::None && platform != PlatformType::None {
            pool.spec.platform.type_ = platform;
            changed = true;
        }
    }

    changed
}

/// Fill AWS network, DNS and credential references from provisioner output
pub fn apply_aws_infra(dr: &mut DeploymentRequest, out: &AwsInfraOutput) -> bool {
    let region = dr.aws().map(|a| a.region.clone()).unwrap_or_default();
    let infra_id = dr.spec.infra_id.clone();
    let ctrl_creds = secrets::cloud_controller_creds_name(dr);
    let np_creds = secrets::node_pool_creds_name(dr);
    let cpo_creds = secrets::control_plane_creds_name(dr);
    let first_zone = out.zones.first().cloned().unwrap_or_default();
    let mut changed = false;

    if let Some(spec) = inline_spec(dr) {
        changed |= fill(&mut spec.dns.base_domain, &out.base_domain);
        changed |= fill_opt(&mut spec.dns.public_zone_id, &out.public_zone_id);
        changed |= fill_opt(&mut spec.dns.private_zone_id, &out.private_zone_id);
        if spec.networking.machine_network.is_empty() && !out.compute_cidr.is_empty() {
            spec.networking.machine_network = vec![NetworkEntry::new(&out.compute_cidr)];
            changed = true;
        }

        let aws = spec
            .platform
            .aws
            .get_or_insert_with(AwsPlatformSpec::default);
        changed |= fill(&mut aws.region, &region);
        if aws.cloud_provider_config.is_none() {
            aws.cloud_provider_config = Some(AwsCloudProviderConfig {
                vpc: out.vpc_id.clone(),
                zone: Some(first_zone.name.clone()).filter(|z| !z.is_empty()),
                subnet: Some(AwsResourceReference {
                    id: Some(first_zone.subnet_id.clone()).filter(|s| !s.is_empty()),
                }),
            });
            changed = true;
        }
        changed |= fill_ref(&mut aws.kube_cloud_controller_creds, ctrl_creds);
        changed |= fill_ref(&mut aws.node_pool_management_creds, np_creds);
        changed |= fill_ref(&mut aws.control_plane_operator_creds, cpo_creds);
        changed |= fill_opt(&mut aws.endpoint_access, "Public");
        if aws.resource_tags.is_empty() {
            aws.resource_tags = vec![AwsResourceTag {
                key: format!("kubernetes.io/cluster/{infra_id}"),
                value: "owned".to_string(),
            }];
            changed = true;
        }
    }

    for pool in &mut dr.spec.node_pools {
        let aws = pool
            .spec
            .platform
            .aws
            .get_or_insert_with(AwsNodePoolPlatform::default);
        changed |= fill(&mut aws.instance_type, DEFAULT_AWS_INSTANCE_TYPE);
        changed |= fill_opt(&mut aws.instance_profile, &format!("{infra_id}-worker"));
        if aws.subnet.is_none() && !first_zone.subnet_id.is_empty() {
            aws.subnet = Some(AwsResourceReference {
                id: Some(first_zone.subnet_id.clone()),
            });
            changed = true;
        }
        if aws.security_groups.is_empty() && !out.security_group_id.is_empty() {
            aws.security_groups = vec![AwsResourceReference {
                id: Some(out.security_group_id.clone()),
            }];
            changed = true;
        }
    }

    changed
}

/// Fill the issuer URL and per-service roles from IAM output
pub fn apply_aws_iam(dr: &mut DeploymentRequest, out: &AwsIamOutput) -> bool {
    let Some(spec) = inline_spec(dr) else {
        return false;
    };
    let mut changed = fill_opt(&mut spec.issuer_url, &out.issuer_url);
    let aws = spec
        .platform
        .aws
        .get_or_insert_with(AwsPlatformSpec::default);
    if aws.roles.is_empty() && !out.roles.is_empty() {
        aws.roles = out
            .roles
            .iter()
            .map(|r| AwsRoleCredentials {
                arn: r.arn.clone(),
                namespace: r.namespace.clone(),
                name: r.name.clone(),
            })
            .collect();
        changed = true;
    }
    changed
}

/// Fill Azure network, DNS and credential references from provisioner output
pub fn apply_azure_infra(dr: &mut DeploymentRequest, out: &AzureInfraOutput) -> bool {
    let credentials = secrets::azure_credentials_name(dr);
    let mut changed = false;

    if let Some(spec) = inline_spec(dr) {
        changed |= fill(&mut spec.dns.base_domain, &out.base_domain);
        changed |= fill_opt(&mut spec.dns.public_zone_id, &out.public_zone_id);
        changed |= fill_opt(&mut spec.dns.private_zone_id, &out.private_zone_id);

        let azure = spec
            .platform
            .azure
            .get_or_insert_with(AzurePlatformSpec::default);
        changed |= fill_ref(&mut azure.credentials, credentials);
        changed |= fill(&mut azure.location, &out.location);
        changed |= fill(&mut azure.resource_group, &out.resource_group_name);
        changed |= fill(&mut azure.vnet_name, &out.vnet_name);
        changed |= fill(&mut azure.vnet_id, &out.vnet_id);
        changed |= fill(&mut azure.subnet_name, &out.subnet_name);
        changed |= fill(&mut azure.machine_identity_id, &out.machine_identity_id);
        changed |= fill(&mut azure.security_group_name, &out.security_group_name);
    }

    for pool in &mut dr.spec.node_pools {
        let azure = pool
            .spec
            .platform
            .azure
            .get_or_insert_with(AzureNodePoolPlatform::default);
        changed |= fill(&mut azure.vm_size, DEFAULT_AZURE_VM_SIZE);
        changed |= fill(&mut azure.image_id, &out.boot_image_id);
        if azure.disk_size_gb == 0 {
            azure.disk_size_gb = DEFAULT_AZURE_DISK_SIZE_GB;
            changed = true;
        }
    }

    changed
}

/// Fill the subscription ID from the service principal when provisioning skipped it
pub fn apply_azure_subscription(dr: &mut DeploymentRequest, subscription_id: &str) -> bool {
    let Some(spec) = inline_spec(dr) else {
        return false;
    };
    let azure = spec
        .platform
        .azure
        .get_or_insert_with(AzurePlatformSpec::default);
    fill(&mut azure.subscription_id, subscription_id)
}

/// Generate the cluster ID and OLM placement when unset
pub fn apply_cluster_defaults(dr: &mut DeploymentRequest) -> bool {
    let Some(spec) = inline_spec(dr) else {
        return false;
    };
    let mut changed = false;
    if spec.cluster_id.as_deref().map_or(true, str::is_empty) {
        spec.cluster_id = Some(Uuid::new_v4().to_string());
        changed = true;
    }
    changed |= fill_opt(&mut spec.olm_catalog_placement, DEFAULT_OLM_PLACEMENT);
    changed
}
