//! Controllers for hcp-deployer CRDs
//!
//! [`deployment`] holds the top-level DeploymentRequest reconciler. [`work`]
//! keeps the request's WorkBundle in sync and mirrors what the remote agent
//! reports back.

mod deployment;
pub mod work;

pub use deployment::{error_policy, reconcile, Context, ERROR_RETRY, PROVIDER_SECRET_RETRY};
pub use work::{delete_bundle, owning_request, sync_bundle, BUNDLE_DELETE_RETRY};
