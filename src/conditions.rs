//! Change-detecting condition writes
//!
//! Conditions are accumulated in a [`StatusPatch`] and written with a single
//! merge patch on [`StatusPatch::commit`]. A set that matches the existing
//! condition is a no-op, and a commit with no changes performs no write, so
//! repeated reconciles of a settled request never touch the API server.
//!
//! Locally authored kinds are compared on status, reason, message and
//! `observedGeneration`. Kinds mirrored from the WorkBundle are compared on
//! status, reason and message only.

use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, warn};

use crate::crd::{Condition, ConditionStatus, ConditionType, DeploymentRequest};
use crate::state::derive_state;
use crate::store::ResourceStore;
use crate::Error;

/// Pending condition changes against a snapshot of a request
#[derive(Clone, Debug)]
pub struct StatusPatch {
    conditions: Vec<Condition>,
    generation: Option<i64>,
    changed: bool,
}

impl StatusPatch {
    /// Start a patch from the request's current conditions
    pub fn new(dr: &DeploymentRequest) -> Self {
        Self {
            conditions: dr.conditions().to_vec(),
            generation: dr.metadata.generation,
            changed: false,
        }
    }

    /// Record a condition; returns true when it differs from the current value
    pub fn set(
        &mut self,
        kind: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> bool {
        let generation = if kind.is_mirrored() {
            None
        } else {
            self.generation
        };

        let index = self.conditions.iter().position(|c| c.is(kind));
        if let Some(existing) = index.map(|i| &self.conditions[i]) {
            let same = existing.status == status
                && existing.reason == reason
                && existing.message == message
                && (kind.is_mirrored() || existing.observed_generation == generation);
            if same {
                return false;
            }
        }

        let mut condition = Condition::new(kind, status, reason, message).observed(generation);
        match index {
            Some(i) => {
                // Transition time moves only when the status flips
                if self.conditions[i].status == status {
                    condition.last_transition_time = self.conditions[i].last_transition_time;
                }
                self.conditions[i] = condition;
            }
            None => self.conditions.push(condition),
        }
        self.changed = true;
        true
    }

    /// True when at least one set changed a condition
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Conditions as they will be written
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Write the accumulated conditions and derived phase in one status patch
    ///
    /// Does nothing when no condition changed. On success `dr` is replaced
    /// by the stored object so later writes carry its new resourceVersion.
    /// Conflicts are logged and returned unmodified.
    pub async fn commit(
        self,
        store: &dyn ResourceStore,
        dr: &mut DeploymentRequest,
    ) -> Result<bool, Error> {
        if !self.changed {
            return Ok(false);
        }

        let mut preview = dr.clone();
        preview.status.get_or_insert_with(Default::default).conditions = self.conditions.clone();
        let phase = derive_state(&preview).phase();

        let patch = json!({
            "metadata": { "resourceVersion": dr.resource_version() },
            "status": {
                "conditions": self.conditions,
                "phase": phase,
            }
        });

        let namespace = dr.namespace().unwrap_or_default();
        let name = dr.name_any();
        match store
            .patch_deployment_request_status(&namespace, &name, &patch)
            .await
        {
            Ok(updated) => {
                debug!(deployment = %name, phase, "status updated");
                *dr = updated;
                Ok(true)
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!(deployment = %name, "status update conflicted, will retry on next reconcile");
                }
                Err(e)
            }
        }
    }
}

/// Set a single condition, writing only when it changed
pub async fn set_if_changed(
    store: &dyn ResourceStore,
    dr: &mut DeploymentRequest,
    kind: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> Result<bool, Error> {
    let mut patch = StatusPatch::new(dr);
    patch.set(kind, status, reason, message);
    patch.commit(store, dr).await
}
