//! Convergence orchestrator
//!
//! The `create / read / update / delete` entry points. Each call is one
//! sequential convergence: no state survives between calls and nothing is
//! shared with other calls except the [`Api`] handle.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use driftless_common::{DeletePolicy, LifecycleStatus, ResourceKind, Result};

use crate::client::Api;
use crate::existence::{validate_references, ApiExistence, ExistenceLookup};
use crate::lifecycle::{settle, Settled};
use crate::loader::load;
use crate::resources::{Observed, Resource};
use crate::warnings::{Converged, Warnings};

/// Options for [`Engine::create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// Delete the partially created resource when provisioning fails
    pub compensate: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self { compensate: true }
    }
}

/// Outcome of [`Engine::delete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Deleted {
    Removed,
    AlreadyAbsent,
}

/// Convergence engine
pub struct Engine {
    api: Api,
    lookup: Arc<dyn ExistenceLookup>,
}

impl Engine {
    pub fn new(api: Api, lookup: Arc<dyn ExistenceLookup>) -> Self {
        Self { api, lookup }
    }

    /// Engine whose reference checks go through the same control plane.
    pub fn with_api_lookup(api: Api) -> Self {
        let lookup = Arc::new(ApiExistence::new(api.clone()));
        Self { api, lookup }
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    /// Create a resource and bring it to `spec`.
    ///
    /// References are checked before the first mutating call. When any
    /// step after the base creation fails, the new resource is deleted
    /// (unless `options.compensate` is off) and the original error returned.
    pub async fn create<R: Resource>(
        &self,
        spec: &R::Spec,
        options: CreateOptions,
    ) -> Result<Converged<R::Observed>> {
        R::validate(spec)?;
        validate_references(self.lookup.as_ref(), &R::references(spec)).await?;
        self.create_checked::<R>(spec, options).await
    }

    /// Current state, or `None` when the resource is gone.
    ///
    /// A soft-deleted resource is restored first.
    pub async fn read<R: Resource>(&self, id: u64) -> Result<Option<R::Observed>> {
        let Some(observed) = load::<R>(&self.api, id).await? else {
            return Ok(None);
        };
        match settle::<R>(&self.api, observed).await? {
            Settled::Ready(observed) => Ok(Some(observed)),
            Settled::Absent => Ok(None),
        }
    }

    /// Converge an existing resource to `spec`.
    ///
    /// A resource that no longer exists, or is destroyed, is created
    /// anew; the returned snapshot then carries the new id. `prior` is the
    /// spec applied by the previous convergence, if any.
    pub async fn update<R: Resource>(
        &self,
        id: u64,
        spec: &R::Spec,
        prior: Option<&R::Spec>,
    ) -> Result<Converged<R::Observed>> {
        R::validate(spec)?;
        validate_references(self.lookup.as_ref(), &R::references(spec)).await?;

        let settled = match load::<R>(&self.api, id).await? {
            Some(observed) => settle::<R>(&self.api, observed).await?,
            None => Settled::Absent,
        };
        let observed = match settled {
            Settled::Ready(observed) => observed,
            Settled::Absent => {
                info!("{} {} is gone, creating it again", R::KIND, id);
                return self
                    .create_checked::<R>(spec, CreateOptions::default())
                    .await;
            }
        };

        let mut warnings = Warnings::new();
        R::reconcile(&self.api, &observed, spec, prior, &mut warnings).await?;

        let value = R::fetch(&self.api, id).await?;
        log_outcome(R::KIND, id, &warnings);
        Ok(Converged { value, warnings })
    }

    /// Delete a resource. Absent, destroyed, already deleting, and (unless
    /// deleting permanently) soft-deleted resources are left alone.
    pub async fn delete<R: Resource>(&self, id: u64, policy: DeletePolicy) -> Result<Deleted> {
        let Some(observed) = load::<R>(&self.api, id).await? else {
            info!("{} {} already absent", R::KIND, id);
            return Ok(Deleted::AlreadyAbsent);
        };

        let status = observed.status();
        let absent = match status {
            LifecycleStatus::Destroyed
            | LifecycleStatus::Destroying
            | LifecycleStatus::Deleting => true,
            LifecycleStatus::Deleted => !policy.permanently,
            _ => false,
        };
        if absent {
            info!("{} {} is {}, nothing to delete", R::KIND, id, status);
            return Ok(Deleted::AlreadyAbsent);
        }

        R::delete(&self.api, id, policy).await?;
        Ok(Deleted::Removed)
    }

    async fn create_checked<R: Resource>(
        &self,
        spec: &R::Spec,
        options: CreateOptions,
    ) -> Result<Converged<R::Observed>> {
        let id = R::create(&self.api, spec).await?;

        let mut warnings = Warnings::new();
        match self.provision::<R>(id, spec, &mut warnings).await {
            Ok(value) => {
                log_outcome(R::KIND, id, &warnings);
                Ok(Converged { value, warnings })
            }
            Err(err) => {
                error!("Provisioning {} {} failed: {}", R::KIND, id, err);
                if options.compensate {
                    warn!("Deleting partially created {} {}", R::KIND, id);
                    if let Err(cleanup) =
                        R::delete(&self.api, id, DeletePolicy::compensating()).await
                    {
                        error!(
                            "Compensating delete of {} {} failed: {}",
                            R::KIND,
                            id,
                            cleanup
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn provision<R: Resource>(
        &self,
        id: u64,
        spec: &R::Spec,
        warnings: &mut Warnings,
    ) -> Result<R::Observed> {
        R::provision(&self.api, id, spec, warnings).await?;
        R::fetch(&self.api, id).await
    }
}

fn log_outcome(kind: ResourceKind, id: u64, warnings: &Warnings) {
    if warnings.is_empty() {
        info!("{} {} converged", kind, id);
    } else {
        warn!(
            "{} {} converged with {} warning(s)",
            kind,
            id,
            warnings.len()
        );
    }
}
