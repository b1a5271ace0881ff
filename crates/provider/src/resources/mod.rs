//! Resource kinds
//!
//! Each managed kind is a unit struct implementing [`Resource`]. The
//! orchestrator is generic over the trait and never names a kind.

pub mod compute;
pub mod disk;
pub mod k8s;
pub mod vins;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::info;

use driftless_common::{
    DeletePolicy, Error, LifecycleStatus, Reference, ResourceKind, Result, UnknownStatus,
};

use crate::client::{Api, CallClass, Params};
use crate::warnings::Warnings;

pub use compute::{ComputeResource, ObservedCompute};
pub use disk::{DiskResource, ObservedDisk};
pub use k8s::{K8sResource, ObservedK8s};
pub use vins::{ObservedVins, VinsResource};

/// Live snapshot of a resource
pub trait Observed: Clone + Debug + Serialize + Send + Sync {
    fn id(&self) -> u64;
    fn status(&self) -> LifecycleStatus;
}

/// Convergence operations of one resource kind
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    type Spec: Debug + Send + Sync;
    type Observed: Observed;

    const KIND: ResourceKind;

    /// Local checks that need no remote call
    fn validate(spec: &Self::Spec) -> Result<()>;

    /// Sibling resources that must exist before a mutating call
    fn references(spec: &Self::Spec) -> Vec<Reference>;

    /// Fetch the observed snapshot; absence is [`Error::NotFound`].
    async fn fetch(api: &Api, id: u64) -> Result<Self::Observed>;

    /// Base creation call. Returns the new id.
    async fn create(api: &Api, spec: &Self::Spec) -> Result<u64>;

    /// Bring a freshly created resource to the spec: attach collections,
    /// then apply the lifecycle toggles.
    async fn provision(api: &Api, id: u64, spec: &Self::Spec, warnings: &mut Warnings)
        -> Result<()>;

    /// Converge an existing resource. `prior` is the previously applied
    /// spec, consulted only for one-shot action flags.
    async fn reconcile(
        api: &Api,
        observed: &Self::Observed,
        spec: &Self::Spec,
        prior: Option<&Self::Spec>,
        warnings: &mut Warnings,
    ) -> Result<()>;

    async fn delete(api: &Api, id: u64, policy: DeletePolicy) -> Result<()>;
}

/// List endpoints answer either a bare array or `{"data": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Listing<T> {
    Wrapped { data: Vec<T> },
    Plain(Vec<T>),
}

impl<T> Listing<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Wrapped { data } => data,
            Listing::Plain(items) => items,
        }
    }
}

/// Parse a wire status string; unknown values are a decode error.
pub(crate) fn parse_status(operation: &str, raw: &str) -> Result<LifecycleStatus> {
    raw.parse().map_err(|e: UnknownStatus| {
        Error::decode(operation, <serde_json::Error as serde::de::Error>::custom(e))
    })
}

/// Parse an RFC 3339 or unix-seconds timestamp. Missing or malformed
/// values become `None`.
pub(crate) fn parse_time(raw: &serde_json::Value) -> Option<chrono::DateTime<chrono::Utc>> {
    match raw {
        serde_json::Value::Number(n) => n
            .as_i64()
            .filter(|secs| *secs > 0)
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)),
        serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&chrono::Utc)),
        _ => None,
    }
}

/// Issue a toggle call (`enable`, `disable`, `start`, `stop`, ...) on a resource.
pub(crate) async fn toggle(api: &Api, kind: ResourceKind, id: u64, action: &str) -> Result<()> {
    info!("{} {}: {}", kind, id, action);
    api.post(
        CallClass::Short,
        &kind.endpoint(action),
        Params::new().with(kind.id_param(), id),
    )
    .await
    .map(|_| ())
}
