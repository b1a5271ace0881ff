//! Existence lookup for cross-referenced resources

use async_trait::async_trait;
use tracing::debug;

use driftless_common::{Error, RefKind, Reference, Result};

use crate::client::{Api, Params};

/// Answers whether a sibling resource exists
#[async_trait]
pub trait ExistenceLookup: Send + Sync {
    async fn exists(&self, kind: RefKind, id: u64) -> Result<bool>;
}

/// Lookup backed by the control plane's `get` endpoints
pub struct ApiExistence {
    api: Api,
}

impl ApiExistence {
    pub fn new(api: Api) -> Self {
        Self { api }
    }
}

fn lookup_call(kind: RefKind) -> (&'static str, &'static str) {
    match kind {
        RefKind::ResourceGroup => ("/cloudapi/rg/get", "rgId"),
        RefKind::Account => ("/cloudapi/account/get", "accountId"),
        RefKind::Image => ("/cloudapi/image/get", "imageId"),
        RefKind::Vins => ("/cloudapi/vins/get", "vinsId"),
        RefKind::Extnet => ("/cloudapi/extnet/get", "net_id"),
        RefKind::K8ci => ("/cloudapi/k8ci/get", "k8ciId"),
        RefKind::Disk => ("/cloudapi/disks/get", "diskId"),
    }
}

#[async_trait]
impl ExistenceLookup for ApiExistence {
    async fn exists(&self, kind: RefKind, id: u64) -> Result<bool> {
        let (path, param) = lookup_call(kind);
        match self
            .api
            .get::<serde_json::Value>(path, Params::new().with(param, id))
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Fail with [`Error::Validation`] on the first reference that does not
/// exist. Id 0 means unset and is skipped.
pub async fn validate_references(
    lookup: &dyn ExistenceLookup,
    references: &[Reference],
) -> Result<()> {
    for reference in references.iter().filter(|r| r.id != 0) {
        debug!("Checking {} {}", reference.kind, reference.id);
        if !lookup.exists(reference.kind, reference.id).await? {
            return Err(Error::Validation {
                kind: reference.kind.to_string(),
                id: reference.id,
            });
        }
    }
    Ok(())
}
