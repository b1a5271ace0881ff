//! Remote state loader

use tracing::debug;

use driftless_common::Result;

use crate::client::Api;
use crate::resources::{Observed, Resource};

/// Fetch a fresh observed snapshot. `None` when the control plane does
/// not know the id.
pub async fn load<R: Resource>(api: &Api, id: u64) -> Result<Option<R::Observed>> {
    match R::fetch(api, id).await {
        Ok(observed) => {
            debug!("Loaded {} {} in status {}", R::KIND, id, observed.status());
            Ok(Some(observed))
        }
        Err(err) if err.is_not_found() => {
            debug!("{} {} not found", R::KIND, id);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
