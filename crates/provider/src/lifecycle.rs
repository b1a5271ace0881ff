//! Lifecycle state machine
//!
//! [`classify`] maps every observed status to exactly one action.
//! [`settle`] executes that action: it passes stable resources through,
//! restores soft-deleted ones, and reports the rest.

use tracing::{info, warn};

use driftless_common::{Error, LifecycleStatus, ResourceKind, Result};

use crate::client::{Api, CallClass, Params};
use crate::loader;
use crate::resources::{Observed, Resource};

/// What the engine does with a resource in a given status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Continue with normal reconciliation
    Proceed,
    /// Restore and enable, then re-fetch
    Recover,
    /// Treat as absent and create anew
    Recreate,
    /// Report without touching the resource
    FailFast { reason: &'static str },
}

pub fn classify(status: LifecycleStatus) -> LifecycleAction {
    use LifecycleStatus::*;

    match status {
        Created | Enabled | Disabled | Enabling | Disabling | Restoring | Reconfiguring => {
            LifecycleAction::Proceed
        }
        Deleted => LifecycleAction::Recover,
        Destroyed => LifecycleAction::Recreate,
        Creating | Deleting | Destroying => LifecycleAction::FailFast {
            reason: "operation in progress",
        },
        Modeled => LifecycleAction::FailFast {
            reason: "resource never finished provisioning, manual intervention required",
        },
    }
}

/// Outcome of running the state machine on an observed snapshot
#[derive(Debug, Clone)]
pub enum Settled<O> {
    /// Ready for reconciliation; re-fetched if a recovery ran
    Ready(O),
    /// Gone for good; the create path applies
    Absent,
}

/// Issue the fixed recovery pair: restore, then enable where the kind has
/// an enable endpoint. Both calls abort on failure.
pub async fn recover(api: &Api, kind: ResourceKind, id: u64) -> Result<()> {
    info!("Restoring soft-deleted {} {}", kind, id);
    api.post(
        CallClass::Long,
        &kind.endpoint("restore"),
        Params::new().with(kind.id_param(), id),
    )
    .await?;

    if kind.supports_enable() {
        api.post(
            CallClass::Short,
            &kind.endpoint("enable"),
            Params::new().with(kind.id_param(), id),
        )
        .await?;
    }
    Ok(())
}

/// Run the state machine for `observed`.
pub async fn settle<R: Resource>(api: &Api, observed: R::Observed) -> Result<Settled<R::Observed>> {
    let id = observed.id();
    let status = observed.status();

    match classify(status) {
        LifecycleAction::Proceed => Ok(Settled::Ready(observed)),
        LifecycleAction::Recreate => {
            info!("{} {} is destroyed, recreating", R::KIND, id);
            Ok(Settled::Absent)
        }
        LifecycleAction::FailFast { reason } => Err(conflict(R::KIND, id, status, reason)),
        LifecycleAction::Recover => {
            recover(api, R::KIND, id).await?;

            let Some(refreshed) = loader::load::<R>(api, id).await? else {
                warn!("{} {} vanished during recovery", R::KIND, id);
                return Ok(Settled::Absent);
            };
            let status = refreshed.status();
            match classify(status) {
                LifecycleAction::Proceed => {
                    info!("{} {} recovered, now {}", R::KIND, id, status);
                    Ok(Settled::Ready(refreshed))
                }
                LifecycleAction::Recreate => Ok(Settled::Absent),
                LifecycleAction::Recover => Err(conflict(
                    R::KIND,
                    id,
                    status,
                    "still deleted after restore",
                )),
                LifecycleAction::FailFast { reason } => Err(conflict(R::KIND, id, status, reason)),
            }
        }
    }
}

fn conflict(kind: ResourceKind, id: u64, status: LifecycleStatus, reason: &str) -> Error {
    warn!("{} {} is {}: {}", kind, id, status, reason);
    Error::LifecycleConflict {
        kind,
        id,
        status,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::DiskResource;
    use crate::testing::FakeApi;
    use serde_json::json;
    use std::sync::Arc;
    use test_case::test_case;

    #[test_case(LifecycleStatus::Created, LifecycleAction::Proceed)]
    #[test_case(LifecycleStatus::Enabled, LifecycleAction::Proceed)]
    #[test_case(LifecycleStatus::Disabled, LifecycleAction::Proceed)]
    #[test_case(LifecycleStatus::Enabling, LifecycleAction::Proceed)]
    #[test_case(LifecycleStatus::Disabling, LifecycleAction::Proceed)]
    #[test_case(LifecycleStatus::Restoring, LifecycleAction::Proceed)]
    #[test_case(LifecycleStatus::Reconfiguring, LifecycleAction::Proceed)]
    #[test_case(LifecycleStatus::Deleted, LifecycleAction::Recover)]
    #[test_case(LifecycleStatus::Destroyed, LifecycleAction::Recreate)]
    fn test_classify(status: LifecycleStatus, expected: LifecycleAction) {
        assert_eq!(classify(status), expected);
    }

    #[test]
    fn test_in_progress_and_modeled_fail_fast() {
        for status in [
            LifecycleStatus::Creating,
            LifecycleStatus::Deleting,
            LifecycleStatus::Destroying,
            LifecycleStatus::Modeled,
        ] {
            assert!(matches!(classify(status), LifecycleAction::FailFast { .. }));
        }
    }

    #[test]
    fn test_classify_is_deterministic() {
        for status in LifecycleStatus::ALL {
            assert_eq!(classify(status), classify(status));
        }
    }

    fn disk_record(status: &str) -> serde_json::Value {
        json!({
            "id": 9, "name": "data", "accountId": 1, "gid": 2,
            "sizeMax": 10, "sepId": 1, "pool": "ssd", "desc": "",
            "status": status, "techStatus": "ALLOCATED"
        })
    }

    #[tokio::test]
    async fn test_recovery_that_does_not_clear_is_a_conflict() {
        let fake = Arc::new(FakeApi::new());
        fake.json("/cloudapi/disks/get", disk_record("DELETED"));
        let api = fake.api();

        let observed = loader::load::<DiskResource>(&api, 9).await.unwrap().unwrap();
        let err = settle::<DiskResource>(&api, observed).await.unwrap_err();

        assert!(matches!(
            err,
            Error::LifecycleConflict { status: LifecycleStatus::Deleted, .. }
        ));
        assert_eq!(fake.mutations(), vec!["/cloudapi/disks/restore"]);
    }

    #[tokio::test]
    async fn test_recovered_resource_is_refetched() {
        let fake = Arc::new(FakeApi::new());
        fake.sequence(
            "/cloudapi/disks/get",
            vec![
                crate::testing::Reply::json(disk_record("DELETED")),
                crate::testing::Reply::json(disk_record("CREATED")),
            ],
        );
        let api = fake.api();

        let observed = loader::load::<DiskResource>(&api, 9).await.unwrap().unwrap();
        let settled = settle::<DiskResource>(&api, observed).await.unwrap();

        match settled {
            Settled::Ready(disk) => assert_eq!(disk.status, LifecycleStatus::Created),
            Settled::Absent => panic!("expected a recovered disk"),
        }
        assert_eq!(fake.count("/cloudapi/disks/get"), 2);
    }

    #[tokio::test]
    async fn test_restore_failure_aborts() {
        let fake = Arc::new(FakeApi::new());
        fake.json("/cloudapi/disks/get", disk_record("DELETED"));
        fake.fail("/cloudapi/disks/restore", "quota exceeded");
        let api = fake.api();

        let observed = loader::load::<DiskResource>(&api, 9).await.unwrap().unwrap();
        let err = settle::<DiskResource>(&api, observed).await.unwrap_err();

        assert!(err.is_remote());
        assert_eq!(fake.count("/cloudapi/disks/get"), 1);
    }
}
