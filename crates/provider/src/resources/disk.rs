//! Standalone disk

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use driftless_common::{
    DeletePolicy, DiskSpec, Error, LifecycleStatus, Reference, ResourceKind, Result,
};

use super::{parse_status, parse_time, Observed, Resource};
use crate::client::{Api, CallClass, Params};
use crate::warnings::Warnings;

const GET: &str = "/cloudapi/disks/get";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiskRecord {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    account_id: u64,
    #[serde(default)]
    gid: u64,
    #[serde(default)]
    size_max: u64,
    #[serde(default)]
    sep_id: u64,
    #[serde(default)]
    pool: String,
    #[serde(default)]
    desc: String,
    status: String,
    #[serde(default)]
    tech_status: String,
    #[serde(default)]
    created_time: serde_json::Value,
}

/// Observed standalone disk
#[derive(Debug, Clone, Serialize)]
pub struct ObservedDisk {
    pub id: u64,
    pub name: String,
    pub account_id: u64,
    pub gid: u64,
    /// Size in GB
    pub size: u64,
    pub sep_id: u64,
    pub pool: String,
    pub description: String,
    pub status: LifecycleStatus,
    pub tech_status: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl Observed for ObservedDisk {
    fn id(&self) -> u64 {
        self.id
    }

    fn status(&self) -> LifecycleStatus {
        self.status
    }
}

pub struct DiskResource;

#[async_trait]
impl Resource for DiskResource {
    type Spec = DiskSpec;
    type Observed = ObservedDisk;

    const KIND: ResourceKind = ResourceKind::Disk;

    fn validate(spec: &DiskSpec) -> Result<()> {
        spec.validate()
    }

    fn references(spec: &DiskSpec) -> Vec<Reference> {
        spec.references()
    }

    async fn fetch(api: &Api, id: u64) -> Result<ObservedDisk> {
        let record: DiskRecord = api.get(GET, Params::new().with("diskId", id)).await?;
        Ok(ObservedDisk {
            status: parse_status(GET, &record.status)?,
            created_at: parse_time(&record.created_time),
            id: record.id,
            name: record.name,
            account_id: record.account_id,
            gid: record.gid,
            size: record.size_max,
            sep_id: record.sep_id,
            pool: record.pool,
            description: record.desc,
            tech_status: record.tech_status,
        })
    }

    async fn create(api: &Api, spec: &DiskSpec) -> Result<u64> {
        let params = Params::new()
            .with("accountId", spec.account_id)
            .with("gid", spec.gid)
            .with("name", &spec.name)
            .with("size", spec.size)
            .with("type", "D")
            .with_opt("sep_id", (spec.sep_id != 0).then_some(spec.sep_id))
            .with_opt("pool", (!spec.pool.is_empty()).then_some(&spec.pool))
            .with_opt(
                "description",
                (!spec.description.is_empty()).then_some(&spec.description),
            );
        let id = api
            .post_id(CallClass::Long, "/cloudapi/disks/create", params)
            .await?;
        info!("Created disk {} ({})", spec.name, id);
        Ok(id)
    }

    async fn provision(
        _api: &Api,
        _id: u64,
        _spec: &DiskSpec,
        _warnings: &mut Warnings,
    ) -> Result<()> {
        Ok(())
    }

    async fn reconcile(
        api: &Api,
        observed: &ObservedDisk,
        spec: &DiskSpec,
        _prior: Option<&DiskSpec>,
        warnings: &mut Warnings,
    ) -> Result<()> {
        let id = observed.id;

        if observed.name != spec.name {
            api.post(
                CallClass::Short,
                "/cloudapi/disks/rename",
                Params::new().with("diskId", id).with("name", &spec.name),
            )
            .await?;
        }

        if spec.size > observed.size {
            info!("Growing disk {} from {}G to {}G", id, observed.size, spec.size);
            api.post(
                CallClass::Long,
                "/cloudapi/disks/resize2",
                Params::new().with("diskId", id).with("size", spec.size),
            )
            .await?;
        } else if spec.size < observed.size {
            warnings.push(
                format!("disk {} resize", id),
                Error::InvalidSpec(format!(
                    "cannot shrink disk from {}G to {}G",
                    observed.size, spec.size
                )),
            );
        }

        if observed.description != spec.description {
            warnings.push(
                format!("disk {} description", id),
                Error::InvalidSpec("description cannot be changed after creation".to_string()),
            );
        }

        let placement_drift = (spec.sep_id != 0 && spec.sep_id != observed.sep_id)
            || (!spec.pool.is_empty() && spec.pool != observed.pool);
        if placement_drift {
            warnings.push(
                format!("disk {} placement", id),
                Error::InvalidSpec("sep_id and pool cannot be changed in place".to_string()),
            );
        }

        Ok(())
    }

    async fn delete(api: &Api, id: u64, policy: DeletePolicy) -> Result<()> {
        info!("Deleting disk {} (permanently: {})", id, policy.permanently);
        api.post(
            CallClass::Long,
            "/cloudapi/disks/delete",
            Params::new()
                .with("diskId", id)
                .with("detach", policy.detach_dependents)
                .with("permanently", policy.permanently),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;
    use serde_json::json;
    use std::sync::Arc;

    fn spec(size: u64) -> DiskSpec {
        DiskSpec {
            name: "data".to_string(),
            account_id: 1,
            gid: 2,
            size,
            sep_id: 0,
            pool: String::new(),
            description: String::new(),
        }
    }

    async fn observed(fake: &Arc<FakeApi>, size: u64) -> ObservedDisk {
        fake.json(
            GET,
            json!({
                "id": 9, "name": "data", "accountId": 1, "gid": 2, "sizeMax": size,
                "sepId": 1, "pool": "ssd", "desc": "", "status": "CREATED",
                "techStatus": "ALLOCATED", "createdTime": 1_700_000_000
            }),
        );
        DiskResource::fetch(&fake.api(), 9).await.unwrap()
    }

    #[tokio::test]
    async fn test_fetch_maps_wire_record() {
        let fake = Arc::new(FakeApi::new());
        let disk = observed(&fake, 10).await;

        assert_eq!(disk.size, 10);
        assert_eq!(disk.status, LifecycleStatus::Created);
        assert_eq!(disk.created_at.map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[tokio::test]
    async fn test_matching_disk_issues_nothing() {
        let fake = Arc::new(FakeApi::new());
        let disk = observed(&fake, 10).await;
        let mut warnings = Warnings::new();

        DiskResource::reconcile(&fake.api(), &disk, &spec(10), None, &mut warnings)
            .await
            .unwrap();

        assert!(fake.mutations().is_empty());
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_grow_only() {
        let fake = Arc::new(FakeApi::new());
        let disk = observed(&fake, 10).await;
        let mut warnings = Warnings::new();

        DiskResource::reconcile(&fake.api(), &disk, &spec(20), None, &mut warnings)
            .await
            .unwrap();
        assert_eq!(fake.mutations(), vec!["/cloudapi/disks/resize2"]);
        assert_eq!(fake.calls_to("/cloudapi/disks/resize2")[0].get("size"), Some("20"));

        DiskResource::reconcile(&fake.api(), &disk, &spec(5), None, &mut warnings)
            .await
            .unwrap();
        assert_eq!(fake.count("/cloudapi/disks/resize2"), 1);
        assert_eq!(warnings.operations(), vec!["disk 9 resize"]);
    }

    #[tokio::test]
    async fn test_delete_policy_flags() {
        let fake = Arc::new(FakeApi::new());
        DiskResource::delete(
            &fake.api(),
            9,
            DeletePolicy {
                permanently: true,
                detach_dependents: false,
            },
        )
        .await
        .unwrap();

        let params = &fake.calls_to("/cloudapi/disks/delete")[0];
        assert_eq!(params.get("permanently"), Some("true"));
        assert_eq!(params.get("detach"), Some("false"));
    }
}
