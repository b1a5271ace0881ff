//! Kubernetes cluster
//!
//! Cluster creation, deletion and worker group changes are asynchronous:
//! the control plane answers with an audit id that is polled to completion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use driftless_common::{
    DeletePolicy, Error, K8sSpec, LifecycleStatus, Reference, ResourceKind, Result, WorkerGroup,
};

use super::{parse_status, parse_time, toggle, Observed, Resource};
use crate::client::{Api, CallClass, Params};
use crate::diff::diff;
use crate::sequencer::{apply, CollectionOps, Tier};
use crate::warnings::Warnings;

const GET: &str = "/cloudapi/k8s/get";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct K8sRecord {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    rg_id: u64,
    #[serde(default)]
    k8ci_id: u64,
    status: String,
    #[serde(default)]
    tech_status: String,
    #[serde(default)]
    k8s_groups: GroupsRecord,
    #[serde(default)]
    created_time: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct GroupsRecord {
    #[serde(default)]
    masters: MastersRecord,
    #[serde(default)]
    workers: Vec<WorkerGroupRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct MastersRecord {
    #[serde(default)]
    num: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerGroupRecord {
    id: u64,
    name: String,
    num: u32,
    #[serde(default)]
    cpu: u32,
    #[serde(default)]
    ram: u64,
    #[serde(default)]
    disk: u64,
    #[serde(default)]
    detailed_info: Vec<WorkerRecord>,
}

#[derive(Debug, Deserialize)]
struct WorkerRecord {
    id: u64,
}

impl From<WorkerGroupRecord> for WorkerGroup {
    fn from(record: WorkerGroupRecord) -> Self {
        let mut worker_ids: Vec<u64> = record.detailed_info.iter().map(|w| w.id).collect();
        worker_ids.sort_unstable();
        WorkerGroup {
            name: record.name,
            num: record.num,
            cpu: record.cpu,
            ram: record.ram,
            disk: record.disk,
            id: Some(record.id),
            worker_ids,
        }
    }
}

/// Observed Kubernetes cluster
#[derive(Debug, Clone, Serialize)]
pub struct ObservedK8s {
    pub id: u64,
    pub name: String,
    pub rg_id: u64,
    pub k8ci_id: u64,
    pub master_count: u32,
    pub status: LifecycleStatus,
    pub tech_status: String,
    pub worker_groups: Vec<WorkerGroup>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Observed for ObservedK8s {
    fn id(&self) -> u64 {
        self.id
    }

    fn status(&self) -> LifecycleStatus {
        self.status
    }
}

struct WorkerGroupOps<'a> {
    api: &'a Api,
    k8s_id: u64,
}

impl WorkerGroupOps<'_> {
    fn group_id(&self, group: &WorkerGroup) -> Result<u64> {
        group.id.ok_or_else(|| {
            Error::InvalidSpec(format!("worker group {} has no server id", group.name))
        })
    }

    async fn run_task(&self, path: &str, params: Params) -> Result<()> {
        let audit_id = self.api.post_task(CallClass::Long, path, params).await?;
        self.api.poller().wait(&audit_id).await.map(|_| ())
    }

    async fn scale(&self, observed: &WorkerGroup, desired: &WorkerGroup) -> Result<()> {
        let group_id = self.group_id(observed)?;

        if desired.num > observed.num {
            info!(
                "Scaling worker group {} up from {} to {}",
                observed.name, observed.num, desired.num
            );
            return self
                .run_task(
                    "/cloudapi/k8s/workerAdd",
                    Params::new()
                        .with("k8sId", self.k8s_id)
                        .with("workersGroupId", group_id)
                        .with("num", desired.num - observed.num),
                )
                .await;
        }

        let excess = (observed.num - desired.num) as usize;
        if observed.worker_ids.len() < excess {
            return Err(Error::InvalidSpec(format!(
                "worker group {} reports {} worker id(s), cannot remove {} worker(s)",
                observed.name,
                observed.worker_ids.len(),
                excess
            )));
        }
        info!(
            "Scaling worker group {} down from {} to {}",
            observed.name, observed.num, desired.num
        );
        for worker_id in observed.worker_ids.iter().rev().take(excess) {
            self.api
                .post(
                    CallClass::Long,
                    "/cloudapi/k8s/deleteWorkerFromGroup",
                    Params::new()
                        .with("k8sId", self.k8s_id)
                        .with("workersGroupId", group_id)
                        .with("workerId", worker_id),
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CollectionOps<WorkerGroup> for WorkerGroupOps<'_> {
    fn label(&self) -> &'static str {
        "worker group"
    }

    fn describe(&self, group: &WorkerGroup) -> String {
        group.name.clone()
    }

    async fn add(&self, group: &WorkerGroup) -> Result<()> {
        self.run_task(
            "/cloudapi/k8s/workersGroupAdd",
            Params::new()
                .with("k8sId", self.k8s_id)
                .with("name", &group.name)
                .with("workerNum", group.num)
                .with("workerCpu", group.cpu)
                .with("workerRam", group.ram)
                .with("workerDisk", group.disk),
        )
        .await
    }

    async fn remove(&self, group: &WorkerGroup) -> Result<()> {
        let group_id = self.group_id(group)?;
        self.run_task(
            "/cloudapi/k8s/workersGroupDelete",
            Params::new()
                .with("k8sId", self.k8s_id)
                .with("workersGroupId", group_id),
        )
        .await
    }

    /// Only the worker count changes in place. A different shape is
    /// reported after the count has been converged.
    async fn update(&self, observed: &WorkerGroup, desired: &WorkerGroup) -> Result<()> {
        if observed.num != desired.num {
            self.scale(observed, desired).await?;
        }
        if observed.shape_differs(desired) {
            return Err(Error::InvalidSpec(format!(
                "worker group {} cpu, ram and disk cannot be changed in place",
                desired.name
            )));
        }
        Ok(())
    }
}

pub struct K8sResource;

#[async_trait]
impl Resource for K8sResource {
    type Spec = K8sSpec;
    type Observed = ObservedK8s;

    const KIND: ResourceKind = ResourceKind::K8s;

    fn validate(spec: &K8sSpec) -> Result<()> {
        spec.validate()
    }

    fn references(spec: &K8sSpec) -> Vec<Reference> {
        spec.references()
    }

    async fn fetch(api: &Api, id: u64) -> Result<ObservedK8s> {
        let record: K8sRecord = api.get(GET, Params::new().with("k8sId", id)).await?;
        Ok(ObservedK8s {
            status: parse_status(GET, &record.status)?,
            created_at: parse_time(&record.created_time),
            id: record.id,
            name: record.name,
            rg_id: record.rg_id,
            k8ci_id: record.k8ci_id,
            master_count: record.k8s_groups.masters.num,
            tech_status: record.tech_status,
            worker_groups: record
                .k8s_groups
                .workers
                .into_iter()
                .map(WorkerGroup::from)
                .collect(),
        })
    }

    /// The cluster is created with its first worker group; the rest are
    /// added during provisioning.
    async fn create(api: &Api, spec: &K8sSpec) -> Result<u64> {
        let first = spec.worker_groups.first().ok_or_else(|| {
            Error::InvalidSpec(format!("k8s {} needs at least one worker group", spec.name))
        })?;
        let params = Params::new()
            .with("name", &spec.name)
            .with("rgId", spec.rg_id)
            .with("k8ciId", spec.k8ci_id)
            .with("masterNum", spec.master_count)
            .with("workerGroupName", &first.name)
            .with("workerNum", first.num)
            .with("workerCpu", first.cpu)
            .with("workerRam", first.ram)
            .with("workerDisk", first.disk);

        let audit_id = api
            .post_task(CallClass::Long, "/cloudapi/k8s/create", params)
            .await?;
        info!("Creating k8s {} (task {})", spec.name, audit_id);
        let id = api.poller().wait_for_id(&audit_id).await?;
        info!("Created k8s {} ({})", spec.name, id);
        Ok(id)
    }

    async fn provision(
        api: &Api,
        id: u64,
        spec: &K8sSpec,
        warnings: &mut Warnings,
    ) -> Result<()> {
        let observed = Self::fetch(api, id).await?;
        let delta = diff(&spec.worker_groups, &observed.worker_groups).without_removals();
        let ops = WorkerGroupOps { api, k8s_id: id };
        apply(&ops, &delta, Tier::BestEffort, warnings).await?;

        if !spec.enabled {
            toggle(api, ResourceKind::K8s, id, "disable").await?;
        }
        Ok(())
    }

    async fn reconcile(
        api: &Api,
        observed: &ObservedK8s,
        spec: &K8sSpec,
        _prior: Option<&K8sSpec>,
        warnings: &mut Warnings,
    ) -> Result<()> {
        let id = observed.id;
        let enabled = observed.status.is_enabled();

        if spec.enabled && !enabled {
            toggle(api, ResourceKind::K8s, id, "enable").await?;
        }

        if observed.name != spec.name {
            api.post(
                CallClass::Short,
                "/cloudapi/k8s/update",
                Params::new().with("k8sId", id).with("name", &spec.name),
            )
            .await?;
        }
        if observed.master_count != spec.master_count {
            warnings.push(
                format!("k8s {} masters", id),
                Error::InvalidSpec(format!(
                    "master count cannot change from {} to {}",
                    observed.master_count, spec.master_count
                )),
            );
        }

        let ops = WorkerGroupOps { api, k8s_id: id };
        apply(
            &ops,
            &diff(&spec.worker_groups, &observed.worker_groups),
            Tier::BestEffort,
            warnings,
        )
        .await?;

        if !spec.enabled && enabled {
            toggle(api, ResourceKind::K8s, id, "disable").await?;
        }
        Ok(())
    }

    async fn delete(api: &Api, id: u64, policy: DeletePolicy) -> Result<()> {
        info!("Deleting k8s {} (permanently: {})", id, policy.permanently);
        let audit_id = api
            .post_task(
                CallClass::Long,
                "/cloudapi/k8s/delete",
                Params::new()
                    .with("k8sId", id)
                    .with("permanently", policy.permanently),
            )
            .await?;
        api.poller().wait(&audit_id).await.map(|_| ())
    }
}
