//! Compute instance
//!
//! The richest kind: seven keyed collections, a power-off bracket for
//! changes the control plane only accepts on a stopped instance, and
//! separate enabled/started toggles.
//!
//! Reconciliation order:
//! 1. enable (when the spec wants it enabled and it is not)
//! 2. scalar attributes, boot disk growth
//! 3. offline set inside a stop/start bracket: disk removals, network
//!    changes, cpu/ram resize, snapshot rollbacks
//! 4. online set: disk adds and resizes, tags, affinity label and rules,
//!    port forwards, users, snapshot create/delete
//! 5. started toggle
//! 6. disable

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use driftless_common::{
    AccessType, AffinityRule, ComputeDisk, ComputeSnapshot, ComputeSpec, DeletePolicy, Error,
    LifecycleStatus, NetType, NetworkAttachment, PortForward, Proto, Reference, ResourceKind,
    Result, RuleMode, RulePolicy, Tag, Topology, UserAccess,
};

use super::{parse_status, parse_time, toggle, Listing, Observed, Resource};
use crate::client::{Api, CallClass, Params};
use crate::diff::{attach_only, diff, Delta};
use crate::sequencer::{apply, elide_overwritten, CollectionOps, PowerBracket, PowerControl, Tier};
use crate::warnings::Warnings;

const GET: &str = "/cloudapi/compute/get";
const PFW_LIST: &str = "/cloudapi/compute/pfwList";
const USER_LIST: &str = "/cloudapi/compute/userList";
const SNAPSHOT_LIST: &str = "/cloudapi/compute/snapshotList";

const BOOT_DISK: &str = "B";
const RUNNING: &str = "STARTED";
const STARTING: &str = "STARTING";

// ============================================================================
// Wire records
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRecord {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    rg_id: u64,
    #[serde(default)]
    image_id: u64,
    #[serde(default)]
    driver: String,
    #[serde(default)]
    cpus: u32,
    #[serde(default)]
    ram: u64,
    #[serde(default)]
    bootdisk_size: u64,
    #[serde(default)]
    desc: String,
    status: String,
    #[serde(default)]
    tech_status: String,
    #[serde(default)]
    created_time: serde_json::Value,
    #[serde(default)]
    updated_time: serde_json::Value,
    #[serde(default)]
    disks: Vec<DiskRecord>,
    #[serde(default)]
    interfaces: Vec<InterfaceRecord>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    affinity_label: String,
    #[serde(default)]
    affinity_rules: Vec<RuleRecord>,
    #[serde(default)]
    anti_affinity_rules: Vec<RuleRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiskRecord {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size_max: u64,
    #[serde(default, rename = "type")]
    disk_type: String,
    #[serde(default)]
    sep_id: u64,
    #[serde(default)]
    pool: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterfaceRecord {
    net_type: String,
    net_id: u64,
    #[serde(default)]
    ip_address: String,
    #[serde(default)]
    mac: String,
}

#[derive(Debug, Deserialize)]
struct RuleRecord {
    topology: Topology,
    policy: RulePolicy,
    mode: RuleMode,
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortForwardRecord {
    id: u64,
    public_port_start: u16,
    #[serde(default)]
    public_port_end: Option<u16>,
    local_port: u16,
    protocol: Proto,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserListRecord {
    #[serde(default)]
    compute_acl: Vec<AclRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AclRecord {
    user_group_id: String,
    right: AccessType,
}

#[derive(Debug, Deserialize)]
struct SnapshotRecord {
    label: String,
}

impl From<RuleRecord> for AffinityRule {
    fn from(r: RuleRecord) -> Self {
        AffinityRule {
            topology: r.topology,
            policy: r.policy,
            mode: r.mode,
            key: r.key,
            value: r.value,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn net_type(raw: &str) -> Option<NetType> {
    match raw {
        "VINS" => Some(NetType::Vins),
        "EXTNET" => Some(NetType::Extnet),
        _ => None,
    }
}

// ============================================================================
// Observed shape
// ============================================================================

/// Observed compute instance
#[derive(Debug, Clone, Serialize)]
pub struct ObservedCompute {
    pub id: u64,
    pub name: String,
    pub rg_id: u64,
    pub image_id: u64,
    pub driver: String,
    pub cpu: u32,
    pub ram: u64,
    pub boot_disk_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_disk_id: Option<u64>,
    pub description: String,
    pub affinity_label: String,
    pub status: LifecycleStatus,
    pub tech_status: String,
    /// Data disks; the boot disk is reported separately
    pub disks: Vec<ComputeDisk>,
    pub networks: Vec<NetworkAttachment>,
    pub tags: BTreeMap<String, String>,
    pub affinity_rules: Vec<AffinityRule>,
    pub anti_affinity_rules: Vec<AffinityRule>,
    pub port_forwards: Vec<PortForward>,
    pub users: Vec<UserAccess>,
    pub snapshots: Vec<ComputeSnapshot>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ObservedCompute {
    /// A starting instance counts as running: it must be stopped before
    /// offline changes and needs no second start.
    pub fn is_running(&self) -> bool {
        matches!(self.tech_status.as_str(), RUNNING | STARTING)
    }

    pub fn tag_items(&self) -> Vec<Tag> {
        self.tags.iter().map(|(k, v)| Tag::new(k, v)).collect()
    }

    /// Observed snapshots carry no rollback flag; take it from the
    /// previously applied spec so a rollback request fires once.
    fn snapshots_after(&self, prior: Option<&ComputeSpec>) -> Vec<ComputeSnapshot> {
        self.snapshots
            .iter()
            .map(|snapshot| ComputeSnapshot {
                label: snapshot.label.clone(),
                rollback: prior
                    .and_then(|p| p.snapshots.iter().rev().find(|s| s.label == snapshot.label))
                    .map(|s| s.rollback)
                    .unwrap_or(false),
            })
            .collect()
    }
}

impl Observed for ObservedCompute {
    fn id(&self) -> u64 {
        self.id
    }

    fn status(&self) -> LifecycleStatus {
        self.status
    }
}

// ============================================================================
// Collection operations
// ============================================================================

struct ComputeOps<'a> {
    api: &'a Api,
    id: u64,
}

impl ComputeOps<'_> {
    fn params(&self) -> Params {
        Params::new().with("computeId", self.id)
    }

    async fn post(&self, action: &str, params: Params) -> Result<()> {
        self.api
            .post(CallClass::Short, &ResourceKind::Compute.endpoint(action), params)
            .await
            .map(|_| ())
    }

    async fn post_long(&self, action: &str, params: Params) -> Result<()> {
        self.api
            .post(CallClass::Long, &ResourceKind::Compute.endpoint(action), params)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl PowerControl for ComputeOps<'_> {
    async fn stop(&self) -> Result<()> {
        toggle(self.api, ResourceKind::Compute, self.id, "stop").await
    }

    async fn start(&self) -> Result<()> {
        toggle(self.api, ResourceKind::Compute, self.id, "start").await
    }
}

#[async_trait]
impl CollectionOps<ComputeDisk> for ComputeOps<'_> {
    fn label(&self) -> &'static str {
        "disk"
    }

    fn describe(&self, disk: &ComputeDisk) -> String {
        format!("{} ({}G)", disk.name, disk.size)
    }

    async fn add(&self, disk: &ComputeDisk) -> Result<()> {
        let params = self
            .params()
            .with("diskName", &disk.name)
            .with("size", disk.size)
            .with_opt("sepId", (disk.sep_id != 0).then_some(disk.sep_id))
            .with_opt("pool", (!disk.pool.is_empty()).then_some(&disk.pool));
        self.post_long("diskAdd", params).await
    }

    async fn remove(&self, disk: &ComputeDisk) -> Result<()> {
        let disk_id = disk
            .id
            .ok_or_else(|| Error::InvalidSpec(format!("disk {} has no server id", disk.name)))?;
        self.post_long(
            "diskDel",
            self.params().with("diskId", disk_id).with("permanently", true),
        )
        .await
    }

    /// Disks only grow.
    async fn update(&self, observed: &ComputeDisk, desired: &ComputeDisk) -> Result<()> {
        if desired.size < observed.size {
            return Err(Error::InvalidSpec(format!(
                "cannot shrink disk {} from {}G to {}G",
                observed.name, observed.size, desired.size
            )));
        }
        let disk_id = observed
            .id
            .ok_or_else(|| Error::InvalidSpec(format!("disk {} has no server id", observed.name)))?;
        self.api
            .post(
                CallClass::Long,
                "/cloudapi/disks/resize2",
                Params::new().with("diskId", disk_id).with("size", desired.size),
            )
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl CollectionOps<NetworkAttachment> for ComputeOps<'_> {
    fn label(&self) -> &'static str {
        "network"
    }

    fn describe(&self, net: &NetworkAttachment) -> String {
        format!("{} {}", net.net_type.as_str(), net.net_id)
    }

    async fn add(&self, net: &NetworkAttachment) -> Result<()> {
        let params = self
            .params()
            .with("netType", net.net_type.as_str())
            .with("netId", net.net_id)
            .with_opt("ipAddr", net.ip_address.as_ref());
        self.post("netAttach", params).await
    }

    async fn remove(&self, net: &NetworkAttachment) -> Result<()> {
        let params = self
            .params()
            .with_opt("ipAddr", net.ip_address.as_ref())
            .with_opt("mac", net.mac.as_ref());
        self.post("netDetach", params).await
    }
}

#[async_trait]
impl CollectionOps<Tag> for ComputeOps<'_> {
    fn label(&self) -> &'static str {
        "tag"
    }

    fn describe(&self, tag: &Tag) -> String {
        format!("{}={}", tag.key, tag.value)
    }

    async fn add(&self, tag: &Tag) -> Result<()> {
        self.post(
            "tagAdd",
            self.params().with("key", &tag.key).with("value", &tag.value),
        )
        .await
    }

    async fn remove(&self, tag: &Tag) -> Result<()> {
        self.post("tagRemove", self.params().with("key", &tag.key))
            .await
    }
}

#[async_trait]
impl CollectionOps<PortForward> for ComputeOps<'_> {
    fn label(&self) -> &'static str {
        "port forward"
    }

    fn describe(&self, pfw: &PortForward) -> String {
        format!(
            "{}-{}/{} -> {}",
            pfw.public_port_start,
            pfw.public_port_end(),
            pfw.proto.as_str(),
            pfw.local_port
        )
    }

    async fn add(&self, pfw: &PortForward) -> Result<()> {
        let params = self
            .params()
            .with("publicPortStart", pfw.public_port_start)
            .with("publicPortEnd", pfw.public_port_end())
            .with("localBasePort", pfw.local_port)
            .with("proto", pfw.proto.as_str());
        self.post("pfwAdd", params).await
    }

    async fn remove(&self, pfw: &PortForward) -> Result<()> {
        let params = self
            .params()
            .with_opt("ruleId", pfw.rule_id)
            .with("publicPortStart", pfw.public_port_start)
            .with("publicPortEnd", pfw.public_port_end())
            .with("localBasePort", pfw.local_port)
            .with("proto", pfw.proto.as_str());
        self.post("pfwDel", params).await
    }
}

#[async_trait]
impl CollectionOps<UserAccess> for ComputeOps<'_> {
    fn label(&self) -> &'static str {
        "user"
    }

    fn describe(&self, user: &UserAccess) -> String {
        format!("{} ({})", user.username, user.access_type.as_str())
    }

    async fn add(&self, user: &UserAccess) -> Result<()> {
        self.post(
            "userGrant",
            self.params()
                .with("userName", &user.username)
                .with("accesstype", user.access_type.as_str()),
        )
        .await
    }

    async fn remove(&self, user: &UserAccess) -> Result<()> {
        self.post("userRevoke", self.params().with("userName", &user.username))
            .await
    }

    async fn update(&self, _observed: &UserAccess, desired: &UserAccess) -> Result<()> {
        self.post(
            "userUpdate",
            self.params()
                .with("userName", &desired.username)
                .with("accesstype", desired.access_type.as_str()),
        )
        .await
    }
}

#[async_trait]
impl CollectionOps<ComputeSnapshot> for ComputeOps<'_> {
    fn label(&self) -> &'static str {
        "snapshot"
    }

    fn describe(&self, snapshot: &ComputeSnapshot) -> String {
        snapshot.label.clone()
    }

    async fn add(&self, snapshot: &ComputeSnapshot) -> Result<()> {
        self.post_long("snapshotCreate", self.params().with("label", &snapshot.label))
            .await
    }

    async fn remove(&self, snapshot: &ComputeSnapshot) -> Result<()> {
        self.post_long("snapshotDelete", self.params().with("label", &snapshot.label))
            .await
    }

    /// The only snapshot update is a requested rollback.
    async fn update(&self, _observed: &ComputeSnapshot, desired: &ComputeSnapshot) -> Result<()> {
        self.post_long("snapshotRollback", self.params().with("label", &desired.label))
            .await
    }
}

/// Affinity and anti-affinity rules share one shape but not their endpoints.
struct RuleOps<'a> {
    compute: &'a ComputeOps<'a>,
    anti: bool,
}

impl RuleOps<'_> {
    fn action(&self, verb: &str) -> String {
        if self.anti {
            format!("antiAffinityRule{}", verb)
        } else {
            format!("affinityRule{}", verb)
        }
    }

    fn params(&self, rule: &AffinityRule) -> Params {
        self.compute
            .params()
            .with("topology", rule.topology.as_str())
            .with("policy", rule.policy.as_str())
            .with("mode", rule.mode.as_str())
            .with("key", &rule.key)
            .with("value", &rule.value)
    }
}

#[async_trait]
impl CollectionOps<AffinityRule> for RuleOps<'_> {
    fn label(&self) -> &'static str {
        if self.anti {
            "anti-affinity rule"
        } else {
            "affinity rule"
        }
    }

    fn describe(&self, rule: &AffinityRule) -> String {
        format!(
            "{} {} {} {}={}",
            rule.topology.as_str(),
            rule.policy.as_str(),
            rule.mode.as_str(),
            rule.key,
            rule.value
        )
    }

    async fn add(&self, rule: &AffinityRule) -> Result<()> {
        self.compute.post(&self.action("Add"), self.params(rule)).await
    }

    async fn remove(&self, rule: &AffinityRule) -> Result<()> {
        self.compute.post(&self.action("Remove"), self.params(rule)).await
    }
}

/// Tag values are overwritten by `tagAdd`, so a key that is re-added is
/// never removed first.
fn tag_delta(desired: &[Tag], observed: &[Tag]) -> Delta<Tag> {
    elide_overwritten(diff(desired, observed), |tag: &Tag| tag.key.clone())
}

fn create_endpoint(driver: &str) -> Result<&'static str> {
    match driver {
        "KVM_X86" => Ok("/cloudapi/kvmx86/create"),
        "KVM_PPC" => Ok("/cloudapi/kvmppc/create"),
        other => Err(Error::InvalidSpec(format!("unsupported compute driver '{}'", other))),
    }
}

async fn set_affinity_label(ops: &ComputeOps<'_>, label: &str) -> Result<()> {
    if label.is_empty() {
        ops.post("affinityLabelRemove", ops.params()).await
    } else {
        ops.post("affinityLabelSet", ops.params().with("affinityLabel", label))
            .await
    }
}

// ============================================================================
// Resource
// ============================================================================

pub struct ComputeResource;

impl ComputeResource {
    /// Changes that need the instance powered off.
    async fn apply_offline(
        ops: &ComputeOps<'_>,
        disks: &Delta<ComputeDisk>,
        networks: &Delta<NetworkAttachment>,
        resize: Option<(u32, u64)>,
        rollbacks: &Delta<ComputeSnapshot>,
        warnings: &mut Warnings,
    ) -> Result<()> {
        apply(ops, disks, Tier::BestEffort, warnings).await?;
        apply(ops, networks, Tier::BestEffort, warnings).await?;
        if let Some((cpu, ram)) = resize {
            info!("Resizing compute {} to {} cpu, {}M ram", ops.id, cpu, ram);
            ops.post_long(
                "resize",
                ops.params()
                    .with("cpu", cpu)
                    .with("ram", ram)
                    .with("force", true),
            )
            .await?;
        }
        apply(ops, rollbacks, Tier::BestEffort, warnings).await?;
        Ok(())
    }
}

#[async_trait]
impl Resource for ComputeResource {
    type Spec = ComputeSpec;
    type Observed = ObservedCompute;

    const KIND: ResourceKind = ResourceKind::Compute;

    fn validate(spec: &ComputeSpec) -> Result<()> {
        spec.validate()?;
        create_endpoint(&spec.driver).map(|_| ())
    }

    fn references(spec: &ComputeSpec) -> Vec<Reference> {
        spec.references()
    }

    async fn fetch(api: &Api, id: u64) -> Result<ObservedCompute> {
        let by_id = || Params::new().with("computeId", id);

        let record: ComputeRecord = api.get(GET, by_id()).await?;
        let status = parse_status(GET, &record.status)?;
        let pfws: Listing<PortForwardRecord> = api.get(PFW_LIST, by_id()).await?;
        let users: UserListRecord = api.get(USER_LIST, by_id()).await?;
        let snapshots: Listing<SnapshotRecord> = api.get(SNAPSHOT_LIST, by_id()).await?;

        let (boot, data): (Vec<DiskRecord>, Vec<DiskRecord>) = record
            .disks
            .into_iter()
            .partition(|d| d.disk_type == BOOT_DISK);
        let boot = boot.into_iter().next();

        Ok(ObservedCompute {
            id: record.id,
            name: record.name,
            rg_id: record.rg_id,
            image_id: record.image_id,
            driver: record.driver,
            cpu: record.cpus,
            ram: record.ram,
            boot_disk_size: boot.as_ref().map_or(record.bootdisk_size, |d| d.size_max),
            boot_disk_id: boot.map(|d| d.id),
            description: record.desc,
            affinity_label: record.affinity_label,
            status,
            tech_status: record.tech_status,
            disks: data
                .into_iter()
                .map(|d| ComputeDisk {
                    name: d.name,
                    size: d.size_max,
                    sep_id: d.sep_id,
                    pool: d.pool,
                    id: Some(d.id),
                })
                .collect(),
            networks: record
                .interfaces
                .into_iter()
                .filter_map(|i| {
                    Some(NetworkAttachment {
                        net_type: net_type(&i.net_type)?,
                        net_id: i.net_id,
                        ip_address: non_empty(i.ip_address),
                        mac: non_empty(i.mac),
                    })
                })
                .collect(),
            tags: record.tags,
            affinity_rules: record.affinity_rules.into_iter().map(Into::into).collect(),
            anti_affinity_rules: record
                .anti_affinity_rules
                .into_iter()
                .map(Into::into)
                .collect(),
            port_forwards: pfws
                .into_vec()
                .into_iter()
                .map(|p| PortForward {
                    public_port_start: p.public_port_start,
                    public_port_end: p.public_port_end,
                    local_port: p.local_port,
                    proto: p.protocol,
                    rule_id: Some(p.id),
                })
                .collect(),
            users: users
                .compute_acl
                .into_iter()
                .map(|acl| UserAccess {
                    username: acl.user_group_id,
                    access_type: acl.right,
                })
                .collect(),
            snapshots: snapshots
                .into_vec()
                .into_iter()
                .map(|s| ComputeSnapshot {
                    label: s.label,
                    rollback: false,
                })
                .collect(),
            created_at: parse_time(&record.created_time),
            updated_at: parse_time(&record.updated_time),
        })
    }

    /// Created stopped and without networks; both are applied during
    /// provisioning.
    async fn create(api: &Api, spec: &ComputeSpec) -> Result<u64> {
        let path = create_endpoint(&spec.driver)?;
        let params = Params::new()
            .with("rgId", spec.rg_id)
            .with("name", &spec.name)
            .with("cpu", spec.cpu)
            .with("ram", spec.ram)
            .with("imageId", spec.image_id)
            .with_opt(
                "bootDisk",
                (spec.boot_disk_size != 0).then_some(spec.boot_disk_size),
            )
            .with("netType", "NONE")
            .with("start", false)
            .with_opt(
                "desc",
                (!spec.description.is_empty()).then_some(&spec.description),
            );

        let id = api.post_id(CallClass::Long, path, params).await?;
        info!("Created compute {} ({})", spec.name, id);
        Ok(id)
    }

    async fn provision(
        api: &Api,
        id: u64,
        spec: &ComputeSpec,
        warnings: &mut Warnings,
    ) -> Result<()> {
        let ops = ComputeOps { api, id };

        apply(&ops, &attach_only(&spec.disks), Tier::Mandatory, warnings).await?;
        apply(&ops, &attach_only(&spec.networks), Tier::Mandatory, warnings).await?;

        if !spec.affinity_label.is_empty() {
            set_affinity_label(&ops, &spec.affinity_label).await?;
        }

        apply(&ops, &attach_only(&spec.tag_items()), Tier::BestEffort, warnings).await?;
        let rules = RuleOps { compute: &ops, anti: false };
        apply(&rules, &attach_only(&spec.affinity_rules), Tier::BestEffort, warnings).await?;
        let anti_rules = RuleOps { compute: &ops, anti: true };
        apply(
            &anti_rules,
            &attach_only(&spec.anti_affinity_rules),
            Tier::BestEffort,
            warnings,
        )
        .await?;
        apply(&ops, &attach_only(&spec.port_forwards), Tier::BestEffort, warnings).await?;
        apply(&ops, &attach_only(&spec.users), Tier::BestEffort, warnings).await?;
        apply(&ops, &attach_only(&spec.snapshots), Tier::BestEffort, warnings).await?;

        if spec.started {
            ops.start().await?;
        }
        if !spec.enabled {
            toggle(api, ResourceKind::Compute, id, "disable").await?;
        }
        Ok(())
    }

    async fn reconcile(
        api: &Api,
        observed: &ObservedCompute,
        spec: &ComputeSpec,
        prior: Option<&ComputeSpec>,
        warnings: &mut Warnings,
    ) -> Result<()> {
        let id = observed.id;
        let ops = ComputeOps { api, id };
        let enabled = observed.status.is_enabled();
        let mut running = observed.is_running();

        if spec.enabled && !enabled {
            toggle(api, ResourceKind::Compute, id, "enable").await?;
        }

        if observed.name != spec.name || observed.description != spec.description {
            ops.post(
                "update",
                ops.params()
                    .with("name", &spec.name)
                    .with("desc", &spec.description),
            )
            .await?;
        }

        let mut immutable = Vec::new();
        if observed.rg_id != spec.rg_id {
            immutable.push("rg_id");
        }
        if observed.image_id != spec.image_id {
            immutable.push("image_id");
        }
        if !observed.driver.is_empty() && observed.driver != spec.driver {
            immutable.push("driver");
        }
        if !immutable.is_empty() {
            warnings.push(
                format!("compute {} replace", id),
                Error::InvalidSpec(format!(
                    "{} cannot be changed in place",
                    immutable.join(", ")
                )),
            );
        }

        if spec.boot_disk_size > observed.boot_disk_size {
            match observed.boot_disk_id {
                Some(disk_id) => {
                    info!(
                        "Growing boot disk of compute {} to {}G",
                        id, spec.boot_disk_size
                    );
                    api.post(
                        CallClass::Long,
                        "/cloudapi/disks/resize2",
                        Params::new()
                            .with("diskId", disk_id)
                            .with("size", spec.boot_disk_size),
                    )
                    .await?;
                }
                None => warnings.push(
                    format!("compute {} boot disk resize", id),
                    Error::InvalidSpec("boot disk not reported by the control plane".to_string()),
                ),
            }
        } else if spec.boot_disk_size != 0 && spec.boot_disk_size < observed.boot_disk_size {
            warnings.push(
                format!("compute {} boot disk resize", id),
                Error::InvalidSpec(format!(
                    "cannot shrink boot disk from {}G to {}G",
                    observed.boot_disk_size, spec.boot_disk_size
                )),
            );
        }

        let disks = diff(&spec.disks, &observed.disks);
        let networks = diff(&spec.networks, &observed.networks);
        let snapshots = diff(&spec.snapshots, &observed.snapshots_after(prior));
        let resize = (observed.cpu != spec.cpu || observed.ram != spec.ram)
            .then_some((spec.cpu, spec.ram));

        let disk_removals = disks.clone().removals();
        let rollbacks = snapshots.clone().updates();

        let offline = !disk_removals.is_empty()
            || !networks.is_empty()
            || resize.is_some()
            || !rollbacks.is_empty();
        if offline && running && !spec.started {
            // Stays stopped afterwards, so no bracket restart.
            ops.stop().await?;
            running = false;
        }
        if offline {
            let bracket = PowerBracket::enter(&ops, running).await?;
            let outcome = Self::apply_offline(
                &ops,
                &disk_removals,
                &networks,
                resize,
                &rollbacks,
                warnings,
            )
            .await;
            bracket.exit(outcome, warnings).await?;
        } else {
            debug!("Compute {} needs no offline changes", id);
        }

        apply(&ops, &disks.without_removals(), Tier::BestEffort, warnings).await?;
        apply(
            &ops,
            &tag_delta(&spec.tag_items(), &observed.tag_items()),
            Tier::BestEffort,
            warnings,
        )
        .await?;

        if observed.affinity_label != spec.affinity_label {
            set_affinity_label(&ops, &spec.affinity_label).await?;
        }
        let rules = RuleOps { compute: &ops, anti: false };
        apply(
            &rules,
            &diff(&spec.affinity_rules, &observed.affinity_rules),
            Tier::BestEffort,
            warnings,
        )
        .await?;
        let anti_rules = RuleOps { compute: &ops, anti: true };
        apply(
            &anti_rules,
            &diff(&spec.anti_affinity_rules, &observed.anti_affinity_rules),
            Tier::BestEffort,
            warnings,
        )
        .await?;

        apply(
            &ops,
            &diff(&spec.port_forwards, &observed.port_forwards),
            Tier::BestEffort,
            warnings,
        )
        .await?;
        apply(
            &ops,
            &diff(&spec.users, &observed.users),
            Tier::BestEffort,
            warnings,
        )
        .await?;
        apply(&ops, &snapshots.without_updates(), Tier::BestEffort, warnings).await?;

        match (spec.started, running) {
            (true, false) => ops.start().await?,
            (false, true) => ops.stop().await?,
            _ => {}
        }

        if !spec.enabled && enabled {
            toggle(api, ResourceKind::Compute, id, "disable").await?;
        }
        Ok(())
    }

    async fn delete(api: &Api, id: u64, policy: DeletePolicy) -> Result<()> {
        info!("Deleting compute {} (permanently: {})", id, policy.permanently);
        api.post(
            CallClass::Long,
            "/cloudapi/compute/delete",
            Params::new()
                .with("computeId", id)
                .with("permanently", policy.permanently)
                .with("detachDisks", policy.detach_dependents),
        )
        .await
        .map(|_| ())
    }
}
