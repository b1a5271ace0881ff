//! Desired-state records
//!
//! Typed desired specs per resource kind and the items of their keyed
//! collections. Observed snapshots reuse the same item records, filling in
//! the server-assigned ids the desired side leaves empty.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::keyed::Keyed;
use crate::types::{default_true, RefKind, Reference};
use crate::{Error, Result};

/// Network type of a compute attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetType {
    Vins,
    Extnet,
}

impl NetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetType::Vins => "VINS",
            NetType::Extnet => "EXTNET",
        }
    }

    pub fn ref_kind(&self) -> RefKind {
        match self {
            NetType::Vins => RefKind::Vins,
            NetType::Extnet => RefKind::Extnet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    Compute,
    Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RulePolicy {
    Recommended,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleMode {
    Eq,
    Ne,
    Any,
}

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Compute => "compute",
            Topology::Node => "node",
        }
    }
}

impl RulePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RulePolicy::Recommended => "RECOMMENDED",
            RulePolicy::Required => "REQUIRED",
        }
    }
}

impl RuleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleMode::Eq => "EQ",
            RuleMode::Ne => "NE",
            RuleMode::Any => "ANY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    Tcp,
    Udp,
}

impl Proto {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::Tcp => "tcp",
            Proto::Udp => "udp",
        }
    }
}

/// Access right granted to a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessType {
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "RCX")]
    ReadWrite,
    #[serde(rename = "ARCXDU")]
    Admin,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Read => "R",
            AccessType::ReadWrite => "RCX",
            AccessType::Admin => "ARCXDU",
        }
    }
}

// ============================================================================
// Collection items
// ============================================================================

/// Extra data disk of a compute instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeDisk {
    pub name: String,
    /// Size in GB
    pub size: u64,
    #[serde(default)]
    pub sep_id: u64,
    #[serde(default)]
    pub pool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl Keyed for ComputeDisk {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn differs(&self, desired: &Self) -> bool {
        self.size != desired.size
    }
}

/// Network interface of a compute instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub net_type: NetType,
    pub net_id: u64,
    /// Requested address; `None` lets the control plane pick one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

impl Keyed for NetworkAttachment {
    type Key = (NetType, u64);

    fn key(&self) -> Self::Key {
        (self.net_type, self.net_id)
    }

    fn differs(&self, desired: &Self) -> bool {
        match &desired.ip_address {
            Some(ip) => self.ip_address.as_deref() != Some(ip.as_str()),
            None => false,
        }
    }
}

/// A tag is identified by its key and value together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Keyed for Tag {
    type Key = (String, String);

    fn key(&self) -> Self::Key {
        (self.key.clone(), self.value.clone())
    }

    fn differs(&self, _desired: &Self) -> bool {
        false
    }
}

/// Affinity or anti-affinity rule. Rules carry no id: the whole rule is the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AffinityRule {
    pub topology: Topology,
    pub policy: RulePolicy,
    pub mode: RuleMode,
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl Keyed for AffinityRule {
    type Key = AffinityRule;

    fn key(&self) -> Self::Key {
        self.clone()
    }

    fn differs(&self, _desired: &Self) -> bool {
        false
    }
}

/// Port forward from the resource group's external address to a compute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForward {
    pub public_port_start: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_port_end: Option<u16>,
    pub local_port: u16,
    pub proto: Proto,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<u64>,
}

impl PortForward {
    pub fn public_port_end(&self) -> u16 {
        self.public_port_end.unwrap_or(self.public_port_start)
    }
}

impl Keyed for PortForward {
    type Key = (u16, Proto);

    fn key(&self) -> Self::Key {
        (self.public_port_start, self.proto)
    }

    fn differs(&self, desired: &Self) -> bool {
        self.public_port_end() != desired.public_port_end() || self.local_port != desired.local_port
    }
}

/// User granted access to a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccess {
    pub username: String,
    pub access_type: AccessType,
}

impl Keyed for UserAccess {
    type Key = String;

    fn key(&self) -> String {
        self.username.clone()
    }

    fn differs(&self, desired: &Self) -> bool {
        self.access_type != desired.access_type
    }
}

/// Compute snapshot. `rollback` is a one-shot request flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeSnapshot {
    pub label: String,
    #[serde(default)]
    pub rollback: bool,
}

impl Keyed for ComputeSnapshot {
    type Key = String;

    fn key(&self) -> String {
        self.label.clone()
    }

    fn differs(&self, desired: &Self) -> bool {
        !self.rollback && desired.rollback
    }
}

/// Destination NAT rule of a ViNS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatRule {
    pub ext_port_start: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_port_end: Option<u16>,
    pub int_ip: String,
    pub int_port: u16,
    pub proto: Proto,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<u64>,
}

impl NatRule {
    pub fn ext_port_end(&self) -> u16 {
        self.ext_port_end.unwrap_or(self.ext_port_start)
    }
}

impl Keyed for NatRule {
    type Key = (u16, Proto);

    fn key(&self) -> Self::Key {
        (self.ext_port_start, self.proto)
    }

    fn differs(&self, desired: &Self) -> bool {
        self.ext_port_end() != desired.ext_port_end()
            || self.int_ip != desired.int_ip
            || self.int_port != desired.int_port
    }
}

/// Worker group of a Kubernetes cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerGroup {
    pub name: String,
    pub num: u32,
    pub cpu: u32,
    /// RAM in MB
    pub ram: u64,
    /// Boot disk size in GB
    pub disk: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worker_ids: Vec<u64>,
}

impl WorkerGroup {
    /// Whether fields other than the worker count differ.
    pub fn shape_differs(&self, desired: &Self) -> bool {
        self.cpu != desired.cpu || self.ram != desired.ram || self.disk != desired.disk
    }
}

impl Keyed for WorkerGroup {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn differs(&self, desired: &Self) -> bool {
        self.num != desired.num || self.shape_differs(desired)
    }
}

// ============================================================================
// Desired specs
// ============================================================================

/// Desired compute instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeSpec {
    pub name: String,
    pub rg_id: u64,
    pub image_id: u64,
    #[serde(default = "default_driver")]
    pub driver: String,
    pub cpu: u32,
    /// RAM in MB
    pub ram: u64,
    /// Boot disk size in GB
    #[serde(default)]
    pub boot_disk_size: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub affinity_label: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub started: bool,
    #[serde(default)]
    pub disks: Vec<ComputeDisk>,
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub affinity_rules: Vec<AffinityRule>,
    #[serde(default)]
    pub anti_affinity_rules: Vec<AffinityRule>,
    #[serde(default)]
    pub port_forwards: Vec<PortForward>,
    #[serde(default)]
    pub users: Vec<UserAccess>,
    #[serde(default)]
    pub snapshots: Vec<ComputeSnapshot>,
}

fn default_driver() -> String {
    "KVM_X86".to_string()
}

impl ComputeSpec {
    pub fn tag_items(&self) -> Vec<Tag> {
        self.tags.iter().map(|(k, v)| Tag::new(k, v)).collect()
    }

    pub fn references(&self) -> Vec<Reference> {
        let mut refs = vec![
            Reference::new(RefKind::ResourceGroup, self.rg_id),
            Reference::new(RefKind::Image, self.image_id),
        ];
        refs.extend(
            self.networks
                .iter()
                .map(|n| Reference::new(n.net_type.ref_kind(), n.net_id)),
        );
        refs
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidSpec("compute name must not be empty".to_string()));
        }
        if self.cpu == 0 || self.ram == 0 {
            return Err(Error::InvalidSpec(format!(
                "compute {} needs cpu and ram greater than zero",
                self.name
            )));
        }
        if let Some(disk) = self.disks.iter().find(|d| d.size == 0) {
            return Err(Error::InvalidSpec(format!("disk {} has zero size", disk.name)));
        }
        Ok(())
    }
}

/// Desired standalone disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub name: String,
    pub account_id: u64,
    pub gid: u64,
    /// Size in GB
    pub size: u64,
    #[serde(default)]
    pub sep_id: u64,
    #[serde(default)]
    pub pool: String,
    #[serde(default)]
    pub description: String,
}

impl DiskSpec {
    pub fn references(&self) -> Vec<Reference> {
        vec![Reference::new(RefKind::Account, self.account_id)]
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidSpec("disk name must not be empty".to_string()));
        }
        if self.size == 0 {
            return Err(Error::InvalidSpec(format!("disk {} has zero size", self.name)));
        }
        Ok(())
    }
}

/// Desired virtual network (ViNS)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VinsSpec {
    pub name: String,
    #[serde(default)]
    pub rg_id: u64,
    #[serde(default)]
    pub account_id: u64,
    #[serde(default)]
    pub ipcidr: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub nat_rules: Vec<NatRule>,
}

impl VinsSpec {
    pub fn references(&self) -> Vec<Reference> {
        vec![
            Reference::new(RefKind::ResourceGroup, self.rg_id),
            Reference::new(RefKind::Account, self.account_id),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidSpec("vins name must not be empty".to_string()));
        }
        if self.rg_id == 0 && self.account_id == 0 {
            return Err(Error::InvalidSpec(format!(
                "vins {} needs either rg_id or account_id",
                self.name
            )));
        }
        Ok(())
    }
}

/// Desired Kubernetes cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sSpec {
    pub name: String,
    pub rg_id: u64,
    pub k8ci_id: u64,
    #[serde(default = "default_master_count")]
    pub master_count: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub worker_groups: Vec<WorkerGroup>,
}

fn default_master_count() -> u32 {
    1
}

impl K8sSpec {
    pub fn references(&self) -> Vec<Reference> {
        vec![
            Reference::new(RefKind::ResourceGroup, self.rg_id),
            Reference::new(RefKind::K8ci, self.k8ci_id),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidSpec("k8s name must not be empty".to_string()));
        }
        if self.worker_groups.is_empty() {
            return Err(Error::InvalidSpec(format!(
                "k8s {} needs at least one worker group",
                self.name
            )));
        }
        Ok(())
    }
}
