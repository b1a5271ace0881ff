//! Core types for driftless

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Compute,
    Disk,
    Vins,
    K8s,
}

impl ResourceKind {
    /// Path segment of the kind's endpoints under `/cloudapi/`.
    pub fn api_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Compute => "compute",
            ResourceKind::Disk => "disks",
            ResourceKind::Vins => "vins",
            ResourceKind::K8s => "k8s",
        }
    }

    /// Name of the id parameter the kind's endpoints expect.
    pub fn id_param(&self) -> &'static str {
        match self {
            ResourceKind::Compute => "computeId",
            ResourceKind::Disk => "diskId",
            ResourceKind::Vins => "vinsId",
            ResourceKind::K8s => "k8sId",
        }
    }

    /// Disks have no enable/disable toggle.
    pub fn supports_enable(&self) -> bool {
        !matches!(self, ResourceKind::Disk)
    }

    pub fn endpoint(&self, action: &str) -> String {
        format!("/cloudapi/{}/{}", self.api_prefix(), action)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Compute => write!(f, "compute"),
            ResourceKind::Disk => write!(f, "disk"),
            ResourceKind::Vins => write!(f, "vins"),
            ResourceKind::K8s => write!(f, "k8s"),
        }
    }
}

/// Control-plane-reported lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    Modeled,
    Creating,
    Created,
    Enabled,
    Enabling,
    Disabled,
    Disabling,
    Deleting,
    Deleted,
    Destroying,
    Destroyed,
    Restoring,
    Reconfiguring,
}

impl LifecycleStatus {
    pub const ALL: [LifecycleStatus; 13] = [
        LifecycleStatus::Modeled,
        LifecycleStatus::Creating,
        LifecycleStatus::Created,
        LifecycleStatus::Enabled,
        LifecycleStatus::Enabling,
        LifecycleStatus::Disabled,
        LifecycleStatus::Disabling,
        LifecycleStatus::Deleting,
        LifecycleStatus::Deleted,
        LifecycleStatus::Destroying,
        LifecycleStatus::Destroyed,
        LifecycleStatus::Restoring,
        LifecycleStatus::Reconfiguring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Modeled => "MODELED",
            LifecycleStatus::Creating => "CREATING",
            LifecycleStatus::Created => "CREATED",
            LifecycleStatus::Enabled => "ENABLED",
            LifecycleStatus::Enabling => "ENABLING",
            LifecycleStatus::Disabled => "DISABLED",
            LifecycleStatus::Disabling => "DISABLING",
            LifecycleStatus::Deleting => "DELETING",
            LifecycleStatus::Deleted => "DELETED",
            LifecycleStatus::Destroying => "DESTROYING",
            LifecycleStatus::Destroyed => "DESTROYED",
            LifecycleStatus::Restoring => "RESTORING",
            LifecycleStatus::Reconfiguring => "RECONFIGURING",
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, LifecycleStatus::Enabled | LifecycleStatus::Enabling)
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status string outside the known vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown lifecycle status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for LifecycleStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Kind of a sibling resource referenced by a desired spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    ResourceGroup,
    Account,
    Image,
    Vins,
    Extnet,
    K8ci,
    Disk,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::ResourceGroup => write!(f, "resource group"),
            RefKind::Account => write!(f, "account"),
            RefKind::Image => write!(f, "image"),
            RefKind::Vins => write!(f, "vins"),
            RefKind::Extnet => write!(f, "extnet"),
            RefKind::K8ci => write!(f, "k8ci"),
            RefKind::Disk => write!(f, "disk"),
        }
    }
}

/// A cross-reference that must exist before a mutating call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub kind: RefKind,
    pub id: u64,
}

impl Reference {
    pub fn new(kind: RefKind, id: u64) -> Self {
        Self { kind, id }
    }
}

/// Task status as reported by the tasks endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl TaskStatus {
    /// Numeric task result, typically the id of a created resource.
    pub fn result_id(&self) -> Option<u64> {
        match &self.result {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Array(items) => items.first().and_then(|v| v.as_u64()),
            _ => None,
        }
    }
}

/// Policy flags for a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePolicy {
    /// Skip the recycle bin; the resource cannot be restored afterwards.
    #[serde(default)]
    pub permanently: bool,
    /// Detach dependents (disks, networks) before deleting.
    #[serde(default = "default_true")]
    pub detach_dependents: bool,
}

impl Default for DeletePolicy {
    fn default() -> Self {
        Self {
            permanently: false,
            detach_dependents: true,
        }
    }
}

impl DeletePolicy {
    /// Policy used when cleaning up a partially created resource.
    pub fn compensating() -> Self {
        Self {
            permanently: true,
            detach_dependents: true,
        }
    }
}

pub(crate) fn default_true() -> bool {
    true
}
