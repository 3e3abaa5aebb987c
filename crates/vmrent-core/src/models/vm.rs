//! Virtual machines and runtime cost.

use serde::{Deserialize, Serialize};

/// A VM owned by the signed-in user.
///
/// The API returns the stored VM document; fields not modeled here are kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vm {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub disk_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cpu_count: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Vm {
    /// Best available label: name, else disk name without extension, else id
    pub fn display_name(&self) -> String {
        if let Some(ref name) = self.name {
            if !name.is_empty() {
                return name.clone();
            }
        }
        if let Some(ref disk) = self.disk_name {
            if let Some(stem) = disk.split('.').next() {
                if !stem.is_empty() {
                    return stem.to_string();
                }
            }
        }
        self.id.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status.as_deref(), Some("running"))
    }
}

/// Launch parameters for `POST /vm/create-vm`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVm {
    /// Disk image in the user's store, with extension
    pub disk_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_path: Option<String>,
    pub memory_mb: u64,
    pub cpu_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl NewVm {
    pub fn new(disk_name: impl Into<String>, cpu_count: u32, memory_mb: u64) -> Self {
        Self {
            disk_name: disk_name.into(),
            iso_path: None,
            memory_mb,
            cpu_count,
            display: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmLaunched {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmResources {
    #[serde(default)]
    pub message: String,
    pub cpu_count: u32,
    pub memory_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmDeleted {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub vm_deleted: bool,
    #[serde(default)]
    pub disk_deleted: bool,
    #[serde(default)]
    pub disk_name: Option<String>,
}

/// Billing granularity of a runtime credit deduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeductionPeriod {
    Second,
    Minute,
    Hour,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditDeduction {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub deducted: f64,
    #[serde(default)]
    pub previous_balance: f64,
    pub new_balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmList {
    #[serde(default)]
    pub vms: Vec<Vm>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStats {
    #[serde(default)]
    pub vms: Vec<Vm>,
    #[serde(default)]
    pub current_total_cost: f64,
    #[serde(default)]
    pub billing_history: Vec<BillingEntry>,
}
