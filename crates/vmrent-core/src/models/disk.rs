//! Virtual disk images in the user's disk store.

use serde::{Deserialize, Serialize};

/// Returned by `POST /vm/create-disk`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskCreated {
    #[serde(default)]
    pub message: String,
    /// Server-side path of the new image
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

/// `qemu-img info` output for one disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub disk: Option<String>,
    #[serde(default)]
    pub info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskResized {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub disk: Option<String>,
    #[serde(default)]
    pub resize_by: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConverted {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    /// VMs whose disk reference now points at the converted image
    #[serde(default)]
    pub vms_updated: u32,
    #[serde(default)]
    pub info: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskRenamed {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub vms_updated: u32,
}

/// File name stem and extension of a disk image, e.g. `("ubuntu", "qcow2")`
pub fn split_disk_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}
