//! Data models for the VM rental API.
//!
//! - `Plan`, `UserPlan`, receipts: billing and credits
//! - `User`: the signed-in account
//! - `Vm`, `RuntimeStats`: virtual machines and their running cost
//! - `DiskInfo` and friends: results of disk image operations

pub mod billing;
pub mod disk;
pub mod user;
pub mod vm;

pub use billing::{CreditBalance, Plan, RechargeReceipt, StatusMessage, UserPlan};
pub use disk::{split_disk_name, DiskConverted, DiskCreated, DiskInfo, DiskRenamed, DiskResized};
pub use user::{SignupRequest, User};
pub use vm::{
    BillingEntry, CreditDeduction, DeductionPeriod, NewVm, RuntimeStats, Vm, VmDeleted, VmLaunched,
    VmList, VmResources,
};
