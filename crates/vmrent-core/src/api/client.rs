//! Typed wrappers for the VM rental REST API.
//!
//! Every call goes through the `SessionClient`, so an expired access token is
//! refreshed transparently and callers only ever see a result or an `ApiError`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::transport::{Request, Response};
use super::ApiError;
use crate::auth::{AuthError, Credential, SessionClient};
use crate::models::{
    split_disk_name, CreditBalance, CreditDeduction, DeductionPeriod, DiskConverted, DiskCreated,
    DiskInfo, DiskRenamed, DiskResized, NewVm, Plan, RechargeReceipt, RuntimeStats, SignupRequest,
    StatusMessage, User, UserPlan, Vm, VmDeleted, VmLaunched, VmList, VmResources,
};

#[derive(Debug, Serialize)]
struct ChangePlanRequest<'a> {
    plan_id: &'a str,
}

#[derive(Debug, Serialize)]
struct RechargeRequest {
    amount: f64,
}

#[derive(Debug, Serialize)]
struct VmActionRequest<'a> {
    vm_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_iso: Option<bool>,
}

#[derive(Debug, Serialize)]
struct DeleteVmRequest<'a> {
    vm_id: &'a str,
    delete_disk: bool,
}

#[derive(Debug, Serialize)]
struct UpdateResourcesRequest<'a> {
    vm_id: &'a str,
    cpu_count: u32,
    memory_mb: u64,
}

#[derive(Debug, Serialize)]
struct DeductCreditsRequest<'a> {
    vm_id: &'a str,
    amount: f64,
    deduction_period: DeductionPeriod,
}

#[derive(Debug, Serialize)]
struct CreateDiskRequest<'a> {
    name: &'a str,
    size: &'a str,
    format: &'a str,
}

#[derive(Debug, Serialize)]
struct DiskNameRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct ResizeDiskRequest<'a> {
    name: &'a str,
    resize_by: &'a str,
}

#[derive(Debug, Serialize)]
struct ConvertDiskRequest<'a> {
    source_name: &'a str,
    source_format: &'a str,
    target_format: &'a str,
    target_name: &'a str,
}

#[derive(Debug, Serialize)]
struct RenameDiskRequest<'a> {
    current_name: &'a str,
    new_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignupResponse {
    #[serde(default)]
    message: String,
}

/// API client for the VM rental service.
/// Clone is cheap - it shares the underlying session.
#[derive(Clone)]
pub struct ApiClient {
    session: SessionClient,
}

impl ApiClient {
    pub fn new(session: SessionClient) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionClient {
        &self.session
    }

    /// Decode a successful response, or classify the failure status.
    fn decode<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        if !response.is_success() {
            debug!(status = %response.status, path = path, "API request failed");
            return Err(ApiError::from_status(response.status, &response.body));
        }
        response.json().map_err(|e| {
            error!(path = path, error = %e, "Failed to parse JSON response");
            ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e))
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.session.send(&Request::get(path)).await?;
        Self::decode(response, path)
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let request = Request::post(path).json(body)?;
        let response = self.session.send(&request).await?;
        Self::decode(response, path)
    }

    // ===== Auth =====

    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, AuthError> {
        self.session.login(email, password).await
    }

    pub fn logout(&self) {
        self.session.logout()
    }

    /// Register a new account. Does not sign in.
    pub async fn signup(&self, email: &str, username: &str, password: &str) -> Result<String, ApiError> {
        let body = SignupRequest {
            email: email.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        };
        let request = Request::post("/auth/signup").json(&body)?;
        let response = self.session.send_anonymous(&request).await?;
        let parsed: SignupResponse = Self::decode(response, "/auth/signup")?;
        Ok(parsed.message)
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get("/auth/me").await
    }

    // ===== Billing =====

    pub async fn billing_plans(&self) -> Result<Vec<Plan>, ApiError> {
        self.get("/billing/plans").await
    }

    pub async fn user_plan(&self) -> Result<UserPlan, ApiError> {
        self.get("/billing/user/plan").await
    }

    pub async fn change_plan(&self, plan_id: &str) -> Result<StatusMessage, ApiError> {
        self.post("/billing/user/plan", &ChangePlanRequest { plan_id })
            .await
    }

    /// Buy credits for `amount` dollars
    pub async fn recharge_credits(&self, amount: f64) -> Result<RechargeReceipt, ApiError> {
        self.post("/billing/user/credits/recharge", &RechargeRequest { amount })
            .await
    }

    pub async fn request_enterprise_quote(&self) -> Result<StatusMessage, ApiError> {
        self.post("/billing/enterprise/quote", &serde_json::json!({}))
            .await
    }

    pub async fn user_credits(&self) -> Result<CreditBalance, ApiError> {
        self.get("/billing/user/credits").await
    }

    // ===== Virtual Machines =====

    pub async fn list_vms(&self) -> Result<Vec<Vm>, ApiError> {
        let list: VmList = self.get("/vm/list").await?;
        Ok(list.vms)
    }

    pub async fn runtime_stats(&self) -> Result<RuntimeStats, ApiError> {
        self.get("/vm/stats/runtime").await
    }

    pub async fn start_vm(&self, vm_id: &str, include_iso: bool) -> Result<StatusMessage, ApiError> {
        let body = VmActionRequest {
            vm_id,
            include_iso: Some(include_iso),
        };
        self.post("/vm/start-vm", &body).await
    }

    pub async fn stop_vm(&self, vm_id: &str) -> Result<StatusMessage, ApiError> {
        let body = VmActionRequest {
            vm_id,
            include_iso: None,
        };
        self.post("/vm/stop-vm", &body).await
    }

    /// Launch a VM on a disk created earlier with [`ApiClient::create_disk`]
    pub async fn create_vm(&self, vm: &NewVm) -> Result<VmLaunched, ApiError> {
        self.post("/vm/create-vm", vm).await
    }

    pub async fn delete_vm(&self, vm_id: &str, delete_disk: bool) -> Result<VmDeleted, ApiError> {
        self.post("/vm/delete", &DeleteVmRequest { vm_id, delete_disk })
            .await
    }

    /// Change CPU and memory of a stopped VM
    pub async fn update_vm_resources(
        &self,
        vm_id: &str,
        cpu_count: u32,
        memory_mb: u64,
    ) -> Result<VmResources, ApiError> {
        let body = UpdateResourcesRequest {
            vm_id,
            cpu_count,
            memory_mb,
        };
        self.post("/vm/update-resources", &body).await
    }

    /// Charge `amount` credits of runtime for a running VM
    pub async fn deduct_credits(
        &self,
        vm_id: &str,
        amount: f64,
        period: DeductionPeriod,
    ) -> Result<CreditDeduction, ApiError> {
        let body = DeductCreditsRequest {
            vm_id,
            amount,
            deduction_period: period,
        };
        self.post("/vm/deduct-credits", &body).await
    }

    // ===== Disks =====

    /// Create an empty disk image. `name` has no extension; `size` is like `"10G"`.
    pub async fn create_disk(&self, name: &str, size: &str, format: &str) -> Result<DiskCreated, ApiError> {
        self.post("/vm/create-disk", &CreateDiskRequest { name, size, format })
            .await
    }

    pub async fn disk_info(&self, name: &str) -> Result<DiskInfo, ApiError> {
        self.post("/vm/disk-info", &DiskNameRequest { name }).await
    }

    /// Grow a disk. `resize_by` is a relative size such as `"+5G"`.
    pub async fn resize_disk(&self, name: &str, resize_by: &str) -> Result<DiskResized, ApiError> {
        self.post("/vm/resize-disk", &ResizeDiskRequest { name, resize_by })
            .await
    }

    /// Convert `source_name` to another image format. The source format is
    /// taken from the file extension.
    pub async fn convert_disk(
        &self,
        source_name: &str,
        target_format: &str,
        target_name: &str,
    ) -> Result<DiskConverted, ApiError> {
        let (_, source_format) = split_disk_name(source_name);
        let Some(source_format) = source_format else {
            return Err(ApiError::BadRequest(format!(
                "Cannot tell the format of '{}' without an extension",
                source_name
            )));
        };

        let body = ConvertDiskRequest {
            source_name,
            source_format,
            target_format,
            target_name,
        };
        self.post("/vm/convert-disk", &body).await
    }

    /// Rename a disk. `new_name` has no extension; the server keeps the old one.
    pub async fn rename_disk(&self, current_name: &str, new_name: &str) -> Result<DiskRenamed, ApiError> {
        self.post(
            "/vm/disk/rename",
            &RenameDiskRequest {
                current_name,
                new_name,
            },
        )
        .await
    }
}
