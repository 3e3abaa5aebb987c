//! Billing plans and credit balances.

use serde::{Deserialize, Serialize};

/// A subscription plan as offered on the pricing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price_monthly: f64,
    pub credits_monthly: i64,
    /// Hours per VM session; `None` means unlimited
    #[serde(default)]
    pub max_vm_runtime: Option<i64>,
    pub max_cpu: i64,
    /// GB
    pub max_ram: i64,
    /// GB
    pub max_disk: i64,
    #[serde(default)]
    pub features: Vec<String>,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.price_monthly == 0.0
    }

    /// Price for display, e.g. "$9/mo" or "Free"
    pub fn price_display(&self) -> String {
        if self.is_free() {
            "Free".to_string()
        } else if self.price_monthly.fract() == 0.0 {
            format!("${}/mo", self.price_monthly as i64)
        } else {
            format!("${:.2}/mo", self.price_monthly)
        }
    }

    pub fn runtime_display(&self) -> String {
        match self.max_vm_runtime {
            Some(hours) => format!("{}h per VM", hours),
            None => "Unlimited".to_string(),
        }
    }
}

/// The signed-in user's plan and credit balance.
///
/// Older servers send only `credit_balance`; newer ones send both it and `credits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPlan {
    pub plan: Plan,
    #[serde(default)]
    pub credits: Option<i64>,
    #[serde(default)]
    pub credit_balance: Option<i64>,
    #[serde(default)]
    pub monthly_credits: Option<i64>,
}

impl UserPlan {
    pub fn balance(&self) -> i64 {
        self.credits.or(self.credit_balance).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RechargeReceipt {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: String,
    pub credits_added: i64,
    pub current_balance: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CreditBalance {
    pub credits: i64,
}
