use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user profile as seen by the regeneration cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub is_active: bool,
    pub entitlement_balance: u32,
    pub usage_counter: u32,
    pub last_regen_at: Option<DateTime<Utc>>,
    pub total_entitlements_received: u32,
    pub total_entitlements_given: u32,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_active: true,
            entitlement_balance: 0,
            usage_counter: 0,
            last_regen_at: None,
            total_entitlements_received: 0,
            total_entitlements_given: 0,
        }
    }

    pub fn with_usage(mut self, usage_counter: u32) -> Self {
        self.usage_counter = usage_counter;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// A conditional per-row write. Only applies while the row still has
/// `expected_usage` and was last regenerated before `regenerated_before`.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountUpdate {
    pub account_id: String,
    pub new_balance: u32,
    pub expected_usage: u32,
    pub regenerated_at: DateTime<Utc>,
    pub regenerated_before: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The row changed since it was read (or is already regenerated).
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: i64,
    pub action: String,
    pub executed_at: DateTime<Utc>,
    pub accounts_updated: u32,
    pub bonuses_granted: u32,
    pub error_count: u32,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub total_accounts: usize,
    pub active_accounts: usize,
    pub total_balance: u64,
    pub accounts_over_threshold: usize,
    pub audit_runs: usize,
    pub last_run_at: Option<DateTime<Utc>>,
}
