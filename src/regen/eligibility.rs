use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::models::Account;

/// Which accounts a cycle considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityPolicy {
    ActiveOnly,
    All,
}

impl EligibilityPolicy {
    pub fn includes(&self, account: &Account) -> bool {
        match self {
            EligibilityPolicy::ActiveOnly => account.is_active,
            EligibilityPolicy::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// Already regenerated at or after the current period boundary.
    AlreadyCurrent,
    Excluded(String),
}

pub struct EligibilityChecker {
    policy: EligibilityPolicy,
    window_opens: Option<DateTime<Utc>>,
}

impl EligibilityChecker {
    /// `window_opens` enables the same-period guard when set: accounts
    /// regenerated at or after it are already current.
    pub fn new(policy: EligibilityPolicy, window_opens: Option<DateTime<Utc>>) -> Self {
        Self { policy, window_opens }
    }

    pub fn check(&self, account: &Account) -> Eligibility {
        if !self.policy.includes(account) {
            debug!(account_id = %account.id, "Account is inactive, excluded");
            return Eligibility::Excluded("account is inactive".to_string());
        }

        if self.is_current(account) {
            debug!(
                account_id = %account.id,
                last_regen_at = ?account.last_regen_at,
                "Account already regenerated this period"
            );
            return Eligibility::AlreadyCurrent;
        }

        Eligibility::Eligible
    }

    pub fn is_current(&self, account: &Account) -> bool {
        match (self.window_opens, account.last_regen_at) {
            (Some(start), Some(last)) => last >= start,
            _ => false,
        }
    }

    /// Human-readable explanation, used by the operator CLI.
    pub fn reason(&self, account: &Account) -> String {
        match self.check(account) {
            Eligibility::Eligible => "Eligible for regeneration".to_string(),
            Eligibility::AlreadyCurrent => match account.last_regen_at {
                Some(at) => format!("Already regenerated this period ({})", at.format("%Y-%m-%d %H:%M UTC")),
                None => "Already regenerated this period".to_string(),
            },
            Eligibility::Excluded(why) => format!("Excluded: {}", why),
        }
    }
}
