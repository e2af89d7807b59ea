use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::{error::RegenError, storage::models::AuditRecord};

/// Result of regenerating a single account.
#[derive(Debug)]
pub enum AccountOutcome {
    Updated { new_balance: u32, bonus: bool },
    AlreadyCurrent,
    Skipped(String),
    /// Cancellation arrived before the update was issued.
    NotProcessed,
    Failed(RegenError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountError {
    pub account_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub accounts_updated: u32,
    pub bonuses_granted: u32,
    pub accounts_skipped: u32,
    pub accounts_not_processed: u32,
    pub errors: Vec<AccountError>,
    /// Accounts that earned a bonus, for an external notification dispatcher.
    pub bonus_recipients: Vec<String>,
    pub period_start: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub cancelled: bool,
}

impl CycleSummary {
    pub fn new(period_start: DateTime<Utc>, started_at: DateTime<Utc>) -> Self {
        Self {
            accounts_updated: 0,
            bonuses_granted: 0,
            accounts_skipped: 0,
            accounts_not_processed: 0,
            errors: Vec::new(),
            bonus_recipients: Vec::new(),
            period_start,
            started_at,
            timestamp: started_at,
            cancelled: false,
        }
    }

    pub fn record(&mut self, account_id: String, outcome: AccountOutcome) {
        match outcome {
            AccountOutcome::Updated { bonus, .. } => {
                self.accounts_updated += 1;
                if bonus {
                    self.bonuses_granted += 1;
                    self.bonus_recipients.push(account_id);
                }
            }
            AccountOutcome::AlreadyCurrent | AccountOutcome::Skipped(_) => {
                self.accounts_skipped += 1;
            }
            AccountOutcome::NotProcessed => {
                self.accounts_not_processed += 1;
            }
            AccountOutcome::Failed(e) => {
                self.errors.push(AccountError {
                    account_id,
                    message: e.to_string(),
                });
            }
        }
    }

    /// Stamp completion and put collections in a stable order.
    pub fn finish(&mut self, completed_at: DateTime<Utc>, cancelled: bool) {
        self.timestamp = completed_at;
        self.cancelled = cancelled;
        self.bonus_recipients.sort();
        self.errors.sort_by(|a, b| a.account_id.cmp(&b.account_id));
    }

    pub fn error_count(&self) -> u32 {
        self.errors.len() as u32
    }

    pub fn audit_record(&self, action: &str) -> AuditRecord {
        AuditRecord {
            id: 0,
            action: action.to_string(),
            executed_at: self.timestamp,
            accounts_updated: self.accounts_updated,
            bonuses_granted: self.bonuses_granted,
            error_count: self.error_count(),
            details: serde_json::json!({
                "periodStart": self.period_start,
                "startedAt": self.started_at,
                "accountsSkipped": self.accounts_skipped,
                "accountsNotProcessed": self.accounts_not_processed,
                "cancelled": self.cancelled,
                "errors": self.errors,
            }),
        }
    }

    pub fn print_summary(&self) {
        println!("\n{}", "=== Boost Regeneration Summary ===".cyan().bold());
        println!("Period Start:    {}", crate::utils::format_timestamp(&self.period_start));
        println!("Updated:         {} ✓", self.accounts_updated.to_string().green());
        println!("Bonuses:         {}", self.bonuses_granted.to_string().yellow());
        println!("Skipped:         {}", self.accounts_skipped);
        if self.accounts_not_processed > 0 {
            println!("Not Processed:   {}", self.accounts_not_processed.to_string().yellow());
        }
        println!("Failed:          {} ✗", self.error_count().to_string().red());
        if self.cancelled {
            println!("{}", "Cycle was cancelled before all accounts were processed".yellow());
        }
        for err in &self.errors {
            println!("  {} {}", crate::utils::format_id(&err.account_id).red(), err.message);
        }
        println!("{}", "==================================".cyan());
    }
}

/// How a cycle that got past the eligible-account read ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleSummary),
    /// Per-account work is done but the audit record could not be written.
    AuditIncomplete {
        summary: CycleSummary,
        error: RegenError,
    },
}

impl CycleOutcome {
    pub fn summary(&self) -> &CycleSummary {
        match self {
            CycleOutcome::Completed(summary) => summary,
            CycleOutcome::AuditIncomplete { summary, .. } => summary,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, CycleOutcome::Completed(_))
    }
}
