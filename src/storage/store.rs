use async_trait::async_trait;

use crate::{
    error::Result,
    regen::eligibility::EligibilityPolicy,
    storage::models::{Account, AccountUpdate, AuditRecord, UpdateOutcome},
};

/// Datastore operations the regeneration cycle depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Accounts matching the activity predicate.
    async fn fetch_eligible(&self, policy: EligibilityPolicy) -> Result<Vec<Account>>;

    async fn fetch_account(&self, id: &str) -> Result<Option<Account>>;

    /// Per-row conditional update by id.
    async fn apply_regeneration(&self, update: &AccountUpdate) -> Result<UpdateOutcome>;

    /// Insert-only audit log. Returns the new record id.
    async fn append_audit(&self, record: &AuditRecord) -> Result<i64>;
}
