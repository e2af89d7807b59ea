use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    error::{RegenError, Result},
    period::WeeklyCadence,
    regen::{
        eligibility::{Eligibility, EligibilityChecker, EligibilityPolicy},
        policy::GrantPolicy,
        summary::{AccountOutcome, CycleOutcome, CycleSummary},
    },
    storage::{
        models::{Account, AccountUpdate, UpdateOutcome},
        store::AccountStore,
    },
};

/// Attempts per account when the row changes between read and write.
const MAX_UPDATE_ATTEMPTS: usize = 3;

pub struct RegenerationService {
    store: Arc<dyn AccountStore>,
    grants: GrantPolicy,
    eligibility: EligibilityPolicy,
    cadence: WeeklyCadence,
    skip_if_current_period: bool,
    max_concurrency: usize,
    call_timeout: Duration,
    action: String,
}

impl RegenerationService {
    pub fn new(store: Arc<dyn AccountStore>, config: &Config) -> Self {
        Self {
            store,
            grants: GrantPolicy::from_config(&config.regen),
            eligibility: config.regen.eligibility,
            cadence: config.schedule,
            skip_if_current_period: config.regen.skip_if_current_period,
            max_concurrency: config.regen.max_concurrency.max(1),
            call_timeout: config.regen.call_timeout(),
            action: config.regen.action.clone(),
        }
    }

    /// Disable the same-period guard (operator-forced rerun).
    pub fn without_period_guard(mut self) -> Self {
        self.skip_if_current_period = false;
        self
    }

    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        self.run_cycle_at(Utc::now(), cancel).await
    }

    /// Run one regeneration cycle as of `now`.
    ///
    /// Fails only when the eligible-account read fails, before anything is
    /// mutated. Per-account failures are collected in the summary; a failed
    /// audit write yields [`CycleOutcome::AuditIncomplete`].
    pub async fn run_cycle_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome> {
        let period_start = self.cadence.trigger_period(now);
        info!(
            period_start = %period_start,
            eligibility = ?self.eligibility,
            guard = self.skip_if_current_period,
            "Starting boost regeneration cycle"
        );

        let accounts = self
            .call("fetch_eligible", self.store.fetch_eligible(self.eligibility))
            .await
            .map_err(|e| {
                error!("Failed to fetch eligible accounts: {}", e);
                RegenError::FetchEligibleAccounts(e.to_string())
            })?;

        let guard = self
            .skip_if_current_period
            .then(|| self.cadence.window_opens(period_start));
        let checker = EligibilityChecker::new(self.eligibility, guard);
        // Rows regenerated at or after this instant are left alone.
        let cutoff = guard.unwrap_or(now);

        let mut summary = CycleSummary::new(period_start, now);
        let mut pending = Vec::with_capacity(accounts.len());

        for account in accounts {
            match checker.check(&account) {
                Eligibility::Eligible => pending.push(account),
                Eligibility::AlreadyCurrent => summary.record(account.id, AccountOutcome::AlreadyCurrent),
                Eligibility::Excluded(_) => {}
            }
        }

        info!(
            "Regenerating {} accounts ({} already current, concurrency {})",
            pending.len(),
            summary.accounts_skipped,
            self.max_concurrency
        );

        let checker = &checker;
        let outcomes: Vec<(String, AccountOutcome)> = stream::iter(pending)
            .map(|account| async move {
                let id = account.id.clone();
                if cancel.is_cancelled() {
                    return (id, AccountOutcome::NotProcessed);
                }
                let outcome = self.regenerate_account(account, now, cutoff, checker).await;
                (id, outcome)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for (account_id, outcome) in outcomes {
            if let AccountOutcome::Failed(e) = &outcome {
                warn!(account_id = %account_id, error = %e, "Account regeneration failed");
            }
            summary.record(account_id, outcome);
        }

        // A signal that arrives after the last update was issued cut nothing short.
        let cancelled = summary.accounts_not_processed > 0;
        summary.finish(Utc::now(), cancelled);

        if summary.cancelled {
            warn!(
                "Cycle cancelled: {} accounts were not processed",
                summary.accounts_not_processed
            );
        }

        let record = summary.audit_record(&self.action);
        match self.call("append_audit", self.store.append_audit(&record)).await {
            Ok(audit_id) => {
                info!(
                    audit_id,
                    "Cycle complete: {} updated, {} bonuses, {} skipped, {} failed",
                    summary.accounts_updated,
                    summary.bonuses_granted,
                    summary.accounts_skipped,
                    summary.error_count()
                );
                Ok(CycleOutcome::Completed(summary))
            }
            Err(e) => {
                error!(
                    "Accounts were regenerated ({} updated) but the audit record could not be written: {}",
                    summary.accounts_updated, e
                );
                Ok(CycleOutcome::AuditIncomplete {
                    summary,
                    error: RegenError::AuditWrite(e.to_string()),
                })
            }
        }
    }

    async fn regenerate_account(
        &self,
        mut account: Account,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        checker: &EligibilityChecker,
    ) -> AccountOutcome {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let grant = self.grants.compute(&account);
            let update = AccountUpdate {
                account_id: account.id.clone(),
                new_balance: grant.new_balance,
                expected_usage: account.usage_counter,
                regenerated_at: now,
                regenerated_before: cutoff,
            };

            match self.call("apply_regeneration", self.store.apply_regeneration(&update)).await {
                Ok(UpdateOutcome::Applied) => {
                    debug!(
                        account_id = %account.id,
                        usage = account.usage_counter,
                        new_balance = grant.new_balance,
                        bonus = grant.bonus,
                        "Account regenerated"
                    );
                    return AccountOutcome::Updated {
                        new_balance: grant.new_balance,
                        bonus: grant.bonus,
                    };
                }
                Ok(UpdateOutcome::Stale) => {
                    debug!(account_id = %account.id, attempt, "Row changed since read, re-reading");
                }
                Err(e) => return AccountOutcome::Failed(per_account(&account.id, e)),
            }

            let fresh = match self.call("fetch_account", self.store.fetch_account(&account.id)).await {
                Ok(Some(fresh)) => fresh,
                Ok(None) => return AccountOutcome::Skipped("account no longer exists".to_string()),
                Err(e) => return AccountOutcome::Failed(per_account(&account.id, e)),
            };

            if fresh.last_regen_at.is_some_and(|at| at >= cutoff) {
                return AccountOutcome::AlreadyCurrent;
            }
            if let Eligibility::Excluded(why) = checker.check(&fresh) {
                return AccountOutcome::Skipped(why);
            }
            account = fresh;
        }

        AccountOutcome::Failed(RegenError::AccountUpdate {
            account_id: account.id,
            reason: format!("row kept changing across {} attempts", MAX_UPDATE_ATTEMPTS),
        })
    }

    async fn call<T>(&self, operation: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| RegenError::Timeout {
                operation,
                after_ms: self.call_timeout.as_millis() as u64,
            })?
    }
}

fn per_account(account_id: &str, e: RegenError) -> RegenError {
    match e {
        e @ RegenError::AccountUpdate { .. } => e,
        other => RegenError::AccountUpdate {
            account_id: account_id.to_string(),
            reason: other.to_string(),
        },
    }
}
