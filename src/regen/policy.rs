use serde::{Deserialize, Serialize};

use crate::{config::RegenConfig, storage::models::Account};

/// What happens to unspent balance at the start of a new period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancePolicy {
    /// New balance is the period grant; unspent credits are dropped.
    Reset,
    /// Period grant is added to the unspent balance.
    CarryOver,
}

/// Result of applying the grant rules to one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub new_balance: u32,
    pub bonus: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantPolicy {
    pub base_grant: u32,
    pub bonus_amount: u32,
    pub bonus_threshold: u32,
    pub balance_policy: BalancePolicy,
    pub max_balance: Option<u32>,
}

impl Default for GrantPolicy {
    fn default() -> Self {
        Self::from_config(&RegenConfig::default())
    }
}

impl GrantPolicy {
    pub fn from_config(config: &RegenConfig) -> Self {
        Self {
            base_grant: config.base_grant,
            bonus_amount: config.bonus_amount,
            bonus_threshold: config.bonus_threshold,
            balance_policy: config.balance_policy,
            max_balance: config.max_balance,
        }
    }

    pub fn earns_bonus(&self, usage_counter: u32) -> bool {
        self.bonus_amount > 0 && usage_counter >= self.bonus_threshold
    }

    pub fn compute(&self, account: &Account) -> Grant {
        let bonus = self.earns_bonus(account.usage_counter);
        let period_grant = self.base_grant + if bonus { self.bonus_amount } else { 0 };

        let uncapped = match self.balance_policy {
            BalancePolicy::Reset => period_grant,
            BalancePolicy::CarryOver => account.entitlement_balance.saturating_add(period_grant),
        };

        let new_balance = match self.max_balance {
            Some(max) => uncapped.min(max),
            None => uncapped,
        };

        Grant { new_balance, bonus }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(balance: u32, usage: u32) -> Account {
        let mut account = Account::new("acct").with_usage(usage);
        account.entitlement_balance = balance;
        account
    }

    #[test]
    fn test_reset_below_threshold() {
        let policy = GrantPolicy::default();
        for usage in 0..5 {
            let grant = policy.compute(&account(0, usage));
            assert_eq!(grant, Grant { new_balance: 1, bonus: false }, "usage {}", usage);
        }
    }

    #[test]
    fn test_reset_at_and_above_threshold() {
        let policy = GrantPolicy::default();
        for usage in [5, 6, 50] {
            let grant = policy.compute(&account(0, usage));
            assert_eq!(grant, Grant { new_balance: 2, bonus: true }, "usage {}", usage);
        }
    }

    #[test]
    fn test_reset_drops_unspent_balance() {
        let policy = GrantPolicy::default();
        assert_eq!(policy.compute(&account(7, 0)).new_balance, 1);
        assert_eq!(policy.compute(&account(7, 9)).new_balance, 2);
    }

    #[test]
    fn test_carry_over_adds_to_balance() {
        let policy = GrantPolicy {
            balance_policy: BalancePolicy::CarryOver,
            ..GrantPolicy::default()
        };
        assert_eq!(policy.compute(&account(3, 0)).new_balance, 4);
        assert_eq!(policy.compute(&account(3, 5)).new_balance, 5);
        assert_eq!(policy.compute(&account(u32::MAX, 5)).new_balance, u32::MAX);
    }

    #[test]
    fn test_carry_over_respects_cap() {
        let policy = GrantPolicy {
            balance_policy: BalancePolicy::CarryOver,
            max_balance: Some(3),
            ..GrantPolicy::default()
        };
        assert_eq!(policy.compute(&account(1, 0)).new_balance, 2);
        assert_eq!(policy.compute(&account(2, 8)).new_balance, 3);

        // bonus still counts as granted even when the cap absorbs it
        assert!(policy.compute(&account(3, 8)).bonus);
    }

    #[test]
    fn test_zero_bonus_amount_never_counts_as_bonus() {
        let policy = GrantPolicy {
            bonus_amount: 0,
            ..GrantPolicy::default()
        };
        assert_eq!(policy.compute(&account(0, 10)), Grant { new_balance: 1, bonus: false });
    }
}
