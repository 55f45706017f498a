//! Account store
//!
//! Holds every account's identity and balance. Balances only change through
//! `debit`/`credit`, which the ledger calls while confirming a transaction.

use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A ledger account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account name
    pub name: String,

    /// Balance the account was opened with; local DAG replay starts here
    pub genesis_balance: u64,

    /// Current balance
    pub balance: u64,

    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(name: String, genesis_balance: u64) -> Self {
        Account {
            name,
            genesis_balance,
            balance: genesis_balance,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: BTreeMap<String, Account>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an account with a non-negative initial balance
    pub fn add_user(&mut self, name: &str, initial_balance: i64) -> Result<&Account> {
        if self.accounts.contains_key(name) {
            return Err(LedgerError::DuplicateAccount(name.to_string()));
        }
        if initial_balance < 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "initial balance {} is negative",
                initial_balance
            )));
        }

        let account = Account::new(name.to_string(), initial_balance as u64);
        Ok(&*self.accounts.entry(name.to_string()).or_insert(account))
    }

    /// Re-open an account from a snapshot at its genesis balance
    pub(crate) fn restore(&mut self, name: String, genesis_balance: u64, created_at: DateTime<Utc>) -> Result<()> {
        if self.accounts.contains_key(&name) {
            return Err(LedgerError::DuplicateAccount(name));
        }
        let mut account = Account::new(name.clone(), genesis_balance);
        account.created_at = created_at;
        self.accounts.insert(name, account);
        Ok(())
    }

    pub fn check_balance(&self, name: &str) -> Result<u64> {
        self.get(name).map(|account| account.balance)
    }

    pub fn get(&self, name: &str) -> Result<&Account> {
        self.accounts
            .get(name)
            .ok_or_else(|| LedgerError::UnknownAccount(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.accounts.contains_key(name)
    }

    pub(crate) fn debit(&mut self, name: &str, amount: u64) -> Result<u64> {
        let account = self
            .accounts
            .get_mut(name)
            .ok_or_else(|| LedgerError::UnknownAccount(name.to_string()))?;

        let balance = account.balance.checked_sub(amount).ok_or_else(|| {
            LedgerError::InsufficientFunds {
                account: name.to_string(),
                available: account.balance,
                requested: amount,
            }
        })?;
        account.balance = balance;
        Ok(balance)
    }

    pub(crate) fn credit(&mut self, name: &str, amount: u64) -> Result<u64> {
        let account = self
            .accounts
            .get_mut(name)
            .ok_or_else(|| LedgerError::UnknownAccount(name.to_string()))?;

        let balance = account.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::InvalidAmount(format!("crediting {} to {} overflows", amount, name))
        })?;
        account.balance = balance;
        Ok(balance)
    }

    /// Accounts in name order
    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Sum of all balances, widened so it cannot overflow
    pub fn total_balance(&self) -> u128 {
        self.accounts.values().map(|a| a.balance as u128).sum()
    }
}
