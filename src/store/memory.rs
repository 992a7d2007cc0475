//! In-process store.
//!
//! A unit of work holds the store lock for its whole lifetime, so units are
//! serializable. Writes are staged next to the locked tables and merged on
//! commit; dropping the unit discards them.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{
    Account, BalancePolicy, RequestFilter, Store, StoreError, TxFilter, UnitOfWork,
    normalize_email,
};
use crate::Tokens;
use crate::model::{
    AccountId, CancellationRequest, CancellationRequestId, RequestStatus, Transaction, TxId,
    TxStatus,
};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    emails: HashMap<String, AccountId>,
    transactions: HashMap<TxId, Transaction>,
    /// Commit order, used for newest/oldest-first scans.
    tx_order: Vec<TxId>,
    request_ids: HashMap<String, TxId>,
    cancellations: HashMap<CancellationRequestId, CancellationRequest>,
    cancellation_order: Vec<CancellationRequestId>,
    pending_by_tx: HashMap<TxId, CancellationRequestId>,
}

#[derive(Debug, Default)]
struct Staged {
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TxId, Transaction>,
    new_transactions: Vec<TxId>,
    request_ids: HashMap<String, TxId>,
    cancellations: HashMap<CancellationRequestId, CancellationRequest>,
    new_cancellations: Vec<CancellationRequestId>,
}

impl Tables {
    fn apply(&mut self, staged: Staged) {
        self.accounts.extend(staged.accounts);
        self.transactions.extend(staged.transactions);
        self.tx_order.extend(staged.new_transactions);
        self.request_ids.extend(staged.request_ids);

        for (id, request) in staged.cancellations {
            if request.is_pending() {
                self.pending_by_tx.insert(request.transaction, id);
            } else if self.pending_by_tx.get(&request.transaction) == Some(&id) {
                self.pending_by_tx.remove(&request.transaction);
            }
            self.cancellations.insert(id, request);
        }
        self.cancellation_order.extend(staged.new_cancellations);
    }
}

/// Thread-safe in-memory ledger storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Store for MemoryStore {
    type Unit<'a> = MemoryUnit<'a>;

    fn begin(&self) -> Result<MemoryUnit<'_>, StoreError> {
        Ok(MemoryUnit {
            tables: self.lock()?,
            staged: Staged::default(),
        })
    }

    fn insert_account(&self, account: Account) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.accounts.contains_key(&account.id()) {
            return Err(StoreError::DuplicateAccount(account.id()));
        }
        if tables.emails.contains_key(account.email()) {
            return Err(StoreError::DuplicateEmail(account.email().to_string()));
        }
        tables
            .emails
            .insert(account.email().to_string(), account.id());
        tables.accounts.insert(account.id(), account);
        Ok(())
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let tables = self.lock()?;
        let mut accounts: Vec<Account> = tables.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.email().cmp(b.email()));
        Ok(accounts)
    }

    fn transactions(&self, filter: &TxFilter) -> Result<Vec<Transaction>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .tx_order
            .iter()
            .rev()
            .filter_map(|id| tables.transactions.get(id))
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect())
    }

    fn cancellation_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<CancellationRequest>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .cancellation_order
            .iter()
            .filter_map(|id| tables.cancellations.get(id))
            .filter(|request| filter.matches(request))
            .cloned()
            .collect())
    }
}

/// Unit of work over a [`MemoryStore`].
pub struct MemoryUnit<'a> {
    tables: MutexGuard<'a, Tables>,
    staged: Staged,
}

impl UnitOfWork for MemoryUnit<'_> {
    fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self
            .staged
            .accounts
            .get(&id)
            .or_else(|| self.tables.accounts.get(&id))
            .cloned())
    }

    fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        match self.tables.emails.get(&normalize_email(email)) {
            Some(id) => self.account(*id),
            None => Ok(None),
        }
    }

    fn adjust_balance(
        &mut self,
        id: AccountId,
        delta: Tokens,
        policy: BalancePolicy,
    ) -> Result<Account, StoreError> {
        let mut account = self.account(id)?.ok_or(StoreError::AccountMissing(id))?;
        let balance = account.tokens();
        let next = balance
            .checked_add(delta)
            .ok_or(StoreError::BalanceOverflow(id))?;
        if policy == BalancePolicy::RequireNonNegative && next.is_negative() {
            return Err(StoreError::Overdraft {
                account: id,
                balance,
                delta,
            });
        }
        account.set_tokens(next);
        self.staged.accounts.insert(id, account.clone());
        Ok(account)
    }

    fn set_cooldown(&mut self, id: AccountId, until: DateTime<Utc>) -> Result<(), StoreError> {
        let mut account = self.account(id)?.ok_or(StoreError::AccountMissing(id))?;
        account.set_cooldown(until);
        self.staged.accounts.insert(id, account);
        Ok(())
    }

    fn transaction(&self, id: TxId) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .staged
            .transactions
            .get(&id)
            .or_else(|| self.tables.transactions.get(&id))
            .cloned())
    }

    fn transaction_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let id = self
            .staged
            .request_ids
            .get(request_id)
            .or_else(|| self.tables.request_ids.get(request_id));
        match id {
            Some(id) => self.transaction(*id),
            None => Ok(None),
        }
    }

    fn insert_transaction(&mut self, tx: Transaction) -> Result<(), StoreError> {
        if self.transaction(tx.id)?.is_some() {
            return Err(StoreError::DuplicateTransaction(tx.id));
        }
        if let Some(request_id) = &tx.request_id {
            if self.transaction_by_request_id(request_id)?.is_some() {
                return Err(StoreError::DuplicateRequestId(request_id.clone()));
            }
            self.staged.request_ids.insert(request_id.clone(), tx.id);
        }
        self.staged.new_transactions.push(tx.id);
        self.staged.transactions.insert(tx.id, tx);
        Ok(())
    }

    fn update_transaction(
        &mut self,
        tx: &Transaction,
        expected: TxStatus,
    ) -> Result<(), StoreError> {
        let current = self
            .transaction(tx.id)?
            .ok_or(StoreError::TransactionMissing(tx.id))?;
        if current.status != expected {
            return Err(StoreError::StaleStatus {
                entity: "transaction",
                id: tx.id,
                expected: expected.as_str(),
                found: current.status.as_str(),
            });
        }
        let immutable = [
            ("amount", current.amount == tx.amount),
            ("sender", current.sender == tx.sender),
            ("receiver", current.receiver == tx.receiver),
            ("request_id", current.request_id == tx.request_id),
            (
                "original_transaction",
                current.original_transaction == tx.original_transaction,
            ),
            ("created_at", current.created_at == tx.created_at),
        ];
        if let Some(&(field, _)) = immutable.iter().find(|(_, same)| !*same) {
            return Err(StoreError::ImmutableField { tx: tx.id, field });
        }
        self.staged.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    fn cancellation_request(
        &self,
        id: CancellationRequestId,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        Ok(self
            .staged
            .cancellations
            .get(&id)
            .or_else(|| self.tables.cancellations.get(&id))
            .cloned())
    }

    fn pending_cancellation_for(
        &self,
        tx: TxId,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        if let Some(staged) = self
            .staged
            .cancellations
            .values()
            .find(|r| r.transaction == tx && r.is_pending())
        {
            return Ok(Some(staged.clone()));
        }
        match self.tables.pending_by_tx.get(&tx) {
            // the committed request may have been reviewed in this unit
            Some(id) => Ok(self.cancellation_request(*id)?.filter(|r| r.is_pending())),
            None => Ok(None),
        }
    }

    fn insert_cancellation_request(
        &mut self,
        request: CancellationRequest,
    ) -> Result<(), StoreError> {
        if request.is_pending() && self.pending_cancellation_for(request.transaction)?.is_some() {
            return Err(StoreError::DuplicatePendingCancellation(request.transaction));
        }
        self.staged.new_cancellations.push(request.id);
        self.staged.cancellations.insert(request.id, request);
        Ok(())
    }

    fn update_cancellation_request(
        &mut self,
        request: &CancellationRequest,
        expected: RequestStatus,
    ) -> Result<(), StoreError> {
        let current = self
            .cancellation_request(request.id)?
            .ok_or(StoreError::CancellationRequestMissing(request.id))?;
        if current.status != expected {
            return Err(StoreError::StaleStatus {
                entity: "cancellation request",
                id: request.id,
                expected: expected.as_str(),
                found: current.status.as_str(),
            });
        }
        self.staged
            .cancellations
            .insert(request.id, request.clone());
        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        let MemoryUnit { mut tables, staged } = self;
        tables.apply(staged);
        Ok(())
    }
}
