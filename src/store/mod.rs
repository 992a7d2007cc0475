//! Persistence seam for accounts, the transaction ledger and the
//! cancellation request queue.
//!
//! Every engine operation runs inside one [`UnitOfWork`]: reads and writes go
//! through it and become visible only on [`UnitOfWork::commit`]. Dropping a
//! unit without committing aborts it.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Tokens;
use crate::model::{
    AccountId, CancellationRequest, CancellationRequestId, RequestStatus, Transaction, TxId,
    TxKind, TxStatus,
};

mod account;
pub mod memory;

pub use account::{Account, normalize_email};
pub use memory::MemoryStore;

/// Data-layer failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,

    #[error("account {0} already exists")]
    DuplicateAccount(AccountId),

    #[error("email {0} is already registered")]
    DuplicateEmail(String),

    #[error("request id '{0}' is already used")]
    DuplicateRequestId(String),

    #[error("transaction {0} already has a pending cancellation request")]
    DuplicatePendingCancellation(TxId),

    #[error("account {0} not found")]
    AccountMissing(AccountId),

    #[error("transaction {0} not found")]
    TransactionMissing(TxId),

    #[error("transaction {0} already exists")]
    DuplicateTransaction(TxId),

    #[error("cancellation request {0} not found")]
    CancellationRequestMissing(CancellationRequestId),

    #[error("account {account} would go negative: balance {balance}, delta {delta}")]
    Overdraft {
        account: AccountId,
        balance: Tokens,
        delta: Tokens,
    },

    #[error("balance of account {0} overflows")]
    BalanceOverflow(AccountId),

    #[error("{entity} {id} changed concurrently: expected {expected}, found {found}")]
    StaleStatus {
        entity: &'static str,
        id: uuid::Uuid,
        expected: &'static str,
        found: &'static str,
    },

    #[error("transaction {tx}: field '{field}' is immutable")]
    ImmutableField { tx: TxId, field: &'static str },
}

/// Whether a balance adjustment may leave the account below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancePolicy {
    RequireNonNegative,
    AllowNegative,
}

/// Selection of ledger entries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TxFilter {
    pub party: Option<AccountId>,
    pub sender: Option<AccountId>,
    pub receiver: Option<AccountId>,
    pub status: Option<TxStatus>,
    pub kind: Option<TxKind>,
    pub created_before: Option<DateTime<Utc>>,
}

impl TxFilter {
    pub fn involving(account: AccountId) -> Self {
        Self {
            party: Some(account),
            ..Self::default()
        }
    }

    /// Transfer requests still waiting for the receiver.
    pub fn awaiting_acceptance() -> Self {
        Self {
            status: Some(TxStatus::PendingAcceptance),
            kind: Some(TxKind::TransferRequest),
            ..Self::default()
        }
    }

    pub fn sent_by(mut self, account: AccountId) -> Self {
        self.sender = Some(account);
        self
    }

    pub fn received_by(mut self, account: AccountId) -> Self {
        self.receiver = Some(account);
        self
    }

    pub fn created_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.created_before = Some(cutoff);
        self
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        self.party.is_none_or(|a| tx.involves(a))
            && self.sender.is_none_or(|a| tx.sender == a)
            && self.receiver.is_none_or(|a| tx.receiver == a)
            && self.status.is_none_or(|s| tx.status == s)
            && self.kind.is_none_or(|k| tx.kind == k)
            && self.created_before.is_none_or(|t| tx.created_at < t)
    }
}

/// Selection of cancellation requests. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub requested_by: Option<AccountId>,
    pub status: Option<RequestStatus>,
    pub transaction: Option<TxId>,
}

impl RequestFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(RequestStatus::Pending),
            ..Self::default()
        }
    }

    pub fn requested_by(account: AccountId) -> Self {
        Self {
            requested_by: Some(account),
            ..Self::default()
        }
    }

    pub fn matches(&self, request: &CancellationRequest) -> bool {
        self.requested_by.is_none_or(|a| request.requested_by == a)
            && self.status.is_none_or(|s| request.status == s)
            && self.transaction.is_none_or(|t| request.transaction == t)
    }
}

/// Backing storage of the ledger.
pub trait Store: Send + Sync {
    type Unit<'a>: UnitOfWork
    where
        Self: 'a;

    /// Open an atomic, isolated unit of work.
    fn begin(&self) -> Result<Self::Unit<'_>, StoreError>;

    /// Register an account. Account lifecycle is owned by the user
    /// service; the ledger only needs the record to exist.
    fn insert_account(&self, account: Account) -> Result<(), StoreError>;

    fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Matching transactions, newest first.
    fn transactions(&self, filter: &TxFilter) -> Result<Vec<Transaction>, StoreError>;

    /// Matching cancellation requests, oldest first.
    fn cancellation_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<CancellationRequest>, StoreError>;
}

/// Reads and writes of a single atomic operation.
pub trait UnitOfWork {
    fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Atomically add `delta` to the balance and return the updated account.
    fn adjust_balance(
        &mut self,
        id: AccountId,
        delta: Tokens,
        policy: BalancePolicy,
    ) -> Result<Account, StoreError>;

    fn set_cooldown(&mut self, id: AccountId, until: DateTime<Utc>) -> Result<(), StoreError>;

    fn transaction(&self, id: TxId) -> Result<Option<Transaction>, StoreError>;

    fn transaction_by_request_id(&self, request_id: &str)
    -> Result<Option<Transaction>, StoreError>;

    /// Fails with [`StoreError::DuplicateRequestId`] when the request id is taken.
    fn insert_transaction(&mut self, tx: Transaction) -> Result<(), StoreError>;

    /// Replace a stored transaction whose status is still `expected`.
    fn update_transaction(&mut self, tx: &Transaction, expected: TxStatus)
    -> Result<(), StoreError>;

    fn cancellation_request(
        &self,
        id: CancellationRequestId,
    ) -> Result<Option<CancellationRequest>, StoreError>;

    fn pending_cancellation_for(&self, tx: TxId)
    -> Result<Option<CancellationRequest>, StoreError>;

    /// Fails with [`StoreError::DuplicatePendingCancellation`] when the
    /// transaction already has a pending request.
    fn insert_cancellation_request(&mut self, request: CancellationRequest)
    -> Result<(), StoreError>;

    fn update_cancellation_request(
        &mut self,
        request: &CancellationRequest,
        expected: RequestStatus,
    ) -> Result<(), StoreError>;

    fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TxEvent;
    use uuid::Uuid;

    #[test]
    fn tx_filter_combines_fields() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let now = Utc::now();
        let mut tx =
            Transaction::transfer_request(alice, bob, Tokens::new(5), None, String::new(), now);

        assert!(TxFilter::involving(alice).matches(&tx));
        assert!(TxFilter::involving(bob).matches(&tx));
        assert!(TxFilter::awaiting_acceptance().sent_by(alice).matches(&tx));
        assert!(!TxFilter::awaiting_acceptance().sent_by(bob).matches(&tx));
        assert!(TxFilter::awaiting_acceptance().received_by(bob).matches(&tx));
        assert!(!TxFilter::default().created_before(now).matches(&tx));

        tx.advance(TxEvent::Accept, now);
        assert!(!TxFilter::awaiting_acceptance().matches(&tx));
        assert!(TxFilter::default().matches(&tx));
    }

    #[test]
    fn request_filter_matches_status_and_requester() {
        let user = Uuid::new_v4();
        let request = CancellationRequest::new(Uuid::new_v4(), user, "wrong".into(), Utc::now());
        assert!(RequestFilter::pending().matches(&request));
        assert!(RequestFilter::requested_by(user).matches(&request));
        assert!(!RequestFilter::requested_by(Uuid::new_v4()).matches(&request));
    }
}
