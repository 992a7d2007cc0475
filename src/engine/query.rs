//! Read side of the ledger. Queries never change state.

use crate::Tokens;
use crate::model::{AccountId, CancellationRequest, Transaction, TxId};
use crate::store::{Account, RequestFilter, Store, TxFilter, UnitOfWork};

use super::{Engine, LedgerError, Operation, StoreResultExt, resolve_account};

impl<S: Store> Engine<S> {
    pub fn account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .begin()
            .and_then(|unit| unit.account(id))
            .map_err(LedgerError::Internal)?
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))
    }

    /// Find an account by id or, failing that, by email.
    pub fn resolve_account(&self, identifier: &str) -> Result<Account, LedgerError> {
        let unit = self.store.begin().map_err(LedgerError::Internal)?;
        resolve_account(&unit, identifier, Operation::RequestTransfer)
    }

    pub fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        self.store.accounts().map_err(LedgerError::Internal)
    }

    pub fn transaction(&self, id: TxId) -> Result<Transaction, LedgerError> {
        self.store
            .begin()
            .and_then(|unit| unit.transaction(id))
            .map_err(LedgerError::Internal)?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    pub fn transaction_by_request_id(&self, request_id: &str) -> Result<Transaction, LedgerError> {
        self.store
            .begin()
            .and_then(|unit| unit.transaction_by_request_id(request_id))
            .map_err(LedgerError::Internal)?
            .ok_or_else(|| LedgerError::TransactionNotFound(request_id.to_string()))
    }

    /// The whole ledger, newest first.
    pub fn all_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        self.scan(&TxFilter::default())
    }

    /// Every entry where `user` is sender or receiver, newest first.
    pub fn user_transactions(&self, user: AccountId) -> Result<Vec<Transaction>, LedgerError> {
        self.scan(&TxFilter::involving(user))
    }

    /// Like [`Engine::user_transactions`], but an unknown user is an error
    /// rather than an empty history.
    pub fn admin_user_transactions(&self, user: AccountId) -> Result<Vec<Transaction>, LedgerError> {
        self.account(user)?;
        self.user_transactions(user)
    }

    /// Requests `user` sent that still await the receiver.
    pub fn pending_sent(&self, user: AccountId) -> Result<Vec<Transaction>, LedgerError> {
        self.scan(&TxFilter::awaiting_acceptance().sent_by(user))
    }

    /// Requests addressed to `user` that still need an answer.
    pub fn pending_received(&self, user: AccountId) -> Result<Vec<Transaction>, LedgerError> {
        self.scan(&TxFilter::awaiting_acceptance().received_by(user))
    }

    /// Tokens held in escrow by transfers awaiting acceptance.
    pub fn escrowed_tokens(&self) -> Result<Tokens, LedgerError> {
        Ok(self
            .scan(&TxFilter::awaiting_acceptance())?
            .iter()
            .map(|tx| tx.amount)
            .sum())
    }

    /// Cancellation requests filed by `user`, newest first.
    pub fn user_cancellation_requests(
        &self,
        user: AccountId,
    ) -> Result<Vec<CancellationRequest>, LedgerError> {
        let mut requests = self
            .store
            .cancellation_requests(&RequestFilter::requested_by(user))
            .map_err(LedgerError::Internal)?;
        requests.reverse();
        Ok(requests)
    }

    /// The review queue, oldest first.
    pub fn pending_cancellation_requests(&self) -> Result<Vec<CancellationRequest>, LedgerError> {
        self.store
            .cancellation_requests(&RequestFilter::pending())
            .map_err(LedgerError::Internal)
    }

    /// The pending cancellation request of transaction `tx`, if any.
    pub fn pending_cancellation_for(
        &self,
        tx: TxId,
    ) -> Result<Option<CancellationRequest>, LedgerError> {
        self.store
            .begin()
            .and_then(|unit| unit.pending_cancellation_for(tx))
            .for_op(Operation::ReviewCancellationRequest)
    }

    fn scan(&self, filter: &TxFilter) -> Result<Vec<Transaction>, LedgerError> {
        self.store
            .transactions(filter)
            .map_err(LedgerError::Internal)
    }
}
