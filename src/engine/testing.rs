//! Fixtures shared by the engine tests.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::*;
use crate::Tokens;
use crate::clock::ManualClock;
use crate::model::{AccountId, CancellationRequest};

pub(crate) struct Ledger {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub admin: AccountId,
}

/// Everything observable about the ledger, for "nothing changed" checks.
#[derive(Debug, PartialEq)]
pub(crate) struct Snapshot {
    accounts: Vec<(AccountId, Tokens, Option<DateTime<Utc>>)>,
    transactions: Vec<Transaction>,
    requests: Vec<CancellationRequest>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let engine = Engine::with_store(MemoryStore::new(), config).with_clock(Arc::clone(&clock));
        Self {
            engine,
            clock,
            admin: Uuid::new_v4(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Register an account and credit it through an admin adjustment.
    pub fn funded(&self, email: &str, tokens: i64) -> AccountId {
        let account = self.engine.register_account(email).unwrap();
        if tokens != 0 {
            self.engine
                .admin_adjust(AdminAdjustment {
                    user: account.id(),
                    amount: Tokens::new(tokens),
                    description: Some("opening balance".into()),
                    admin: self.admin,
                })
                .unwrap();
        }
        account.id()
    }

    pub fn account(&self, id: AccountId) -> Account {
        self.engine.account(id).unwrap()
    }

    pub fn balance(&self, id: AccountId) -> i64 {
        self.account(id).tokens().get()
    }

    pub fn request(&self, sender: AccountId, receiver: AccountId, amount: i64) -> Transaction {
        self.engine
            .request_transfer(TransferRequest::new(sender, receiver.to_string(), amount))
            .unwrap()
    }

    pub fn completed(&self, sender: AccountId, receiver: AccountId, amount: i64) -> Transaction {
        let tx = self.request(sender, receiver, amount);
        self.engine
            .accept_transfer(TransferDecision::new(tx.id, receiver))
            .unwrap()
    }

    pub fn try_cancel(&self, tx: TxId) -> Result<Reversal, LedgerError> {
        self.engine.cancel_transfer(CancelTransfer {
            transaction: tx,
            admin: self.admin,
            reason: "admin reversal".into(),
        })
    }

    pub fn cancel(&self, tx: TxId) -> Reversal {
        self.try_cancel(tx).unwrap()
    }

    /// Balances plus escrow: constant under every non-admin operation.
    pub fn total_value(&self) -> i64 {
        let balances: Tokens = self
            .engine
            .accounts()
            .unwrap()
            .iter()
            .map(|account| account.tokens())
            .sum();
        (balances + self.engine.escrowed_tokens().unwrap()).get()
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut accounts: Vec<_> = self
            .engine
            .accounts()
            .unwrap()
            .into_iter()
            .map(|a| (a.id(), a.tokens(), a.cooldown_until()))
            .collect();
        accounts.sort_by_key(|(id, ..)| *id);
        Snapshot {
            accounts,
            transactions: self.engine.all_transactions().unwrap(),
            requests: self
                .engine
                .store()
                .cancellation_requests(&Default::default())
                .unwrap(),
        }
    }
}
