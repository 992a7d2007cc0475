//! Drives an [`Engine`] from a stream of replay commands.
//!
//! Commands refer to accounts by id or email and to transactions by their
//! request id, so a command file reads like an operator's log.

use std::collections::HashMap;
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;
use uuid::Uuid;

use crate::Tokens;
use crate::engine::{
    AdminAdjustment, CancelTransfer, CancellationReview, Engine, LedgerError,
    NewCancellationRequest, StatusOverride, TransferDecision, TransferRequest,
};
use crate::model::{AccountId, ReviewAction, Transaction, TxStatus};
use crate::store::{MemoryStore, Store, normalize_email};

/// One line of a replay file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open {
        email: String,
    },
    Adjust {
        admin: String,
        user: String,
        amount: Tokens,
        description: Option<String>,
    },
    Request {
        sender: String,
        receiver: String,
        amount: Tokens,
        request_id: Option<String>,
    },
    Accept {
        receiver: String,
        reference: String,
    },
    Reject {
        receiver: String,
        reference: String,
        reason: Option<String>,
    },
    Cancel {
        admin: String,
        reference: String,
        reason: String,
    },
    Dispute {
        user: String,
        reference: String,
        reason: String,
    },
    Review {
        admin: String,
        reference: String,
        action: ReviewAction,
        reason: Option<String>,
    },
    SetStatus {
        admin: String,
        reference: String,
        status: TxStatus,
        reason: Option<String>,
    },
    Expire,
}

impl Command {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Adjust { .. } => "adjust",
            Self::Request { .. } => "request",
            Self::Accept { .. } => "accept",
            Self::Reject { .. } => "reject",
            Self::Cancel { .. } => "cancel",
            Self::Dispute { .. } => "dispute",
            Self::Review {
                action: ReviewAction::Approve,
                ..
            } => "approve",
            Self::Review {
                action: ReviewAction::Reject,
                ..
            } => "deny",
            Self::SetStatus { .. } => "status",
            Self::Expire => "expire",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("transaction '{0}' has no pending cancellation request")]
    NoPendingRequest(String),
}

/// Counts of a finished replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub failed: usize,
}

pub struct Replayer<S: Store = MemoryStore> {
    engine: Engine<S>,
    /// Admins are not ledger accounts; each name gets a stable id.
    admins: HashMap<String, AccountId>,
}

impl<S: Store> Replayer<S> {
    pub fn new(engine: Engine<S>) -> Self {
        Self {
            engine,
            admins: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    pub fn into_engine(self) -> Engine<S> {
        self.engine
    }

    /// Apply every command of the stream. A failing command is logged and
    /// skipped; it never stops the replay.
    pub async fn run(&mut self, mut commands: impl Stream<Item = Command> + Unpin) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        while let Some(command) = commands.next().await {
            match self.apply(&command) {
                Ok(()) => summary.applied += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(op = command.op(), error = %e, "replay command failed");
                }
            }
        }
        summary
    }

    /// Apply a single command on top of the current ledger state
    pub fn apply(&mut self, command: &Command) -> Result<(), ReplayError> {
        match command {
            Command::Open { email } => {
                self.engine.register_account(email)?;
            }
            Command::Adjust {
                admin,
                user,
                amount,
                description,
            } => {
                let adjustment = AdminAdjustment {
                    user: self.account(user)?,
                    amount: *amount,
                    description: description.clone(),
                    admin: self.admin(admin),
                };
                self.engine.admin_adjust(adjustment)?;
            }
            Command::Request {
                sender,
                receiver,
                amount,
                request_id,
            } => {
                let mut request = TransferRequest::new(self.account(sender)?, receiver.as_str(), *amount);
                request.request_id = request_id.clone();
                self.engine.request_transfer(request)?;
            }
            Command::Accept {
                receiver,
                reference,
            } => {
                let decision = TransferDecision::new(self.transaction(reference)?.id, self.account(receiver)?);
                self.engine.accept_transfer(decision)?;
            }
            Command::Reject {
                receiver,
                reference,
                reason,
            } => {
                let mut decision =
                    TransferDecision::new(self.transaction(reference)?.id, self.account(receiver)?);
                decision.reason = reason.clone();
                self.engine.reject_transfer(decision)?;
            }
            Command::Cancel {
                admin,
                reference,
                reason,
            } => {
                let cancel = CancelTransfer {
                    transaction: self.transaction(reference)?.id,
                    admin: self.admin(admin),
                    reason: reason.clone(),
                };
                self.engine.cancel_transfer(cancel)?;
            }
            Command::Dispute {
                user,
                reference,
                reason,
            } => {
                let request = NewCancellationRequest {
                    transaction: self.transaction(reference)?.id,
                    user: self.account(user)?,
                    reason: reason.clone(),
                };
                self.engine.create_cancellation_request(request)?;
            }
            Command::Review {
                admin,
                reference,
                action,
                reason,
            } => {
                let tx = self.transaction(reference)?;
                let request = self
                    .engine
                    .pending_cancellation_for(tx.id)?
                    .ok_or_else(|| ReplayError::NoPendingRequest(reference.clone()))?;
                let review = CancellationReview {
                    request: request.id,
                    admin: self.admin(admin),
                    action: *action,
                    reason: reason.clone(),
                };
                self.engine.review_cancellation_request(review)?;
            }
            Command::SetStatus {
                admin,
                reference,
                status,
                reason,
            } => {
                let update = StatusOverride {
                    transaction: self.transaction(reference)?.id,
                    status: *status,
                    admin: self.admin(admin),
                    reason: reason.clone(),
                };
                self.engine.admin_update_status(update)?;
            }
            Command::Expire => {
                self.engine.expire_pending_transfers()?;
            }
        }
        Ok(())
    }

    fn admin(&mut self, name: &str) -> AccountId {
        if let Ok(id) = Uuid::parse_str(name.trim()) {
            return id;
        }
        *self
            .admins
            .entry(normalize_email(name))
            .or_insert_with(Uuid::new_v4)
    }

    fn account(&self, reference: &str) -> Result<AccountId, ReplayError> {
        Ok(self.engine.resolve_account(reference)?.id())
    }

    fn transaction(&self, request_id: &str) -> Result<Transaction, ReplayError> {
        Ok(self.engine.transaction_by_request_id(request_id.trim())?)
    }
}
