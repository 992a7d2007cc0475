//! Token transfer orchestration.
//!
//! The engine moves tokens between accounts: transfer requests escrow the
//! amount from the sender, the receiver accepts or rejects, and admins can
//! reverse completed transfers or adjust balances. Every operation runs as a
//! single unit of work against the [`Store`]: it commits completely or leaves
//! no trace.

use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::model::{CancellationDetails, OverrideRefusal, Transaction, TxEvent, TxId, TxStatus};
use crate::store::{Account, BalancePolicy, MemoryStore, Store, TxFilter, UnitOfWork};

mod cancellation;
mod error;
mod idempotency;
mod input;
mod query;
#[cfg(test)]
mod testing;

pub use cancellation::ReviewOutcome;
pub use error::{ErrorKind, LedgerError, Operation};
pub use idempotency::MAX_REQUEST_ID_LEN;
pub use input::{
    AdminAdjustment, CancelTransfer, CancellationReview, NewCancellationRequest, StatusOverride,
    TransferDecision, TransferRequest,
};

use error::StoreResultExt;

/// Result of reversing a completed transfer.
#[derive(Debug, Clone)]
pub struct Reversal {
    /// The reversed transfer, now `cancelled`.
    pub original: Transaction,
    /// The `transfer_cancellation` entry recording the reversal.
    pub reversal: Transaction,
}

/// Result of an admin balance adjustment.
#[derive(Debug, Clone)]
pub struct Adjustment {
    pub account: Account,
    pub transaction: Transaction,
}

/// The token ledger engine.
pub struct Engine<S: Store = MemoryStore> {
    store: S,
    clock: Box<dyn Clock>,
    config: LedgerConfig,
}

impl Engine<MemoryStore> {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new(), LedgerConfig::default())
    }
}

impl Default for Engine<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

/// Public API
impl<S: Store> Engine<S> {
    pub fn with_store(store: S, config: LedgerConfig) -> Self {
        Self {
            store,
            clock: Box::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create an empty account. Stands in for the user service, which owns
    /// account lifecycle.
    pub fn register_account(&self, email: &str) -> Result<Account, LedgerError> {
        let op = Operation::RegisterAccount;
        let account = Account::new(email);
        let result = self
            .store
            .insert_account(account.clone())
            .map(|()| account)
            .for_op(op);
        Self::log_result(op, &email, &result);
        result
    }

    /// Open a transfer request and escrow the amount from the sender.
    pub fn request_transfer(&self, request: TransferRequest) -> Result<Transaction, LedgerError> {
        let result = self.try_request_transfer(&request);
        Self::log_result(Operation::RequestTransfer, &request.sender, &result);
        result
    }

    /// Receiver accepts a pending transfer and is credited the escrowed amount.
    pub fn accept_transfer(&self, decision: TransferDecision) -> Result<Transaction, LedgerError> {
        let result = self.try_accept_transfer(&decision);
        Self::log_result(Operation::AcceptTransfer, &decision.transaction, &result);
        result
    }

    /// Receiver rejects a pending transfer; the escrow goes back to the sender.
    pub fn reject_transfer(&self, decision: TransferDecision) -> Result<Transaction, LedgerError> {
        let result = self.try_reject_transfer(&decision);
        Self::log_result(Operation::RejectTransfer, &decision.transaction, &result);
        result
    }

    /// Admin reversal of a completed transfer.
    pub fn cancel_transfer(&self, cancel: CancelTransfer) -> Result<Reversal, LedgerError> {
        let op = Operation::CancelTransfer;
        let result = cancel
            .validate()
            .and_then(|()| self.atomically(op, |unit, now| self.reverse(unit, &cancel, now, op)));
        Self::log_result(op, &cancel.transaction, &result);
        result
    }

    /// Admin credit or debit, logged as a completed ledger entry.
    pub fn admin_adjust(&self, adjustment: AdminAdjustment) -> Result<Adjustment, LedgerError> {
        let result = self.try_admin_adjust(&adjustment);
        Self::log_result(Operation::AdminAdjust, &adjustment.user, &result);
        result
    }

    /// Clerical status correction. Never touches balances.
    pub fn admin_update_status(&self, update: StatusOverride) -> Result<Transaction, LedgerError> {
        let result = self.try_admin_update_status(&update);
        Self::log_result(Operation::AdminUpdateStatus, &update.transaction, &result);
        result
    }

    /// Reject every transfer that has waited longer than the configured
    /// `pending_ttl`, returning the escrow to its sender. Each expiry is its
    /// own unit of work; a candidate that fails is logged and skipped, and
    /// the sweep carries on. Without a TTL nothing ever expires.
    pub fn expire_pending_transfers(&self) -> Result<Vec<Transaction>, LedgerError> {
        let op = Operation::ExpirePendingTransfers;
        let Some(ttl) = self.config.pending_ttl else {
            return Ok(Vec::new());
        };
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(ttl)
            .ok_or(LedgerError::DurationOutOfRange { op, duration: ttl })?;
        let stale = self
            .store
            .transactions(&TxFilter::awaiting_acceptance().created_before(cutoff))
            .for_op(op)?;

        let mut expired = Vec::with_capacity(stale.len());
        for candidate in stale {
            let result = self.atomically(op, |unit, now| {
                let mut tx = load_transaction(unit, candidate.id, op)?;
                if tx.status != TxStatus::PendingAcceptance {
                    // settled since the scan
                    return Ok(None);
                }
                unit.adjust_balance(tx.sender, tx.amount, BalancePolicy::AllowNegative)
                    .for_op(op)?;
                transition(&mut tx, TxEvent::Reject, now, op)?;
                tx.description = Some(format!(
                    "transfer request expired after {}s; funds returned to sender",
                    ttl.num_seconds()
                ));
                unit.update_transaction(&tx, TxStatus::PendingAcceptance)
                    .for_op(op)?;
                Ok(Some(tx))
            });
            Self::log_result(op, &candidate.id, &result);
            match result {
                Ok(Some(tx)) => expired.push(tx),
                Ok(None) => {}
                Err(e) => warn!(tx = %candidate.id, error = %e, "expiry skipped"),
            }
        }
        Ok(expired)
    }
}

/// Private API
impl<S: Store> Engine<S> {
    /// Small helper to log operation results
    fn log_result<T>(op: Operation, subject: &dyn fmt::Display, result: &Result<T, LedgerError>) {
        match result {
            Ok(_) => info!(op = %op, subject = %subject, "{op} applied"),
            Err(e) if e.kind() == ErrorKind::Internal => {
                error!(op = %op, subject = %subject, error = %e, "{op} aborted")
            }
            Err(e) => info!(op = %op, subject = %subject, reason = %e, "{op} refused"),
        }
    }

    /// Run `work` in one unit of work; commit on `Ok`, abort on `Err`.
    fn atomically<'s, T>(
        &'s self,
        op: Operation,
        work: impl FnOnce(&mut S::Unit<'s>, DateTime<Utc>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut unit = self.store.begin().for_op(op)?;
        // dropping `unit` on the error path discards its writes
        let value = work(&mut unit, self.clock.now())?;
        unit.commit().for_op(op)?;
        Ok(value)
    }

    /// Apply a `request_transfer`:
    /// - Validate amount and request id
    /// - Reject reused request ids before anything else
    /// - Resolve sender and receiver, refuse self-transfers
    /// - Check funds and cooldown
    /// - Record a `pending_acceptance` entry and escrow the amount
    fn try_request_transfer(&self, request: &TransferRequest) -> Result<Transaction, LedgerError> {
        let op = Operation::RequestTransfer;
        request.validate()?;

        self.atomically(op, |unit, now| {
            idempotency::ensure_unused(unit, request.request_id.as_deref())?;

            let sender = unit
                .account(request.sender)
                .for_op(op)?
                .ok_or_else(|| LedgerError::AccountNotFound(request.sender.to_string()))?;
            let receiver = resolve_account(unit, &request.receiver, op)?;

            // identity is the account id; emails are only a lookup key
            if sender.id() == receiver.id() {
                return Err(LedgerError::SelfTransfer(sender.id()));
            }
            if sender.tokens() < request.amount {
                return Err(LedgerError::InsufficientFunds {
                    account: sender.id(),
                    available: sender.tokens(),
                    requested: request.amount,
                });
            }
            let cooldown = sender.cooldown_until().filter(|_| sender.is_cooling_down(now));
            if let Some(until) = cooldown {
                return Err(LedgerError::CooldownActive {
                    account: sender.id(),
                    until,
                });
            }

            let tx = Transaction::transfer_request(
                sender.id(),
                receiver.id(),
                request.amount,
                request.request_id.clone(),
                format!("transfer request to {}", receiver.email()),
                now,
            );
            unit.insert_transaction(tx.clone()).for_op(op)?;

            // escrow: funds leave the sender before the receiver decides
            unit.adjust_balance(sender.id(), -request.amount, BalancePolicy::RequireNonNegative)
                .for_op(op)?;

            Ok(tx)
        })
    }

    /// Apply an `accept_transfer`:
    /// - Transaction must be `pending_acceptance` and addressed to the caller
    /// - Credit the receiver with the escrowed amount
    /// - Mark the entry `completed` / `transfer_acceptance`
    fn try_accept_transfer(&self, decision: &TransferDecision) -> Result<Transaction, LedgerError> {
        let op = Operation::AcceptTransfer;
        self.atomically(op, |unit, now| {
            let mut tx = pending_for_receiver(unit, decision, op)?;
            let receiver = unit
                .account(decision.receiver)
                .for_op(op)?
                .ok_or_else(|| LedgerError::AccountNotFound(decision.receiver.to_string()))?;

            unit.adjust_balance(receiver.id(), tx.amount, BalancePolicy::AllowNegative)
                .for_op(op)?;

            transition(&mut tx, TxEvent::Accept, now, op)?;
            tx.description = Some(format!(
                "transfer from {} accepted by {}",
                tx.sender,
                receiver.email()
            ));
            unit.update_transaction(&tx, TxStatus::PendingAcceptance)
                .for_op(op)?;
            Ok(tx)
        })
    }

    /// Apply a `reject_transfer`:
    /// - Same preconditions as accept
    /// - Return the escrowed amount to the sender, no cooldown
    /// - Mark the entry `rejected` / `transfer_rejection`
    fn try_reject_transfer(&self, decision: &TransferDecision) -> Result<Transaction, LedgerError> {
        let op = Operation::RejectTransfer;
        self.atomically(op, |unit, now| {
            let mut tx = pending_for_receiver(unit, decision, op)?;

            // a missing sender here is a data inconsistency, reported as internal
            unit.adjust_balance(tx.sender, tx.amount, BalancePolicy::AllowNegative)
                .for_op(op)?;

            transition(&mut tx, TxEvent::Reject, now, op)?;
            tx.description = Some(format!(
                "transfer rejected by {}: {}; funds returned to sender",
                decision.receiver,
                decision.reason.as_deref().unwrap_or("no reason given")
            ));
            unit.update_transaction(&tx, TxStatus::PendingAcceptance)
                .for_op(op)?;
            Ok(tx)
        })
    }

    /// Reverse a completed transfer inside `unit`:
    /// - Refuse cancelled, non-completed and reversal entries
    /// - Debit the original receiver (may go negative), credit the original sender
    /// - Record a `transfer_cancellation` entry linked to the original
    /// - Mark the original `cancelled` and put its sender under cooldown
    fn reverse<U: UnitOfWork>(
        &self,
        unit: &mut U,
        cancel: &CancelTransfer,
        now: DateTime<Utc>,
        op: Operation,
    ) -> Result<Reversal, LedgerError> {
        let mut original = load_transaction(unit, cancel.transaction, op)?;

        match original.status {
            TxStatus::Completed => {}
            TxStatus::Cancelled => return Err(LedgerError::AlreadyCancelled(original.id)),
            status => {
                return Err(LedgerError::InvalidState {
                    op,
                    tx: original.id,
                    status,
                    expected: TxStatus::Completed,
                });
            }
        }
        if original.kind.is_reversal() {
            return Err(LedgerError::NotReversible {
                tx: original.id,
                kind: original.kind,
            });
        }

        let sender = unit
            .account(original.sender)
            .for_op(op)?
            .ok_or_else(|| LedgerError::AccountNotFound(original.sender.to_string()))?;
        let receiver = unit
            .account(original.receiver)
            .for_op(op)?
            .ok_or_else(|| LedgerError::AccountNotFound(original.receiver.to_string()))?;

        let debited = unit
            .adjust_balance(receiver.id(), -original.amount, BalancePolicy::AllowNegative)
            .for_op(op)?;
        if debited.tokens().is_negative() {
            warn!(
                account = %debited.id(),
                balance = %debited.tokens(),
                tx = %original.id,
                "reversal leaves the original receiver with a negative balance"
            );
        }
        unit.adjust_balance(sender.id(), original.amount, BalancePolicy::AllowNegative)
            .for_op(op)?;

        let reversal = Transaction::reversal_of(&original, &cancel.reason, now);
        unit.insert_transaction(reversal.clone()).for_op(op)?;

        let cooldown = self.config.cooldown;
        let fresh_until = now
            .checked_add_signed(cooldown)
            .ok_or(LedgerError::DurationOutOfRange { op, duration: cooldown })?;
        // never shorten a cooldown that is already running
        let cooldown_until = sender
            .cooldown_until()
            .map_or(fresh_until, |existing| existing.max(fresh_until));
        let details = CancellationDetails {
            reason: cancel.reason.clone(),
            cancelled_by: cancel.admin,
            cancelled_at: now,
            cooldown_until: Some(cooldown_until),
        };
        original.cancel(details, now).ok_or(LedgerError::InvalidState {
            op,
            tx: original.id,
            status: original.status,
            expected: TxStatus::Completed,
        })?;
        unit.update_transaction(&original, TxStatus::Completed)
            .for_op(op)?;
        unit.set_cooldown(sender.id(), cooldown_until).for_op(op)?;

        Ok(Reversal { original, reversal })
    }

    /// Apply an `admin_adjust`:
    /// - Amount must be non-zero and the user must exist
    /// - Apply the delta (floor depends on `allow_negative_admin_debit`)
    /// - Record an `admin_credit` / `admin_debit` entry
    fn try_admin_adjust(&self, adjustment: &AdminAdjustment) -> Result<Adjustment, LedgerError> {
        let op = Operation::AdminAdjust;
        adjustment.validate()?;
        let policy = if self.config.allow_negative_admin_debit {
            BalancePolicy::AllowNegative
        } else {
            BalancePolicy::RequireNonNegative
        };

        self.atomically(op, |unit, now| {
            if unit.account(adjustment.user).for_op(op)?.is_none() {
                return Err(LedgerError::AccountNotFound(adjustment.user.to_string()));
            }
            let transaction = Transaction::admin_adjustment(
                adjustment.admin,
                adjustment.user,
                adjustment.amount,
                adjustment.description.as_deref(),
                now,
            )
            .ok_or(LedgerError::AdjustmentOutOfRange(adjustment.amount))?;
            let account = unit
                .adjust_balance(adjustment.user, adjustment.amount, policy)
                .for_op(op)?;
            if account.tokens().is_negative() {
                warn!(
                    account = %account.id(),
                    balance = %account.tokens(),
                    admin = %adjustment.admin,
                    "admin debit leaves a negative balance"
                );
            }

            unit.insert_transaction(transaction.clone()).for_op(op)?;
            Ok(Adjustment {
                account,
                transaction,
            })
        })
    }

    fn try_admin_update_status(&self, update: &StatusOverride) -> Result<Transaction, LedgerError> {
        let op = Operation::AdminUpdateStatus;
        self.atomically(op, |unit, now| {
            let mut tx = load_transaction(unit, update.transaction, op)?;
            let current = tx.status;

            current
                .check_override(update.status)
                .map_err(|refusal| match refusal {
                    OverrideRefusal::Unchanged => LedgerError::StatusUnchanged {
                        tx: tx.id,
                        status: current,
                    },
                    OverrideRefusal::RequiresCancel => LedgerError::CancelRequired(tx.id),
                    OverrideRefusal::Illegal => LedgerError::IllegalStatusChange {
                        tx: tx.id,
                        from: current,
                        to: update.status,
                    },
                })?;

            tx.status = update.status;
            tx.updated_at = now;
            tx.append_note(&format!(
                "status set to {} by admin {}: {}",
                update.status,
                update.admin,
                update.reason.as_deref().unwrap_or("no reason given")
            ));
            unit.update_transaction(&tx, current).for_op(op)?;
            Ok(tx)
        })
    }
}

/// Look an account up by id first, then by email.
fn resolve_account<U: UnitOfWork>(
    unit: &U,
    identifier: &str,
    op: Operation,
) -> Result<Account, LedgerError> {
    let identifier = identifier.trim();
    if let Ok(id) = Uuid::parse_str(identifier) {
        if let Some(account) = unit.account(id).for_op(op)? {
            return Ok(account);
        }
    }
    unit.account_by_email(identifier)
        .for_op(op)?
        .ok_or_else(|| LedgerError::AccountNotFound(identifier.to_string()))
}

fn load_transaction<U: UnitOfWork>(
    unit: &U,
    id: TxId,
    op: Operation,
) -> Result<Transaction, LedgerError> {
    unit.transaction(id)
        .for_op(op)?
        .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
}

/// The transaction behind a receiver decision, checked for status first and
/// for the receiver second.
fn pending_for_receiver<U: UnitOfWork>(
    unit: &U,
    decision: &TransferDecision,
    op: Operation,
) -> Result<Transaction, LedgerError> {
    let tx = load_transaction(unit, decision.transaction, op)?;
    if tx.status != TxStatus::PendingAcceptance {
        return Err(LedgerError::InvalidState {
            op,
            tx: tx.id,
            status: tx.status,
            expected: TxStatus::PendingAcceptance,
        });
    }
    if tx.receiver != decision.receiver {
        return Err(LedgerError::ReceiverMismatch {
            op,
            tx: tx.id,
            receiver: tx.receiver,
            caller: decision.receiver,
        });
    }
    Ok(tx)
}

fn transition(
    tx: &mut Transaction,
    event: TxEvent,
    now: DateTime<Utc>,
    op: Operation,
) -> Result<TxStatus, LedgerError> {
    let status = tx.status;
    tx.advance(event, now).ok_or(LedgerError::InvalidState {
        op,
        tx: tx.id,
        status,
        expected: TxStatus::PendingAcceptance,
    })
}
