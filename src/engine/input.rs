//! Validated inputs of the ledger operations.
//!
//! Caller identities (`sender`, `receiver`, `admin`, `user`) are supplied
//! already authenticated; admin rights are checked before the engine is called.

use crate::Tokens;
use crate::model::{AccountId, CancellationRequestId, ReviewAction, TxId, TxStatus};

use super::error::{LedgerError, Operation};
use super::idempotency;

/// Ask `receiver` (an account id or email) to accept `amount` tokens.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub sender: AccountId,
    pub receiver: String,
    pub amount: Tokens,
    pub request_id: Option<String>,
}

impl TransferRequest {
    pub fn new(sender: AccountId, receiver: impl Into<String>, amount: impl Into<Tokens>) -> Self {
        Self {
            sender,
            receiver: receiver.into(),
            amount: amount.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), LedgerError> {
        if !self.amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(self.amount));
        }
        idempotency::validate_request_id(self.request_id.as_deref())
    }
}

/// The receiver's answer to a pending transfer.
#[derive(Debug, Clone)]
pub struct TransferDecision {
    pub transaction: TxId,
    pub receiver: AccountId,
    /// Only recorded on rejection.
    pub reason: Option<String>,
}

impl TransferDecision {
    pub fn new(transaction: TxId, receiver: AccountId) -> Self {
        Self {
            transaction,
            receiver,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Admin reversal of a completed transfer.
#[derive(Debug, Clone)]
pub struct CancelTransfer {
    pub transaction: TxId,
    pub admin: AccountId,
    pub reason: String,
}

impl CancelTransfer {
    pub(crate) fn validate(&self) -> Result<(), LedgerError> {
        require_reason(Operation::CancelTransfer, &self.reason)
    }
}

/// Admin credit (positive amount) or debit (negative amount).
#[derive(Debug, Clone)]
pub struct AdminAdjustment {
    pub user: AccountId,
    pub amount: Tokens,
    pub description: Option<String>,
    pub admin: AccountId,
}

impl AdminAdjustment {
    pub(crate) fn validate(&self) -> Result<(), LedgerError> {
        if self.amount.is_zero() {
            return Err(LedgerError::ZeroAdjustment);
        }
        // the ledger entry records the magnitude, which must be representable
        if self.amount.checked_abs().is_none() {
            return Err(LedgerError::AdjustmentOutOfRange(self.amount));
        }
        Ok(())
    }
}

/// Clerical status correction; never moves funds.
#[derive(Debug, Clone)]
pub struct StatusOverride {
    pub transaction: TxId,
    pub status: TxStatus,
    pub admin: AccountId,
    pub reason: Option<String>,
}

/// A party's request to have a completed transfer reversed.
#[derive(Debug, Clone)]
pub struct NewCancellationRequest {
    pub transaction: TxId,
    pub user: AccountId,
    pub reason: String,
}

impl NewCancellationRequest {
    pub(crate) fn validate(&self) -> Result<(), LedgerError> {
        require_reason(Operation::CreateCancellationRequest, &self.reason)
    }
}

/// Admin decision on a queued cancellation request.
#[derive(Debug, Clone)]
pub struct CancellationReview {
    pub request: CancellationRequestId,
    pub admin: AccountId,
    pub action: ReviewAction,
    pub reason: Option<String>,
}

fn require_reason(op: Operation, reason: &str) -> Result<(), LedgerError> {
    if reason.trim().is_empty() {
        return Err(LedgerError::MissingReason(op));
    }
    Ok(())
}
