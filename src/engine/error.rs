//! Error types for ledger operations.

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use thiserror::Error;

use crate::Tokens;
use crate::model::{
    AccountId, CancellationRequestId, RequestStatus, TxId, TxKind, TxStatus,
};
use crate::store::StoreError;

/// The operation being performed, carried by errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    RegisterAccount,
    RequestTransfer,
    AcceptTransfer,
    RejectTransfer,
    CancelTransfer,
    AdminAdjust,
    AdminUpdateStatus,
    CreateCancellationRequest,
    ReviewCancellationRequest,
    ExpirePendingTransfers,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegisterAccount => "register_account",
            Self::RequestTransfer => "request_transfer",
            Self::AcceptTransfer => "accept_transfer",
            Self::RejectTransfer => "reject_transfer",
            Self::CancelTransfer => "cancel_transfer",
            Self::AdminAdjust => "admin_adjust",
            Self::AdminUpdateStatus => "admin_update_status",
            Self::CreateCancellationRequest => "create_cancellation_request",
            Self::ReviewCancellationRequest => "review_cancellation_request",
            Self::ExpirePendingTransfers => "expire_pending_transfers",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable classification of [`LedgerError`]s for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    /// A specialisation of `BadRequest`.
    InsufficientFunds,
    Internal,
}

impl ErrorKind {
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest | Self::InsufficientFunds)
    }
}

/// Every way a ledger operation can fail. A failed operation has no
/// observable effect.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Tokens),

    #[error("adjustment amount cannot be zero")]
    ZeroAdjustment,

    #[error("adjustment amount {0} is out of range")]
    AdjustmentOutOfRange(Tokens),

    #[error("invalid request id: {0}")]
    InvalidRequestId(&'static str),

    #[error("{0}: a reason is required")]
    MissingReason(Operation),

    #[error("account {0} cannot transfer to itself")]
    SelfTransfer(AccountId),

    #[error("account {account} is in a cooldown period until {until}")]
    CooldownActive {
        account: AccountId,
        until: DateTime<Utc>,
    },

    #[error("insufficient funds for account {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        available: Tokens,
        requested: Tokens,
    },

    #[error("{op}: transaction {tx} is {status}, expected {expected}")]
    InvalidState {
        op: Operation,
        tx: TxId,
        status: TxStatus,
        expected: TxStatus,
    },

    #[error("{op}: transaction {tx} is addressed to {receiver}, not {caller}")]
    ReceiverMismatch {
        op: Operation,
        tx: TxId,
        receiver: AccountId,
        caller: AccountId,
    },

    #[error("transaction {0} is already cancelled")]
    AlreadyCancelled(TxId),

    #[error("transaction {tx} is a {kind} and cannot be reversed")]
    NotReversible { tx: TxId, kind: TxKind },

    #[error("only completed transfers can be disputed; transaction {tx} is a {status} {kind}")]
    NotDisputable {
        tx: TxId,
        status: TxStatus,
        kind: TxKind,
    },

    #[error("account {user} is not a party to transaction {tx}")]
    NotParty { tx: TxId, user: AccountId },

    #[error("cancellation request {request} was already {status}")]
    AlreadyReviewed {
        request: CancellationRequestId,
        status: RequestStatus,
    },

    #[error("transaction {tx} is already {status}")]
    StatusUnchanged { tx: TxId, status: TxStatus },

    #[error("transaction {0} can only be cancelled through cancel_transfer")]
    CancelRequired(TxId),

    #[error("transaction {tx} cannot be moved from {from} to {to}")]
    IllegalStatusChange {
        tx: TxId,
        from: TxStatus,
        to: TxStatus,
    },

    /// Lost a race: another operation changed the record first.
    #[error("{op}: {detail}")]
    Concurrent { op: Operation, detail: StoreError },

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error("cancellation request {0} not found")]
    CancellationRequestNotFound(CancellationRequestId),

    #[error(
        "request id '{request_id}' was already used by transaction {} ({})",
        Maybe(.existing),
        Maybe(.status)
    )]
    DuplicateRequest {
        request_id: String,
        existing: Option<TxId>,
        status: Option<TxStatus>,
    },

    #[error("transaction {tx} already has a pending cancellation request")]
    PendingCancellationExists { tx: TxId },

    #[error("email {0} is already registered")]
    EmailTaken(String),

    /// A configured duration pushes a timestamp out of the representable range.
    #[error("{op}: configured duration of {}s is out of range", .duration.num_seconds())]
    DurationOutOfRange { op: Operation, duration: TimeDelta },

    #[error("internal error: {0}")]
    Internal(#[source] StoreError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        use LedgerError::*;
        match self {
            NonPositiveAmount(_)
            | ZeroAdjustment
            | AdjustmentOutOfRange(_)
            | InvalidRequestId(_)
            | MissingReason(_)
            | SelfTransfer(_)
            | CooldownActive { .. }
            | InvalidState { .. }
            | ReceiverMismatch { .. }
            | AlreadyCancelled(_)
            | NotReversible { .. }
            | NotDisputable { .. }
            | NotParty { .. }
            | AlreadyReviewed { .. }
            | StatusUnchanged { .. }
            | CancelRequired(_)
            | IllegalStatusChange { .. }
            | Concurrent { .. } => ErrorKind::BadRequest,
            InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            AccountNotFound(_) | TransactionNotFound(_) | CancellationRequestNotFound(_) => {
                ErrorKind::NotFound
            }
            DuplicateRequest { .. } | PendingCancellationExists { .. } | EmailTaken(_) => {
                ErrorKind::Conflict
            }
            DurationOutOfRange { .. } | Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show to a caller: internal details are withheld.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "the operation failed due to an internal error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Translate a store failure raised while performing `op`.
    pub(crate) fn from_store(op: Operation, err: StoreError) -> Self {
        match err {
            StoreError::DuplicateRequestId(request_id) => LedgerError::DuplicateRequest {
                request_id,
                existing: None,
                status: None,
            },
            StoreError::DuplicatePendingCancellation(tx) => {
                LedgerError::PendingCancellationExists { tx }
            }
            StoreError::DuplicateEmail(email) => LedgerError::EmailTaken(email),
            StoreError::Overdraft {
                account,
                balance,
                delta,
            } => LedgerError::InsufficientFunds {
                account,
                available: balance,
                requested: delta.checked_neg().unwrap_or(Tokens::new(i64::MAX)),
            },
            detail @ StoreError::StaleStatus { .. } => LedgerError::Concurrent { op, detail },
            other => LedgerError::Internal(other),
        }
    }
}

/// Tags store results with the operation they happened in.
pub(crate) trait StoreResultExt<T> {
    fn for_op(self, op: Operation) -> Result<T, LedgerError>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
    fn for_op(self, op: Operation) -> Result<T, LedgerError> {
        self.map_err(|e| LedgerError::from_store(op, e))
    }
}

/// Display helper for `Option`al ids in messages.
struct Maybe<'a, T>(&'a Option<T>);

impl<T: fmt::Display> fmt::Display for Maybe<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn insufficient_funds_is_a_bad_request() {
        let err = LedgerError::InsufficientFunds {
            account: Uuid::nil(),
            available: Tokens::new(10),
            requested: Tokens::new(40),
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert!(err.kind().is_bad_request());
        assert!(!ErrorKind::Conflict.is_bad_request());
    }

    #[test]
    fn internal_details_are_not_public() {
        let err = LedgerError::Internal(StoreError::Poisoned);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.public_message().contains("poisoned"));

        let err = LedgerError::ZeroAdjustment;
        assert_eq!(err.public_message(), "adjustment amount cannot be zero");
    }

    #[test]
    fn store_errors_map_to_stable_kinds() {
        let op = Operation::RequestTransfer;
        assert_eq!(
            LedgerError::from_store(op, StoreError::DuplicateRequestId("r".into())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            LedgerError::from_store(op, StoreError::DuplicatePendingCancellation(Uuid::nil()))
                .kind(),
            ErrorKind::Conflict
        );
        let overdraft = LedgerError::from_store(
            op,
            StoreError::Overdraft {
                account: Uuid::nil(),
                balance: Tokens::new(5),
                delta: Tokens::new(-8),
            },
        );
        assert!(matches!(
            overdraft,
            LedgerError::InsufficientFunds { requested, .. } if requested == Tokens::new(8)
        ));
        let extreme = LedgerError::from_store(
            op,
            StoreError::Overdraft {
                account: Uuid::nil(),
                balance: Tokens::ZERO,
                delta: Tokens::new(i64::MIN),
            },
        );
        assert_eq!(extreme.kind(), ErrorKind::InsufficientFunds);
        let stale = LedgerError::from_store(
            op,
            StoreError::StaleStatus {
                entity: "transaction",
                id: Uuid::nil(),
                expected: "pending_acceptance",
                found: "completed",
            },
        );
        assert_eq!(stale.kind(), ErrorKind::BadRequest);
        assert_eq!(
            LedgerError::from_store(op, StoreError::AccountMissing(Uuid::nil())).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn duplicate_request_message_tolerates_unknown_origin() {
        let err = LedgerError::DuplicateRequest {
            request_id: "r-1".into(),
            existing: None,
            status: None,
        };
        assert_eq!(
            err.to_string(),
            "request id 'r-1' was already used by transaction unknown (unknown)"
        );
    }
}
