//! Core domain types for the token ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::Tokens;

/// Account (user) identifier.
pub type AccountId = Uuid;

/// Ledger transaction identifier.
pub type TxId = Uuid;

/// Cancellation request identifier.
pub type CancellationRequestId = Uuid;

/// Returned when a textual status, kind or action is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what} '{value}'")]
pub struct ParseEnumError {
    pub what: &'static str,
    pub value: String,
}

/// Status of a ledger transaction.
///
/// ```text
/// pending_acceptance --accept--> completed --cancel--> cancelled
/// pending_acceptance --reject--> rejected
/// pending_acceptance --admin override--> failed | rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Immediate entries that have not settled yet.
    Pending,
    /// Transfer request awaiting the receiver; the amount is held in escrow.
    PendingAcceptance,
    Rejected,
    Completed,
    Failed,
    Cancelled,
}

/// Events that move a transaction through its lifecycle and move funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Accept,
    Reject,
    Cancel,
}

/// Why an administrative status override was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideRefusal {
    /// Target equals the current status.
    Unchanged,
    /// `cancelled` moves funds and only the cancel operation may reach it.
    RequiresCancel,
    /// The transition is outside the clerical correction set.
    Illegal,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingAcceptance => "pending_acceptance",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Completed | Self::Failed | Self::Cancelled
        )
    }

    /// Next status for a fund-moving event, `None` if the event is not
    /// allowed from this status.
    pub fn on(self, event: TxEvent) -> Option<TxStatus> {
        match (self, event) {
            (Self::PendingAcceptance, TxEvent::Accept) => Some(Self::Completed),
            (Self::PendingAcceptance, TxEvent::Reject) => Some(Self::Rejected),
            (Self::Completed, TxEvent::Cancel) => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Checks a clerical status correction that must not move funds.
    pub fn check_override(self, target: TxStatus) -> Result<(), OverrideRefusal> {
        if self == target {
            return Err(OverrideRefusal::Unchanged);
        }
        if target == Self::Cancelled {
            return Err(OverrideRefusal::RequiresCancel);
        }
        let allowed = match self {
            Self::PendingAcceptance => matches!(target, Self::Failed | Self::Rejected),
            Self::Pending => matches!(target, Self::Completed | Self::Failed | Self::Rejected),
            // terminal states only leave through cancel
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(OverrideRefusal::Illegal)
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(Self::Pending),
            "pending_acceptance" => Ok(Self::PendingAcceptance),
            "rejected" => Ok(Self::Rejected),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseEnumError {
                what: "transaction status",
                value: other.to_string(),
            }),
        }
    }
}

/// What a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    TransferRequest,
    TransferAcceptance,
    TransferRejection,
    TransferCancellation,
    AdminCredit,
    AdminDebit,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransferRequest => "transfer_request",
            Self::TransferAcceptance => "transfer_acceptance",
            Self::TransferRejection => "transfer_rejection",
            Self::TransferCancellation => "transfer_cancellation",
            Self::AdminCredit => "admin_credit",
            Self::AdminDebit => "admin_debit",
        }
    }

    /// Entries produced by a user-to-user transfer.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::TransferRequest | Self::TransferAcceptance)
    }

    /// Entries that already undo another movement. These are never reversible.
    pub fn is_reversal(&self) -> bool {
        matches!(self, Self::TransferRejection | Self::TransferCancellation)
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit data attached to a transaction once it is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationDetails {
    pub reason: String,
    pub cancelled_by: AccountId,
    pub cancelled_at: DateTime<Utc>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// One entry of the ledger. Never deleted; after creation only `status`,
/// `kind`, `description` and `cancellation` change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub sender: AccountId,
    pub receiver: AccountId,
    /// Always positive; the direction is carried by sender and receiver.
    pub amount: Tokens,
    pub status: TxStatus,
    pub kind: TxKind,
    pub description: Option<String>,
    /// Client idempotency key, unique across the ledger when present.
    pub request_id: Option<String>,
    /// Set on reversal entries only.
    pub original_transaction: Option<TxId>,
    pub cancellation: Option<CancellationDetails>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A transfer request whose amount is escrowed until the receiver decides.
    pub fn transfer_request(
        sender: AccountId,
        receiver: AccountId,
        amount: Tokens,
        request_id: Option<String>,
        description: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            receiver,
            amount,
            status: TxStatus::PendingAcceptance,
            kind: TxKind::TransferRequest,
            description: Some(description),
            request_id,
            original_transaction: None,
            cancellation: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The audit record of a cancellation: funds flow back from the
    /// original receiver to the original sender.
    pub fn reversal_of(original: &Transaction, reason: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: original.receiver,
            receiver: original.sender,
            amount: original.amount,
            status: TxStatus::Completed,
            kind: TxKind::TransferCancellation,
            description: Some(format!(
                "cancellation of transaction {}: {reason}",
                original.id
            )),
            request_id: None,
            original_transaction: Some(original.id),
            cancellation: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Audit record of an administrative balance change. The admin sits on the
    /// opposite side of the user so the entry reads like any other movement.
    /// `None` when the magnitude of `delta` is not representable.
    pub fn admin_adjustment(
        admin: AccountId,
        user: AccountId,
        delta: Tokens,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let amount = delta.checked_abs()?;
        let note = description.unwrap_or("no description");
        let (sender, receiver, kind, description) = if delta.is_negative() {
            (user, admin, TxKind::AdminDebit, format!("admin debit ({note})"))
        } else {
            (admin, user, TxKind::AdminCredit, format!("admin credit ({note})"))
        };
        Some(Self {
            id: Uuid::new_v4(),
            sender,
            receiver,
            amount,
            status: TxStatus::Completed,
            kind,
            description: Some(description),
            request_id: None,
            original_transaction: None,
            cancellation: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn involves(&self, account: AccountId) -> bool {
        self.sender == account || self.receiver == account
    }

    /// Apply a lifecycle event. Returns the previous status, or `None` (and
    /// leaves the transaction untouched) if the event is not allowed.
    pub fn advance(&mut self, event: TxEvent, now: DateTime<Utc>) -> Option<TxStatus> {
        let previous = self.status;
        let next = previous.on(event)?;
        self.status = next;
        match event {
            TxEvent::Accept => self.kind = TxKind::TransferAcceptance,
            TxEvent::Reject => self.kind = TxKind::TransferRejection,
            TxEvent::Cancel => {}
        }
        self.updated_at = now;
        Some(previous)
    }

    /// Mark a completed transaction cancelled with its audit details.
    pub fn cancel(&mut self, details: CancellationDetails, now: DateTime<Utc>) -> Option<TxStatus> {
        let previous = self.advance(TxEvent::Cancel, now)?;
        self.cancellation = Some(details);
        Some(previous)
    }

    pub fn append_note(&mut self, note: &str) {
        self.description = Some(match self.description.take() {
            Some(existing) if !existing.is_empty() => format!("{existing} ({note})"),
            _ => note.to_string(),
        });
    }
}

/// Review state of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin decision on a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl ReviewAction {
    pub fn outcome(self) -> RequestStatus {
        match self {
            Self::Approve => RequestStatus::Approved,
            Self::Reject => RequestStatus::Rejected,
        }
    }
}

impl FromStr for ReviewAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "approve" | "approved" => Ok(Self::Approve),
            "reject" | "rejected" => Ok(Self::Reject),
            other => Err(ParseEnumError {
                what: "review action",
                value: other.to_string(),
            }),
        }
    }
}

/// A user's request to reverse a completed transfer, queued for admin review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub id: CancellationRequestId,
    pub transaction: TxId,
    pub requested_by: AccountId,
    pub reason: String,
    pub status: RequestStatus,
    pub reviewed_by: Option<AccountId>,
    pub review_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CancellationRequest {
    pub fn new(
        transaction: TxId,
        requested_by: AccountId,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction,
            requested_by,
            reason,
            status: RequestStatus::Pending,
            reviewed_by: None,
            review_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn request(amount: i64) -> Transaction {
        Transaction::transfer_request(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Tokens::new(amount),
            Some("req-1".to_string()),
            "transfer request".to_string(),
            now(),
        )
    }

    #[test]
    fn fund_moving_transitions() {
        use TxStatus::*;
        assert_eq!(PendingAcceptance.on(TxEvent::Accept), Some(Completed));
        assert_eq!(PendingAcceptance.on(TxEvent::Reject), Some(Rejected));
        assert_eq!(Completed.on(TxEvent::Cancel), Some(Cancelled));

        assert_eq!(PendingAcceptance.on(TxEvent::Cancel), None);
        assert_eq!(Completed.on(TxEvent::Accept), None);
        assert_eq!(Rejected.on(TxEvent::Reject), None);
        assert_eq!(Cancelled.on(TxEvent::Cancel), None);
        assert_eq!(Failed.on(TxEvent::Accept), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!TxStatus::Pending.is_terminal());
        assert!(!TxStatus::PendingAcceptance.is_terminal());
        assert!(TxStatus::Completed.is_terminal());
        assert!(TxStatus::Rejected.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
        assert!(TxStatus::Cancelled.is_terminal());
    }

    #[test]
    fn override_guard_rails() {
        use TxStatus::*;
        assert_eq!(PendingAcceptance.check_override(Failed), Ok(()));
        assert_eq!(PendingAcceptance.check_override(Rejected), Ok(()));
        assert_eq!(Pending.check_override(Completed), Ok(()));

        assert_eq!(
            Completed.check_override(Completed),
            Err(OverrideRefusal::Unchanged)
        );
        assert_eq!(
            Completed.check_override(Cancelled),
            Err(OverrideRefusal::RequiresCancel)
        );
        assert_eq!(
            PendingAcceptance.check_override(Completed),
            Err(OverrideRefusal::Illegal)
        );
        assert_eq!(
            Failed.check_override(Completed),
            Err(OverrideRefusal::Illegal)
        );
        assert_eq!(
            Rejected.check_override(Completed),
            Err(OverrideRefusal::Illegal)
        );
        for terminal in [Completed, Failed, Cancelled, Rejected] {
            assert_eq!(
                terminal.check_override(PendingAcceptance),
                Err(OverrideRefusal::Illegal)
            );
        }
    }

    #[test]
    fn status_parses_and_displays() {
        for status in [
            TxStatus::Pending,
            TxStatus::PendingAcceptance,
            TxStatus::Rejected,
            TxStatus::Completed,
            TxStatus::Failed,
            TxStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<TxStatus>(), Ok(status));
        }
        assert!("settled".parse::<TxStatus>().is_err());
    }

    #[test]
    fn accept_sets_kind_and_timestamp() {
        let mut tx = request(40);
        let later = now() + chrono::TimeDelta::seconds(5);

        assert_eq!(
            tx.advance(TxEvent::Accept, later),
            Some(TxStatus::PendingAcceptance)
        );
        assert_eq!(tx.status, TxStatus::Completed);
        assert_eq!(tx.kind, TxKind::TransferAcceptance);
        assert_eq!(tx.updated_at, later);
        assert_eq!(tx.amount, Tokens::new(40));
    }

    #[test]
    fn refused_event_leaves_transaction_untouched() {
        let mut tx = request(40);
        let before = tx.clone();
        assert_eq!(tx.advance(TxEvent::Cancel, now()), None);
        assert_eq!(tx, before);
    }

    #[test]
    fn reversal_swaps_parties_and_links_original() {
        let mut original = request(40);
        original.advance(TxEvent::Accept, now());
        let reversal = Transaction::reversal_of(&original, "fraud", now());

        assert_eq!(reversal.sender, original.receiver);
        assert_eq!(reversal.receiver, original.sender);
        assert_eq!(reversal.amount, original.amount);
        assert_eq!(reversal.kind, TxKind::TransferCancellation);
        assert_eq!(reversal.status, TxStatus::Completed);
        assert_eq!(reversal.original_transaction, Some(original.id));
        assert!(reversal.kind.is_reversal());
    }

    #[test]
    fn admin_adjustment_direction() {
        let admin = Uuid::new_v4();
        let user = Uuid::new_v4();

        let credit =
            Transaction::admin_adjustment(admin, user, Tokens::new(25), Some("bonus"), now())
                .unwrap();
        assert_eq!(credit.kind, TxKind::AdminCredit);
        assert_eq!((credit.sender, credit.receiver), (admin, user));
        assert_eq!(credit.amount, Tokens::new(25));

        let debit = Transaction::admin_adjustment(admin, user, Tokens::new(-30), None, now())
            .unwrap();
        assert_eq!(debit.kind, TxKind::AdminDebit);
        assert_eq!((debit.sender, debit.receiver), (user, admin));
        assert_eq!(debit.amount, Tokens::new(30));
        assert_eq!(debit.description.as_deref(), Some("admin debit (no description)"));

        assert!(
            Transaction::admin_adjustment(admin, user, Tokens::new(i64::MIN), None, now())
                .is_none()
        );
    }

    #[test]
    fn append_note_extends_description() {
        let mut tx = request(1);
        tx.append_note("status set to failed");
        assert_eq!(
            tx.description.as_deref(),
            Some("transfer request (status set to failed)")
        );
        tx.description = None;
        tx.append_note("first");
        assert_eq!(tx.description.as_deref(), Some("first"));
    }

    #[test]
    fn review_action_parsing() {
        assert_eq!("approve".parse::<ReviewAction>(), Ok(ReviewAction::Approve));
        assert_eq!("rejected".parse::<ReviewAction>(), Ok(ReviewAction::Reject));
        assert!("maybe".parse::<ReviewAction>().is_err());
        assert_eq!(ReviewAction::Approve.outcome(), RequestStatus::Approved);
    }

    #[test]
    fn kind_classification() {
        assert!(TxKind::TransferAcceptance.is_transfer());
        assert!(!TxKind::AdminCredit.is_transfer());
        assert!(TxKind::TransferRejection.is_reversal());
        assert!(!TxKind::TransferAcceptance.is_reversal());
    }
}
