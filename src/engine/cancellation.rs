//! Cancellation request queue: parties dispute completed transfers, admins
//! approve (reversing the transfer) or reject.

use tracing::info;

use crate::model::{CancellationRequest, RequestStatus, ReviewAction, TxStatus};
use crate::store::{Store, UnitOfWork};

use super::{
    CancelTransfer, CancellationReview, Engine, LedgerError, NewCancellationRequest, Operation,
    Reversal, StoreResultExt, load_transaction,
};

/// Result of reviewing a cancellation request.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub request: CancellationRequest,
    /// Present when the request was approved.
    pub reversal: Option<Reversal>,
}

impl<S: Store> Engine<S> {
    /// File a dispute against a completed transfer the user took part in.
    pub fn create_cancellation_request(
        &self,
        request: NewCancellationRequest,
    ) -> Result<CancellationRequest, LedgerError> {
        let op = Operation::CreateCancellationRequest;
        let result = request.validate().and_then(|()| {
            self.atomically(op, |unit, now| {
                let tx = load_transaction(unit, request.transaction, op)?;
                if tx.status != TxStatus::Completed || !tx.kind.is_transfer() {
                    return Err(LedgerError::NotDisputable {
                        tx: tx.id,
                        status: tx.status,
                        kind: tx.kind,
                    });
                }
                if !tx.involves(request.user) {
                    return Err(LedgerError::NotParty {
                        tx: tx.id,
                        user: request.user,
                    });
                }
                // the store index closes the race this check leaves open
                if unit.pending_cancellation_for(tx.id).for_op(op)?.is_some() {
                    return Err(LedgerError::PendingCancellationExists { tx: tx.id });
                }

                let created = CancellationRequest::new(
                    tx.id,
                    request.user,
                    request.reason.trim().to_string(),
                    now,
                );
                unit.insert_cancellation_request(created.clone())
                    .for_op(op)?;
                Ok(created)
            })
        });
        Self::log_result(op, &request.transaction, &result);
        result
    }

    /// Approve or reject a pending request. Approval reverses the transfer in
    /// the same unit of work, so a failed reversal leaves the request pending.
    pub fn review_cancellation_request(
        &self,
        review: CancellationReview,
    ) -> Result<ReviewOutcome, LedgerError> {
        let op = Operation::ReviewCancellationRequest;
        let result = self.atomically(op, |unit, now| {
            let mut request = unit
                .cancellation_request(review.request)
                .for_op(op)?
                .ok_or(LedgerError::CancellationRequestNotFound(review.request))?;
            if !request.is_pending() {
                return Err(LedgerError::AlreadyReviewed {
                    request: request.id,
                    status: request.status,
                });
            }

            let reversal = match review.action {
                ReviewAction::Approve => {
                    let cancel = CancelTransfer {
                        transaction: request.transaction,
                        admin: review.admin,
                        reason: format!(
                            "cancellation request {} approved; user reason: {}; admin reason: {}",
                            request.id,
                            request.reason,
                            review.reason.as_deref().unwrap_or("none given")
                        ),
                    };
                    Some(self.reverse(unit, &cancel, now, op)?)
                }
                ReviewAction::Reject => None,
            };

            request.status = review.action.outcome();
            request.reviewed_by = Some(review.admin);
            request.review_reason = Some(
                review
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("admin action: {}", request.status)),
            );
            request.updated_at = now;
            unit.update_cancellation_request(&request, RequestStatus::Pending)
                .for_op(op)?;

            info!(
                request = %request.id,
                tx = %request.transaction,
                outcome = %request.status,
                "cancellation request reviewed"
            );
            Ok(ReviewOutcome { request, reversal })
        });
        Self::log_result(op, &review.request, &result);
        result
    }
}
