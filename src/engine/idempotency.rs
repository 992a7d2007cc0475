//! Deduplication of retried transfer requests by client request id.
//!
//! The lookup here reports a friendly conflict; the store's unique index on
//! `request_id` is what closes the race between lookup and insert.

use tracing::debug;

use crate::store::UnitOfWork;

use super::error::{LedgerError, Operation, StoreResultExt};

pub const MAX_REQUEST_ID_LEN: usize = 128;

pub(crate) fn validate_request_id(request_id: Option<&str>) -> Result<(), LedgerError> {
    let Some(request_id) = request_id else {
        return Ok(());
    };
    if request_id.trim().is_empty() {
        return Err(LedgerError::InvalidRequestId("must not be blank"));
    }
    if request_id.len() > MAX_REQUEST_ID_LEN {
        return Err(LedgerError::InvalidRequestId("longer than 128 bytes"));
    }
    if request_id.chars().any(char::is_control) {
        return Err(LedgerError::InvalidRequestId("contains control characters"));
    }
    Ok(())
}

/// Fail with a conflict if `request_id` already names a transaction, whatever
/// its status. A replay never returns the earlier result.
pub(crate) fn ensure_unused<U: UnitOfWork>(
    unit: &U,
    request_id: Option<&str>,
) -> Result<(), LedgerError> {
    let Some(request_id) = request_id else {
        return Ok(());
    };
    let existing = unit
        .transaction_by_request_id(request_id)
        .for_op(Operation::RequestTransfer)?;
    match existing {
        Some(existing) => {
            debug!(
                request_id,
                existing = %existing.id,
                status = %existing.status,
                "duplicate transfer request"
            );
            Err(LedgerError::DuplicateRequest {
                request_id: request_id.to_string(),
                existing: Some(existing.id),
                status: Some(existing.status),
            })
        }
        None => Ok(()),
    }
}
