//! Error taxonomy for circulation operations.
//!
//! Rule violations ([`RuleViolation`]) are well-formed requests the library's
//! policy rejects; everything else is a lookup miss, an illegal state machine
//! edge, or an infrastructure failure. Callers can branch on the category
//! rather than parsing messages.

use common::{BookId, CopyId, MemberId, Money};
use store::StoreError;
use thiserror::Error;

/// A policy rule that rejected an otherwise well-formed request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    #[error("member {member_id} is not in active standing")]
    MemberNotActive { member_id: MemberId },

    #[error("member {member_id} has an outstanding fine balance of {balance}")]
    OutstandingFines { member_id: MemberId, balance: Money },

    #[error("member {member_id} already has {count} open loans (limit {limit})")]
    LoanLimitReached {
        member_id: MemberId,
        count: usize,
        limit: usize,
    },

    #[error("member {member_id} already has {count} active reservations (limit {limit})")]
    ReservationLimitReached {
        member_id: MemberId,
        count: usize,
        limit: usize,
    },

    #[error("member {member_id} already holds an active reservation for book {book_id}")]
    DuplicateReservation {
        member_id: MemberId,
        book_id: BookId,
    },

    #[error("book {book_id} has copies available; check one out instead of reserving")]
    AvailableCopyExists { book_id: BookId },

    #[error("copy {copy_id} is not available for checkout")]
    CopyUnavailable { copy_id: CopyId },

    #[error("copy {copy_id} is held for another member's reservation")]
    ReservedForAnotherMember { copy_id: CopyId },

    #[error("copy {copy_id} does not belong to book {book_id}")]
    CopyBookMismatch { copy_id: CopyId, book_id: BookId },

    #[error("renewal blocked: book {book_id} has an active reservation queue")]
    RenewalBlockedByReservation { book_id: BookId },

    #[error("invalid due date: {reason}")]
    InvalidDueDate { reason: String },

    #[error("amount {amount} must be positive")]
    NonPositiveAmount { amount: Money },

    #[error("payment of {paid} exceeds the {owed} owed")]
    Overpayment { paid: Money, owed: Money },

    #[error("a waive reason is required")]
    EmptyWaiveReason,

    #[error("member {member_id} has no contact information on file")]
    MissingContactInfo { member_id: MemberId },
}

/// Errors surfaced by circulation operations.
#[derive(Debug, Error)]
pub enum CirculationError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error(transparent)]
    Rule(#[from] RuleViolation),

    #[error("concurrent modification, safe to retry: {0}")]
    Conflict(StoreError),

    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl CirculationError {
    /// True when retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<StoreError> for CirculationError {
    fn from(err: StoreError) -> Self {
        if err.is_retryable() {
            Self::Conflict(err)
        } else {
            Self::Storage(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, CirculationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_map_to_retryable() {
        let err = CirculationError::from(StoreError::VersionConflict {
            entity: "loan",
            id: "abc".to_string(),
            expected: 1,
            actual: 2,
        });
        assert!(matches!(err, CirculationError::Conflict(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_backend_errors_are_not_retryable() {
        let err = CirculationError::from(StoreError::Backend("disk full".to_string()));
        assert!(matches!(err, CirculationError::Storage(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rule_violation_display() {
        let member_id = MemberId::new();
        let err = CirculationError::from(RuleViolation::LoanLimitReached {
            member_id,
            count: 5,
            limit: 5,
        });
        assert!(err.to_string().contains("open loans"));
        assert!(!err.is_retryable());
    }
}
