//! Loan record and its lifecycle state machine.

use chrono::{DateTime, Utc};
use common::{BookId, CopyId, LoanId, MemberId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a loan.
///
/// State transitions:
/// ```text
/// Active ──┬──► Returned
///          ├──► Overdue ──┬──► Returned
///          │              └──► Lost
///          └──► Lost
/// ```
/// Renewal keeps the loan `Active` and only moves its due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LoanStatus {
    /// Loan is open and within its due date (as of the last sweep).
    #[default]
    Active,

    /// Copy has been returned (terminal).
    Returned,

    /// Loan is open and past its due date.
    Overdue,

    /// Copy was reported lost while on loan (terminal).
    Lost,
}

impl LoanStatus {
    /// Returns true while the copy is still out with the member.
    pub fn is_open(&self) -> bool {
        matches!(self, LoanStatus::Active | LoanStatus::Overdue)
    }

    /// Returns true if the loan can be renewed in this status.
    pub fn can_renew(&self) -> bool {
        matches!(self, LoanStatus::Active)
    }

    /// Returns true if the copy can be returned in this status.
    pub fn can_return(&self) -> bool {
        self.is_open()
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Returned | LoanStatus::Lost)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "Active",
            LoanStatus::Returned => "Returned",
            LoanStatus::Overdue => "Overdue",
            LoanStatus::Lost => "Lost",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A loan of one physical copy to one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    /// Unique loan identifier.
    pub id: LoanId,

    /// The borrowing member.
    pub member_id: MemberId,

    /// The copy that was lent out.
    pub copy_id: CopyId,

    /// The title of the lent copy, denormalized for queue lookups.
    pub book_id: BookId,

    /// When the loan was made.
    pub loan_date: DateTime<Utc>,

    /// When the copy is due back.
    pub due_date: DateTime<Utc>,

    /// When the copy came back, if it has.
    pub return_date: Option<DateTime<Utc>>,

    /// Current lifecycle status.
    pub status: LoanStatus,

    /// Record version for optimistic concurrency.
    pub version: u64,
}

impl Loan {
    /// Creates a new active loan.
    pub fn new(
        member_id: MemberId,
        copy_id: CopyId,
        book_id: BookId,
        loan_date: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LoanId::new(),
            member_id,
            copy_id,
            book_id,
            loan_date,
            due_date,
            return_date: None,
            status: LoanStatus::Active,
            version: 0,
        }
    }

    /// Returns true if the loan is open and past due as of `as_of`.
    pub fn is_past_due(&self, as_of: DateTime<Utc>) -> bool {
        self.status.is_open() && as_of > self.due_date
    }
}
