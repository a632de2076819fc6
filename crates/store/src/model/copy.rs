//! Physical copy record and its availability state machine.

use common::{BookId, CopyId};
use serde::{Deserialize, Serialize};

/// Availability status of a physical copy.
///
/// Legal transitions:
/// ```text
/// Available ──► OnLoan      (checkout)
/// OnLoan    ──► Available   (clean return)
/// OnLoan    ──► Damaged     (return with damage)
/// OnLoan    ──► Lost        (loan reported lost)
/// Available ──► Reserved    (fulfillment hold)
/// Reserved  ──► OnLoan      (pickup)
/// Reserved  ──► Available   (hold expired)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CopyStatus {
    /// On the shelf, can be loaned or held.
    #[default]
    Available,

    /// Currently lent out (has an open loan).
    OnLoan,

    /// Held for a fulfilled reservation awaiting pickup.
    Reserved,

    /// Copy is lost.
    Lost,

    /// Copy was returned damaged.
    Damaged,
}

impl CopyStatus {
    /// Returns true if moving from this status to `to` is a legal transition.
    pub fn can_transition_to(&self, to: CopyStatus) -> bool {
        use CopyStatus::*;
        matches!(
            (self, to),
            (Available, OnLoan)
                | (OnLoan, Available)
                | (OnLoan, Damaged)
                | (OnLoan, Lost)
                | (Available, Reserved)
                | (Reserved, OnLoan)
                | (Reserved, Available)
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Available => "Available",
            CopyStatus::OnLoan => "OnLoan",
            CopyStatus::Reserved => "Reserved",
            CopyStatus::Lost => "Lost",
            CopyStatus::Damaged => "Damaged",
        }
    }
}

impl std::fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One physical copy of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookCopy {
    /// Unique copy identifier.
    pub id: CopyId,

    /// The title this copy belongs to.
    pub book_id: BookId,

    /// Current availability status.
    pub status: CopyStatus,

    /// Record version for optimistic concurrency.
    pub version: u64,
}

impl BookCopy {
    /// Creates a new copy of a book, on the shelf.
    pub fn new(book_id: BookId) -> Self {
        Self {
            id: CopyId::new(),
            book_id,
            status: CopyStatus::Available,
            version: 0,
        }
    }
}
