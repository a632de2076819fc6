//! Fine record and its settlement state machine.

use chrono::{DateTime, Utc};
use common::{FineId, LoanId, MemberId, Money};
use serde::{Deserialize, Serialize};

/// Why a fine was assessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FineKind {
    /// Late return, billed per day.
    Overdue,

    /// Copy returned damaged.
    Damage,

    /// Copy reported lost, billed at replacement cost.
    Lost,

    /// Staff-assessed fine of some other kind.
    Other,
}

impl FineKind {
    /// Returns the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FineKind::Overdue => "Overdue",
            FineKind::Damage => "Damage",
            FineKind::Lost => "Lost",
            FineKind::Other => "Other",
        }
    }
}

impl std::fmt::Display for FineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement status of a fine.
///
/// A fine moves `Pending → Paid` or `Pending → Waived` exactly once; both
/// outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FineStatus {
    /// Owed and unsettled; counts toward the member's outstanding balance.
    #[default]
    Pending,

    /// Settled by payment (terminal).
    Paid,

    /// Forgiven by staff (terminal).
    Waived,
}

impl FineStatus {
    /// Returns true if the fine can still be paid or waived.
    pub fn can_settle(&self) -> bool {
        matches!(self, FineStatus::Pending)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FineStatus::Pending => "Pending",
            FineStatus::Paid => "Paid",
            FineStatus::Waived => "Waived",
        }
    }
}

impl std::fmt::Display for FineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A monetary penalty owed by a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fine {
    /// Unique fine identifier.
    pub id: FineId,

    /// The member who owes the fine.
    pub member_id: MemberId,

    /// The loan that gave rise to the fine, when there is one.
    pub loan_id: Option<LoanId>,

    /// Amount owed.
    pub amount: Money,

    /// Why the fine was assessed.
    pub kind: FineKind,

    /// Settlement status.
    pub status: FineStatus,

    /// Human-readable explanation for the member's record.
    pub description: String,

    /// When the fine was assessed.
    pub assessed_at: DateTime<Utc>,

    /// Record version for optimistic concurrency.
    pub version: u64,
}

impl Fine {
    /// Creates a new pending fine.
    pub fn new(
        member_id: MemberId,
        loan_id: Option<LoanId>,
        amount: Money,
        kind: FineKind,
        description: impl Into<String>,
        assessed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FineId::new(),
            member_id,
            loan_id,
            amount,
            kind,
            status: FineStatus::Pending,
            description: description.into(),
            assessed_at,
            version: 0,
        }
    }
}
