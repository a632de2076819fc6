use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, CopyId, FineId, LoanId, MemberId, ReservationId};

use crate::{
    Result,
    model::{BookCopy, CopyStatus, Fine, Loan, Reservation},
};

/// Copy persistence port, scoped to what the availability manager needs.
///
/// Methods take `&mut self` because all access happens through a
/// transaction context and reads must observe the transaction's own
/// staged writes.
#[async_trait]
pub trait CopyStore {
    /// Fetches a copy by id.
    async fn copy(&mut self, id: CopyId) -> Result<Option<BookCopy>>;

    /// Stages a new copy for insertion.
    async fn insert_copy(&mut self, copy: BookCopy) -> Result<()>;

    /// Stages an update to an existing copy.
    async fn update_copy(&mut self, copy: BookCopy) -> Result<()>;

    /// Returns one Available copy of the book, if any.
    ///
    /// Selection is deterministic (lowest copy id) so concurrent callers
    /// contend on the same row rather than silently diverging.
    async fn available_copy(&mut self, book_id: BookId) -> Result<Option<BookCopy>>;

    /// Counts copies of a book in the given status.
    async fn count_copies(&mut self, book_id: BookId, status: CopyStatus) -> Result<usize>;
}

/// Loan persistence port, scoped to what the loan ledger needs.
#[async_trait]
pub trait LoanStore {
    /// Fetches a loan by id.
    async fn loan(&mut self, id: LoanId) -> Result<Option<Loan>>;

    /// Stages a new loan for insertion.
    async fn insert_loan(&mut self, loan: Loan) -> Result<()>;

    /// Stages an update to an existing loan.
    async fn update_loan(&mut self, loan: Loan) -> Result<()>;

    /// Counts the member's open loans (Active or Overdue).
    async fn open_loan_count(&mut self, member_id: MemberId) -> Result<usize>;

    /// Returns the open loan holding a copy, if any.
    async fn open_loan_for_copy(&mut self, copy_id: CopyId) -> Result<Option<Loan>>;

    /// Returns Active loans whose due date is strictly before `as_of`.
    ///
    /// Overdue loans are excluded; the sweep that consumes this query is
    /// idempotent because flipped loans stop matching.
    async fn active_loans_due_before(&mut self, as_of: DateTime<Utc>) -> Result<Vec<Loan>>;
}

/// Reservation persistence port, scoped to what the queue needs.
#[async_trait]
pub trait ReservationStore {
    /// Fetches a reservation by id.
    async fn reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Stages a new reservation for insertion.
    async fn insert_reservation(&mut self, reservation: Reservation) -> Result<()>;

    /// Stages an update to an existing reservation.
    async fn update_reservation(&mut self, reservation: Reservation) -> Result<()>;

    /// Counts the member's Active reservations.
    async fn active_reservation_count(&mut self, member_id: MemberId) -> Result<usize>;

    /// Returns the member's Active reservation for a book, if any.
    async fn active_reservation_for(
        &mut self,
        member_id: MemberId,
        book_id: BookId,
    ) -> Result<Option<Reservation>>;

    /// Returns the Active reservations for a book in queue order
    /// (ascending `(reserved_at, id)`).
    async fn active_reservations_for_book(&mut self, book_id: BookId)
    -> Result<Vec<Reservation>>;

    /// Returns the Fulfilled reservation holding a copy, if any.
    async fn fulfilled_reservation_for_copy(
        &mut self,
        copy_id: CopyId,
    ) -> Result<Option<Reservation>>;

    /// Returns Fulfilled reservations whose fulfillment timestamp is
    /// strictly before `cutoff`.
    async fn fulfilled_before(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Reservation>>;
}

/// Fine persistence port, scoped to what the fine calculator needs.
#[async_trait]
pub trait FineStore {
    /// Fetches a fine by id.
    async fn fine(&mut self, id: FineId) -> Result<Option<Fine>>;

    /// Stages a new fine for insertion.
    async fn insert_fine(&mut self, fine: Fine) -> Result<()>;

    /// Stages an update to an existing fine.
    async fn update_fine(&mut self, fine: Fine) -> Result<()>;

    /// Returns the member's Pending fines.
    async fn pending_fines(&mut self, member_id: MemberId) -> Result<Vec<Fine>>;
}

/// A transaction context spanning all four entity stores.
///
/// All writes staged through the capability traits become visible to other
/// transactions only at `commit`. Dropping the context without committing
/// discards every staged write; `rollback` does the same thing explicitly.
#[async_trait]
pub trait StoreTx: CopyStore + LoanStore + ReservationStore + FineStore + Send {
    /// Atomically publishes all staged writes.
    ///
    /// Fails with [`StoreError::VersionConflict`](crate::StoreError) when a
    /// record read or written by this transaction was modified by a
    /// concurrent committer, or when a table this transaction ran a
    /// predicate query against changed underneath it. Nothing is published
    /// on failure.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards all staged writes.
    async fn rollback(self: Box<Self>);
}

/// Factory for transaction contexts.
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a new transaction over the store.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}
