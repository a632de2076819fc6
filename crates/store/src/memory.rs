use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, CopyId, FineId, LoanId, MemberId, ReservationId};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    model::{
        BookCopy, CopyStatus, Fine, FineStatus, Loan, LoanStatus, Reservation, ReservationStatus,
    },
    store::{CopyStore, FineStore, LoanStore, ReservationStore, Store, StoreTx},
};

/// Table names used in conflict reporting.
mod table {
    pub const COPIES: &str = "copies";
    pub const LOANS: &str = "loans";
    pub const RESERVATIONS: &str = "reservations";
    pub const FINES: &str = "fines";
}

/// Per-table generation counters.
///
/// A table's generation is bumped on every committed write to it. A
/// transaction that ran a predicate query against a table records the
/// generation it saw and fails at commit if it has moved, which closes
/// check-then-act races such as two concurrent reservation admissions
/// both passing the limit check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Generations {
    copies: u64,
    loans: u64,
    reservations: u64,
    fines: u64,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    copies: HashMap<CopyId, BookCopy>,
    loans: HashMap<LoanId, Loan>,
    reservations: HashMap<ReservationId, Reservation>,
    fines: HashMap<FineId, Fine>,
    generations: Generations,
}

/// In-memory store with transactional semantics and optimistic concurrency.
///
/// Transactions work on a private clone of the tables. Writes are staged
/// locally and published atomically at commit under a single write lock,
/// after validating that every record this transaction wrote still holds
/// the version observed at staging time, and that every table it ran a
/// predicate query against is unchanged. A losing transaction fails with
/// [`StoreError::VersionConflict`] or [`StoreError::PredicateConflict`]
/// and publishes nothing.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a copy directly, outside any transaction.
    ///
    /// Catalog management is not part of the engine; this is the seam the
    /// surrounding system (and tests) use to seed inventory.
    pub async fn add_copy(&self, book_id: BookId) -> BookCopy {
        let copy = BookCopy::new(book_id);
        let mut tables = self.inner.write().await;
        tables.copies.insert(copy.id, copy.clone());
        tables.generations.copies += 1;
        copy
    }

    /// Reads a copy outside any transaction (test observation).
    pub async fn get_copy(&self, id: CopyId) -> Option<BookCopy> {
        self.inner.read().await.copies.get(&id).cloned()
    }

    /// Reads a loan outside any transaction (test observation).
    pub async fn get_loan(&self, id: LoanId) -> Option<Loan> {
        self.inner.read().await.loans.get(&id).cloned()
    }

    /// Reads a reservation outside any transaction (test observation).
    pub async fn get_reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.inner.read().await.reservations.get(&id).cloned()
    }

    /// Reads a fine outside any transaction (test observation).
    pub async fn get_fine(&self, id: FineId) -> Option<Fine> {
        self.inner.read().await.fines.get(&id).cloned()
    }

    /// Returns all fines owed by a member (test observation).
    pub async fn fines_for_member(&self, member_id: MemberId) -> Vec<Fine> {
        self.inner
            .read()
            .await
            .fines
            .values()
            .filter(|f| f.member_id == member_id)
            .cloned()
            .collect()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        let mut tables = self.inner.write().await;
        *tables = Tables::default();
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tables = self.inner.read().await;
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.inner),
            base_generations: tables.generations,
            working: tables.clone(),
            predicate_reads: HashSet::new(),
            staged: StagedWrites::default(),
        }))
    }
}

/// Write intents recorded by a transaction. Updates are keyed by the
/// version each record held when the transaction first touched it.
#[derive(Debug, Default)]
struct StagedWrites {
    inserted_copies: HashSet<CopyId>,
    updated_copies: HashMap<CopyId, u64>,
    inserted_loans: HashSet<LoanId>,
    updated_loans: HashMap<LoanId, u64>,
    inserted_reservations: HashSet<ReservationId>,
    updated_reservations: HashMap<ReservationId, u64>,
    inserted_fines: HashSet<FineId>,
    updated_fines: HashMap<FineId, u64>,
}

impl StagedWrites {
    fn is_empty(&self) -> bool {
        self.inserted_copies.is_empty()
            && self.updated_copies.is_empty()
            && self.inserted_loans.is_empty()
            && self.updated_loans.is_empty()
            && self.inserted_reservations.is_empty()
            && self.updated_reservations.is_empty()
            && self.inserted_fines.is_empty()
            && self.updated_fines.is_empty()
    }
}

/// A transaction over [`InMemoryStore`].
pub struct MemoryTx {
    shared: Arc<RwLock<Tables>>,
    base_generations: Generations,
    working: Tables,
    predicate_reads: HashSet<&'static str>,
    staged: StagedWrites,
}

impl MemoryTx {
    fn mark_predicate_read(&mut self, table: &'static str) {
        self.predicate_reads.insert(table);
    }
}

#[async_trait]
impl CopyStore for MemoryTx {
    async fn copy(&mut self, id: CopyId) -> Result<Option<BookCopy>> {
        Ok(self.working.copies.get(&id).cloned())
    }

    async fn insert_copy(&mut self, copy: BookCopy) -> Result<()> {
        if self.working.copies.contains_key(&copy.id) {
            return Err(StoreError::DuplicateRecord {
                entity: table::COPIES,
                id: copy.id.to_string(),
            });
        }
        self.staged.inserted_copies.insert(copy.id);
        self.working.copies.insert(copy.id, copy);
        Ok(())
    }

    async fn update_copy(&mut self, copy: BookCopy) -> Result<()> {
        let current =
            self.working
                .copies
                .get(&copy.id)
                .ok_or_else(|| StoreError::RecordNotFound {
                    entity: table::COPIES,
                    id: copy.id.to_string(),
                })?;
        if !self.staged.inserted_copies.contains(&copy.id) {
            self.staged
                .updated_copies
                .entry(copy.id)
                .or_insert(current.version);
        }
        self.working.copies.insert(copy.id, copy);
        Ok(())
    }

    async fn available_copy(&mut self, book_id: BookId) -> Result<Option<BookCopy>> {
        self.mark_predicate_read(table::COPIES);
        Ok(self
            .working
            .copies
            .values()
            .filter(|c| c.book_id == book_id && c.status == CopyStatus::Available)
            .min_by_key(|c| c.id)
            .cloned())
    }

    async fn count_copies(&mut self, book_id: BookId, status: CopyStatus) -> Result<usize> {
        self.mark_predicate_read(table::COPIES);
        Ok(self
            .working
            .copies
            .values()
            .filter(|c| c.book_id == book_id && c.status == status)
            .count())
    }
}

#[async_trait]
impl LoanStore for MemoryTx {
    async fn loan(&mut self, id: LoanId) -> Result<Option<Loan>> {
        Ok(self.working.loans.get(&id).cloned())
    }

    async fn insert_loan(&mut self, loan: Loan) -> Result<()> {
        if self.working.loans.contains_key(&loan.id) {
            return Err(StoreError::DuplicateRecord {
                entity: table::LOANS,
                id: loan.id.to_string(),
            });
        }
        self.staged.inserted_loans.insert(loan.id);
        self.working.loans.insert(loan.id, loan);
        Ok(())
    }

    async fn update_loan(&mut self, loan: Loan) -> Result<()> {
        let current =
            self.working
                .loans
                .get(&loan.id)
                .ok_or_else(|| StoreError::RecordNotFound {
                    entity: table::LOANS,
                    id: loan.id.to_string(),
                })?;
        if !self.staged.inserted_loans.contains(&loan.id) {
            self.staged
                .updated_loans
                .entry(loan.id)
                .or_insert(current.version);
        }
        self.working.loans.insert(loan.id, loan);
        Ok(())
    }

    async fn open_loan_count(&mut self, member_id: MemberId) -> Result<usize> {
        self.mark_predicate_read(table::LOANS);
        Ok(self
            .working
            .loans
            .values()
            .filter(|l| l.member_id == member_id && l.status.is_open())
            .count())
    }

    async fn open_loan_for_copy(&mut self, copy_id: CopyId) -> Result<Option<Loan>> {
        self.mark_predicate_read(table::LOANS);
        Ok(self
            .working
            .loans
            .values()
            .find(|l| l.copy_id == copy_id && l.status.is_open())
            .cloned())
    }

    async fn active_loans_due_before(&mut self, as_of: DateTime<Utc>) -> Result<Vec<Loan>> {
        self.mark_predicate_read(table::LOANS);
        let mut loans: Vec<_> = self
            .working
            .loans
            .values()
            .filter(|l| l.status == LoanStatus::Active && l.due_date < as_of)
            .cloned()
            .collect();
        loans.sort_by_key(|l| (l.due_date, l.id));
        Ok(loans)
    }
}

#[async_trait]
impl ReservationStore for MemoryTx {
    async fn reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.working.reservations.get(&id).cloned())
    }

    async fn insert_reservation(&mut self, reservation: Reservation) -> Result<()> {
        if self.working.reservations.contains_key(&reservation.id) {
            return Err(StoreError::DuplicateRecord {
                entity: table::RESERVATIONS,
                id: reservation.id.to_string(),
            });
        }
        self.staged.inserted_reservations.insert(reservation.id);
        self.working
            .reservations
            .insert(reservation.id, reservation);
        Ok(())
    }

    async fn update_reservation(&mut self, reservation: Reservation) -> Result<()> {
        let current = self
            .working
            .reservations
            .get(&reservation.id)
            .ok_or_else(|| StoreError::RecordNotFound {
                entity: table::RESERVATIONS,
                id: reservation.id.to_string(),
            })?;
        if !self.staged.inserted_reservations.contains(&reservation.id) {
            self.staged
                .updated_reservations
                .entry(reservation.id)
                .or_insert(current.version);
        }
        self.working
            .reservations
            .insert(reservation.id, reservation);
        Ok(())
    }

    async fn active_reservation_count(&mut self, member_id: MemberId) -> Result<usize> {
        self.mark_predicate_read(table::RESERVATIONS);
        Ok(self
            .working
            .reservations
            .values()
            .filter(|r| r.member_id == member_id && r.status == ReservationStatus::Active)
            .count())
    }

    async fn active_reservation_for(
        &mut self,
        member_id: MemberId,
        book_id: BookId,
    ) -> Result<Option<Reservation>> {
        self.mark_predicate_read(table::RESERVATIONS);
        Ok(self
            .working
            .reservations
            .values()
            .find(|r| {
                r.member_id == member_id
                    && r.book_id == book_id
                    && r.status == ReservationStatus::Active
            })
            .cloned())
    }

    async fn active_reservations_for_book(
        &mut self,
        book_id: BookId,
    ) -> Result<Vec<Reservation>> {
        self.mark_predicate_read(table::RESERVATIONS);
        let mut reservations: Vec<_> = self
            .working
            .reservations
            .values()
            .filter(|r| r.book_id == book_id && r.status == ReservationStatus::Active)
            .cloned()
            .collect();
        reservations.sort_by_key(Reservation::queue_key);
        Ok(reservations)
    }

    async fn fulfilled_reservation_for_copy(
        &mut self,
        copy_id: CopyId,
    ) -> Result<Option<Reservation>> {
        self.mark_predicate_read(table::RESERVATIONS);
        Ok(self
            .working
            .reservations
            .values()
            .find(|r| r.copy_id == Some(copy_id) && r.status == ReservationStatus::Fulfilled)
            .cloned())
    }

    async fn fulfilled_before(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Reservation>> {
        self.mark_predicate_read(table::RESERVATIONS);
        let mut reservations: Vec<_> = self
            .working
            .reservations
            .values()
            .filter(|r| {
                r.status == ReservationStatus::Fulfilled
                    && r.fulfilled_at.is_some_and(|at| at < cutoff)
            })
            .cloned()
            .collect();
        reservations.sort_by_key(|r| (r.fulfilled_at, r.id));
        Ok(reservations)
    }
}

#[async_trait]
impl FineStore for MemoryTx {
    async fn fine(&mut self, id: FineId) -> Result<Option<Fine>> {
        Ok(self.working.fines.get(&id).cloned())
    }

    async fn insert_fine(&mut self, fine: Fine) -> Result<()> {
        if self.working.fines.contains_key(&fine.id) {
            return Err(StoreError::DuplicateRecord {
                entity: table::FINES,
                id: fine.id.to_string(),
            });
        }
        self.staged.inserted_fines.insert(fine.id);
        self.working.fines.insert(fine.id, fine);
        Ok(())
    }

    async fn update_fine(&mut self, fine: Fine) -> Result<()> {
        let current =
            self.working
                .fines
                .get(&fine.id)
                .ok_or_else(|| StoreError::RecordNotFound {
                    entity: table::FINES,
                    id: fine.id.to_string(),
                })?;
        if !self.staged.inserted_fines.contains(&fine.id) {
            self.staged
                .updated_fines
                .entry(fine.id)
                .or_insert(current.version);
        }
        self.working.fines.insert(fine.id, fine);
        Ok(())
    }

    async fn pending_fines(&mut self, member_id: MemberId) -> Result<Vec<Fine>> {
        self.mark_predicate_read(table::FINES);
        let mut fines: Vec<_> = self
            .working
            .fines
            .values()
            .filter(|f| f.member_id == member_id && f.status == FineStatus::Pending)
            .cloned()
            .collect();
        fines.sort_by_key(|f| (f.assessed_at, f.id));
        Ok(fines)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut shared = self.shared.write().await;

        // Predicate validation: any table this transaction queried by
        // predicate must be unchanged since begin.
        for &tbl in &self.predicate_reads {
            let (seen, current) = match tbl {
                table::COPIES => (self.base_generations.copies, shared.generations.copies),
                table::LOANS => (self.base_generations.loans, shared.generations.loans),
                table::RESERVATIONS => (
                    self.base_generations.reservations,
                    shared.generations.reservations,
                ),
                _ => (self.base_generations.fines, shared.generations.fines),
            };
            if seen != current {
                return Err(StoreError::PredicateConflict { entity: tbl });
            }
        }

        // Version validation for every written record.
        for (&id, &expected) in &self.staged.updated_copies {
            match shared.copies.get(&id) {
                Some(current) if current.version == expected => {}
                Some(current) => {
                    return Err(StoreError::VersionConflict {
                        entity: table::COPIES,
                        id: id.to_string(),
                        expected,
                        actual: current.version,
                    });
                }
                None => {
                    return Err(StoreError::RecordNotFound {
                        entity: table::COPIES,
                        id: id.to_string(),
                    });
                }
            }
        }
        for (&id, &expected) in &self.staged.updated_loans {
            match shared.loans.get(&id) {
                Some(current) if current.version == expected => {}
                Some(current) => {
                    return Err(StoreError::VersionConflict {
                        entity: table::LOANS,
                        id: id.to_string(),
                        expected,
                        actual: current.version,
                    });
                }
                None => {
                    return Err(StoreError::RecordNotFound {
                        entity: table::LOANS,
                        id: id.to_string(),
                    });
                }
            }
        }
        for (&id, &expected) in &self.staged.updated_reservations {
            match shared.reservations.get(&id) {
                Some(current) if current.version == expected => {}
                Some(current) => {
                    return Err(StoreError::VersionConflict {
                        entity: table::RESERVATIONS,
                        id: id.to_string(),
                        expected,
                        actual: current.version,
                    });
                }
                None => {
                    return Err(StoreError::RecordNotFound {
                        entity: table::RESERVATIONS,
                        id: id.to_string(),
                    });
                }
            }
        }
        for (&id, &expected) in &self.staged.updated_fines {
            match shared.fines.get(&id) {
                Some(current) if current.version == expected => {}
                Some(current) => {
                    return Err(StoreError::VersionConflict {
                        entity: table::FINES,
                        id: id.to_string(),
                        expected,
                        actual: current.version,
                    });
                }
                None => {
                    return Err(StoreError::RecordNotFound {
                        entity: table::FINES,
                        id: id.to_string(),
                    });
                }
            }
        }
        for id in &self.staged.inserted_copies {
            if shared.copies.contains_key(id) {
                return Err(StoreError::DuplicateRecord {
                    entity: table::COPIES,
                    id: id.to_string(),
                });
            }
        }
        for id in &self.staged.inserted_loans {
            if shared.loans.contains_key(id) {
                return Err(StoreError::DuplicateRecord {
                    entity: table::LOANS,
                    id: id.to_string(),
                });
            }
        }
        for id in &self.staged.inserted_reservations {
            if shared.reservations.contains_key(id) {
                return Err(StoreError::DuplicateRecord {
                    entity: table::RESERVATIONS,
                    id: id.to_string(),
                });
            }
        }
        for id in &self.staged.inserted_fines {
            if shared.fines.contains_key(id) {
                return Err(StoreError::DuplicateRecord {
                    entity: table::FINES,
                    id: id.to_string(),
                });
            }
        }

        // Publish. Updated records get their version bumped past the one
        // this transaction observed.
        let staged = self.staged;
        let working = self.working;

        let mut wrote_copies = false;
        let mut wrote_loans = false;
        let mut wrote_reservations = false;
        let mut wrote_fines = false;

        for id in staged.inserted_copies {
            if let Some(copy) = working.copies.get(&id) {
                shared.copies.insert(id, copy.clone());
                wrote_copies = true;
            }
        }
        for (id, expected) in staged.updated_copies {
            if let Some(copy) = working.copies.get(&id) {
                let mut copy = copy.clone();
                copy.version = expected + 1;
                shared.copies.insert(id, copy);
                wrote_copies = true;
            }
        }
        for id in staged.inserted_loans {
            if let Some(loan) = working.loans.get(&id) {
                shared.loans.insert(id, loan.clone());
                wrote_loans = true;
            }
        }
        for (id, expected) in staged.updated_loans {
            if let Some(loan) = working.loans.get(&id) {
                let mut loan = loan.clone();
                loan.version = expected + 1;
                shared.loans.insert(id, loan);
                wrote_loans = true;
            }
        }
        for id in staged.inserted_reservations {
            if let Some(reservation) = working.reservations.get(&id) {
                shared.reservations.insert(id, reservation.clone());
                wrote_reservations = true;
            }
        }
        for (id, expected) in staged.updated_reservations {
            if let Some(reservation) = working.reservations.get(&id) {
                let mut reservation = reservation.clone();
                reservation.version = expected + 1;
                shared.reservations.insert(id, reservation);
                wrote_reservations = true;
            }
        }
        for id in staged.inserted_fines {
            if let Some(fine) = working.fines.get(&id) {
                shared.fines.insert(id, fine.clone());
                wrote_fines = true;
            }
        }
        for (id, expected) in staged.updated_fines {
            if let Some(fine) = working.fines.get(&id) {
                let mut fine = fine.clone();
                fine.version = expected + 1;
                shared.fines.insert(id, fine);
                wrote_fines = true;
            }
        }

        if wrote_copies {
            shared.generations.copies += 1;
        }
        if wrote_loans {
            shared.generations.loans += 1;
        }
        if wrote_reservations {
            shared.generations.reservations += 1;
        }
        if wrote_fines {
            shared.generations.fines += 1;
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        // Staged writes live only in the working clone; dropping it is the rollback.
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FineKind;
    use common::Money;

    async fn seeded_copy(store: &InMemoryStore) -> BookCopy {
        store.add_copy(BookId::new()).await
    }

    #[tokio::test]
    async fn staged_writes_invisible_until_commit() {
        let store = InMemoryStore::new();
        let copy = seeded_copy(&store).await;

        let mut tx = store.begin().await.unwrap();
        let mut held = tx.copy(copy.id).await.unwrap().unwrap();
        held.status = CopyStatus::OnLoan;
        tx.update_copy(held).await.unwrap();

        assert_eq!(
            store.get_copy(copy.id).await.unwrap().status,
            CopyStatus::Available
        );

        tx.commit().await.unwrap();
        assert_eq!(
            store.get_copy(copy.id).await.unwrap().status,
            CopyStatus::OnLoan
        );
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = InMemoryStore::new();
        let copy = seeded_copy(&store).await;

        let mut tx = store.begin().await.unwrap();
        let mut held = tx.copy(copy.id).await.unwrap().unwrap();
        held.status = CopyStatus::OnLoan;
        tx.update_copy(held).await.unwrap();
        tx.rollback().await;

        assert_eq!(
            store.get_copy(copy.id).await.unwrap().status,
            CopyStatus::Available
        );
    }

    #[tokio::test]
    async fn read_your_own_writes() {
        let store = InMemoryStore::new();
        let book_id = BookId::new();
        let copy = store.add_copy(book_id).await;

        let mut tx = store.begin().await.unwrap();
        let mut held = tx.copy(copy.id).await.unwrap().unwrap();
        held.status = CopyStatus::OnLoan;
        tx.update_copy(held).await.unwrap();

        assert_eq!(
            tx.copy(copy.id).await.unwrap().unwrap().status,
            CopyStatus::OnLoan
        );
        assert!(tx.available_copy(book_id).await.unwrap().is_none());
        tx.rollback().await;
    }

    #[tokio::test]
    async fn concurrent_update_loses_with_version_conflict() {
        let store = InMemoryStore::new();
        let copy = seeded_copy(&store).await;

        let mut tx1 = store.begin().await.unwrap();
        let mut tx2 = store.begin().await.unwrap();

        let mut c1 = tx1.copy(copy.id).await.unwrap().unwrap();
        c1.status = CopyStatus::OnLoan;
        tx1.update_copy(c1).await.unwrap();

        let mut c2 = tx2.copy(copy.id).await.unwrap().unwrap();
        c2.status = CopyStatus::Reserved;
        tx2.update_copy(c2).await.unwrap();

        tx1.commit().await.unwrap();
        let err = tx2.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
        assert!(err.is_retryable());

        assert_eq!(
            store.get_copy(copy.id).await.unwrap().status,
            CopyStatus::OnLoan
        );
    }

    #[tokio::test]
    async fn predicate_read_conflicts_with_concurrent_insert() {
        let store = InMemoryStore::new();
        let book_id = BookId::new();
        let member = MemberId::new();

        // Both transactions check the member's reservation count, then
        // both insert. Only one may win.
        let mut tx1 = store.begin().await.unwrap();
        let mut tx2 = store.begin().await.unwrap();

        assert_eq!(tx1.active_reservation_count(member).await.unwrap(), 0);
        assert_eq!(tx2.active_reservation_count(member).await.unwrap(), 0);

        tx1.insert_reservation(Reservation::new(member, book_id, Utc::now()))
            .await
            .unwrap();
        tx2.insert_reservation(Reservation::new(member, book_id, Utc::now()))
            .await
            .unwrap();

        tx1.commit().await.unwrap();
        let err = tx2.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::PredicateConflict { .. }));
    }

    #[tokio::test]
    async fn commit_bumps_record_version() {
        let store = InMemoryStore::new();
        let copy = seeded_copy(&store).await;
        assert_eq!(copy.version, 0);

        let mut tx = store.begin().await.unwrap();
        let mut held = tx.copy(copy.id).await.unwrap().unwrap();
        held.status = CopyStatus::OnLoan;
        tx.update_copy(held).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_copy(copy.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn double_update_in_one_tx_bumps_version_once() {
        let store = InMemoryStore::new();
        let copy = seeded_copy(&store).await;

        let mut tx = store.begin().await.unwrap();
        let mut held = tx.copy(copy.id).await.unwrap().unwrap();
        held.status = CopyStatus::OnLoan;
        tx.update_copy(held.clone()).await.unwrap();
        held.status = CopyStatus::Available;
        tx.update_copy(held).await.unwrap();
        tx.commit().await.unwrap();

        let published = store.get_copy(copy.id).await.unwrap();
        assert_eq!(published.version, 1);
        assert_eq!(published.status, CopyStatus::Available);
    }

    #[tokio::test]
    async fn update_missing_record_fails() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let ghost = BookCopy::new(BookId::new());
        let err = tx.update_copy(ghost).await.unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound { .. }));
        tx.rollback().await;
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let loan = Loan::new(
            MemberId::new(),
            CopyId::new(),
            BookId::new(),
            Utc::now(),
            Utc::now() + chrono::Duration::days(14),
        );
        tx.insert_loan(loan.clone()).await.unwrap();
        let err = tx.insert_loan(loan).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRecord { .. }));
        tx.rollback().await;
    }

    #[tokio::test]
    async fn read_only_commit_never_conflicts() {
        let store = InMemoryStore::new();
        let book_id = BookId::new();

        let mut tx = store.begin().await.unwrap();
        // Predicate read only, no writes.
        assert!(tx.available_copy(book_id).await.unwrap().is_none());

        // Another committer changes the copies table.
        store.add_copy(book_id).await;

        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn queue_order_query_sorts_by_reserved_at_then_id() {
        let store = InMemoryStore::new();
        let book_id = BookId::new();
        let t0 = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let later = Reservation::new(MemberId::new(), book_id, t0 + chrono::Duration::minutes(5));
        let earlier = Reservation::new(MemberId::new(), book_id, t0);
        tx.insert_reservation(later.clone()).await.unwrap();
        tx.insert_reservation(earlier.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let queue = tx.active_reservations_for_book(book_id).await.unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].id, earlier.id);
        assert_eq!(queue[1].id, later.id);
        tx.rollback().await;
    }

    #[tokio::test]
    async fn pending_fines_filters_settled() {
        let store = InMemoryStore::new();
        let member = MemberId::new();

        let mut tx = store.begin().await.unwrap();
        let pending = Fine::new(
            member,
            None,
            Money::from_cents(250),
            FineKind::Overdue,
            "late",
            Utc::now(),
        );
        let mut paid = Fine::new(
            member,
            None,
            Money::from_cents(100),
            FineKind::Other,
            "misc",
            Utc::now(),
        );
        paid.status = FineStatus::Paid;
        tx.insert_fine(pending.clone()).await.unwrap();
        tx.insert_fine(paid).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let fines = tx.pending_fines(member).await.unwrap();
        assert_eq!(fines.len(), 1);
        assert_eq!(fines[0].id, pending.id);
        tx.rollback().await;
    }
}
