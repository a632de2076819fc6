//! Reservation queue: placing holds, fulfilling them in order, and expiring
//! uncollected pickups.
//!
//! Queue position is never stored. The queue for a book is its active
//! reservations ordered by `(reserved_at, id)`, so a member's rank is always
//! derived from that ordering and never goes stale as neighbours leave.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{BookId, CopyId, MemberId, ReservationId};
use serde_json::json;
use store::{CopyStatus, Reservation, ReservationStatus, StoreTx};

use crate::availability;
use crate::error::{CirculationError, Result, RuleViolation};
use crate::policy::CirculationPolicy;
use crate::ports::{MemberDirectory, Notification, NotificationKind};

/// Manages the hold queue for each book.
#[derive(Clone)]
pub struct ReservationQueue {
    policy: CirculationPolicy,
    members: Arc<dyn MemberDirectory>,
}

impl ReservationQueue {
    pub fn new(policy: CirculationPolicy, members: Arc<dyn MemberDirectory>) -> Self {
        Self { policy, members }
    }

    /// Places a hold for a member on a book.
    ///
    /// Holds exist for books nobody can walk up and borrow: if any copy is
    /// `Available` the request is rejected in favour of a checkout.
    pub async fn create(
        &self,
        tx: &mut dyn StoreTx,
        member_id: MemberId,
        book_id: BookId,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        if !self.members.standing(member_id).await.is_active() {
            return Err(RuleViolation::MemberNotActive { member_id }.into());
        }

        let count = tx.active_reservation_count(member_id).await?;
        if count >= self.policy.max_active_reservations {
            return Err(RuleViolation::ReservationLimitReached {
                member_id,
                count,
                limit: self.policy.max_active_reservations,
            }
            .into());
        }

        if tx
            .active_reservation_for(member_id, book_id)
            .await?
            .is_some()
        {
            return Err(RuleViolation::DuplicateReservation { member_id, book_id }.into());
        }

        if tx.count_copies(book_id, CopyStatus::Available).await? > 0 {
            return Err(RuleViolation::AvailableCopyExists { book_id }.into());
        }

        let reservation = Reservation::new(member_id, book_id, now);
        tx.insert_reservation(reservation.clone()).await?;
        tracing::debug!(reservation_id = %reservation.id, %member_id, %book_id, "reservation placed");
        Ok(reservation)
    }

    /// Cancels an active reservation.
    ///
    /// Cancellation never touches copies: only fulfilled reservations hold a
    /// copy, and those expire rather than cancel.
    pub async fn cancel(
        &self,
        tx: &mut dyn StoreTx,
        reservation_id: ReservationId,
    ) -> Result<Reservation> {
        let mut reservation = self.load(tx, reservation_id).await?;
        if !reservation.status.can_cancel() {
            return Err(CirculationError::invalid_transition(
                "reservation",
                reservation.status,
                ReservationStatus::Cancelled,
            ));
        }
        reservation.status = ReservationStatus::Cancelled;
        tx.update_reservation(reservation.clone()).await?;
        tracing::debug!(%reservation_id, "reservation cancelled");
        Ok(reservation)
    }

    /// Fulfills the head of a book's queue against an available copy, if both
    /// exist.
    ///
    /// Returns `None` when the queue is empty or no copy is free; both are
    /// normal outcomes, not errors. The fulfilled member is notified after
    /// the surrounding transaction commits, via `outbox`.
    pub async fn try_fulfill_next(
        &self,
        tx: &mut dyn StoreTx,
        outbox: &mut Vec<Notification>,
        book_id: BookId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let queue = tx.active_reservations_for_book(book_id).await?;
        let Some(head) = queue.into_iter().next() else {
            return Ok(None);
        };
        let Some(copy) = tx.available_copy(book_id).await? else {
            return Ok(None);
        };

        let fulfilled = self.fulfill_into(tx, outbox, head, copy.id, now).await?;
        Ok(Some(fulfilled))
    }

    /// Fulfills a specific reservation against a specific available copy.
    ///
    /// Staff-directed variant of [`Self::try_fulfill_next`]; requires the
    /// member to be reachable for the pickup notice.
    pub async fn fulfill(
        &self,
        tx: &mut dyn StoreTx,
        outbox: &mut Vec<Notification>,
        reservation_id: ReservationId,
        copy_id: CopyId,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let reservation = self.load(tx, reservation_id).await?;
        if !self.members.has_contact_info(reservation.member_id).await {
            return Err(RuleViolation::MissingContactInfo {
                member_id: reservation.member_id,
            }
            .into());
        }

        let copy = tx
            .copy(copy_id)
            .await?
            .ok_or_else(|| CirculationError::not_found("copy", copy_id))?;
        if copy.book_id != reservation.book_id {
            return Err(RuleViolation::CopyBookMismatch {
                copy_id,
                book_id: reservation.book_id,
            }
            .into());
        }

        self.fulfill_into(tx, outbox, reservation, copy_id, now).await
    }

    async fn fulfill_into(
        &self,
        tx: &mut dyn StoreTx,
        outbox: &mut Vec<Notification>,
        mut reservation: Reservation,
        copy_id: CopyId,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        if !reservation.status.can_fulfill() {
            return Err(CirculationError::invalid_transition(
                "reservation",
                reservation.status,
                ReservationStatus::Fulfilled,
            ));
        }

        availability::transition(tx, copy_id, CopyStatus::Available, CopyStatus::Reserved).await?;

        reservation.status = ReservationStatus::Fulfilled;
        reservation.copy_id = Some(copy_id);
        reservation.fulfilled_at = Some(now);
        tx.update_reservation(reservation.clone()).await?;

        outbox.push(Notification {
            member_id: reservation.member_id,
            kind: NotificationKind::ReservationFulfilled,
            payload: json!({
                "reservation_id": reservation.id,
                "book_id": reservation.book_id,
                "copy_id": copy_id,
                "pickup_deadline": reservation.pickup_deadline(self.policy.pickup_window()),
            }),
        });
        tracing::debug!(reservation_id = %reservation.id, %copy_id, "reservation fulfilled");
        Ok(reservation)
    }

    /// Expires fulfilled reservations whose pickup window has lapsed.
    ///
    /// Each freed copy is offered to the next member in that book's queue
    /// within the same transaction. Returns the number of reservations
    /// expired.
    pub async fn sweep_expired(
        &self,
        tx: &mut dyn StoreTx,
        outbox: &mut Vec<Notification>,
        as_of: DateTime<Utc>,
    ) -> Result<usize> {
        let cutoff = as_of - self.policy.pickup_window();
        let lapsed = tx.fulfilled_before(cutoff).await?;
        let mut expired = 0;

        for mut reservation in lapsed {
            if !reservation.status.can_expire() {
                continue;
            }
            // Checkout detaches the copy when a hold is collected, so a
            // fulfilled reservation without one is done, not lapsed.
            let Some(copy_id) = reservation.copy_id else {
                continue;
            };

            reservation.status = ReservationStatus::Expired;
            tx.update_reservation(reservation.clone()).await?;
            availability::transition(tx, copy_id, CopyStatus::Reserved, CopyStatus::Available)
                .await?;

            outbox.push(Notification {
                member_id: reservation.member_id,
                kind: NotificationKind::ReservationExpired,
                payload: json!({
                    "reservation_id": reservation.id,
                    "book_id": reservation.book_id,
                }),
            });
            expired += 1;

            // The freed copy cascades to whoever is next in line.
            self.try_fulfill_next(tx, outbox, reservation.book_id, as_of)
                .await?;
        }

        Ok(expired)
    }

    /// 1-based position of an active reservation in its book's queue.
    ///
    /// `None` once the reservation has left the queue (fulfilled, cancelled,
    /// or expired).
    pub async fn position(
        &self,
        tx: &mut dyn StoreTx,
        reservation_id: ReservationId,
    ) -> Result<Option<usize>> {
        let reservation = self.load(tx, reservation_id).await?;
        if reservation.status != ReservationStatus::Active {
            return Ok(None);
        }
        let queue = tx.active_reservations_for_book(reservation.book_id).await?;
        Ok(queue.iter().position(|r| r.id == reservation_id).map(|i| i + 1))
    }

    async fn load(
        &self,
        tx: &mut dyn StoreTx,
        reservation_id: ReservationId,
    ) -> Result<Reservation> {
        tx.reservation(reservation_id)
            .await?
            .ok_or_else(|| CirculationError::not_found("reservation", reservation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryMemberDirectory;
    use store::{BookCopy, InMemoryStore, Store};

    fn queue_with(members: InMemoryMemberDirectory) -> ReservationQueue {
        ReservationQueue::new(CirculationPolicy::default(), Arc::new(members))
    }

    #[tokio::test]
    async fn test_reserve_rejected_when_copy_available() {
        let store = InMemoryStore::new();
        let book_id = BookId::new();
        store.add_copy(book_id).await;
        let queue = queue_with(InMemoryMemberDirectory::new());

        let mut tx = store.begin().await.unwrap();
        let err = queue
            .create(tx.as_mut(), MemberId::new(), book_id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CirculationError::Rule(RuleViolation::AvailableCopyExists { .. })
        ));
        tx.rollback().await;
    }

    #[tokio::test]
    async fn test_duplicate_reservation_rejected() {
        let store = InMemoryStore::new();
        let queue = queue_with(InMemoryMemberDirectory::new());
        let member_id = MemberId::new();
        let book_id = BookId::new();

        let mut tx = store.begin().await.unwrap();
        queue
            .create(tx.as_mut(), member_id, book_id, Utc::now())
            .await
            .unwrap();
        let err = queue
            .create(tx.as_mut(), member_id, book_id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CirculationError::Rule(RuleViolation::DuplicateReservation { .. })
        ));
        tx.rollback().await;
    }

    #[tokio::test]
    async fn test_reservation_limit() {
        let store = InMemoryStore::new();
        let queue = queue_with(InMemoryMemberDirectory::new());
        let member_id = MemberId::new();

        let mut tx = store.begin().await.unwrap();
        for _ in 0..3 {
            queue
                .create(tx.as_mut(), member_id, BookId::new(), Utc::now())
                .await
                .unwrap();
        }
        let err = queue
            .create(tx.as_mut(), member_id, BookId::new(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CirculationError::Rule(RuleViolation::ReservationLimitReached { count: 3, .. })
        ));
        tx.rollback().await;
    }

    #[tokio::test]
    async fn test_position_is_derived_and_shifts() {
        let store = InMemoryStore::new();
        let queue = queue_with(InMemoryMemberDirectory::new());
        let book_id = BookId::new();
        let base = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let first = queue
            .create(tx.as_mut(), MemberId::new(), book_id, base)
            .await
            .unwrap();
        let second = queue
            .create(
                tx.as_mut(),
                MemberId::new(),
                book_id,
                base + chrono::Duration::minutes(1),
            )
            .await
            .unwrap();

        assert_eq!(queue.position(tx.as_mut(), first.id).await.unwrap(), Some(1));
        assert_eq!(queue.position(tx.as_mut(), second.id).await.unwrap(), Some(2));

        queue.cancel(tx.as_mut(), first.id).await.unwrap();
        assert_eq!(queue.position(tx.as_mut(), second.id).await.unwrap(), Some(1));
        assert_eq!(queue.position(tx.as_mut(), first.id).await.unwrap(), None);
        tx.rollback().await;
    }

    #[tokio::test]
    async fn test_try_fulfill_next_takes_queue_head() {
        let store = InMemoryStore::new();
        let queue = queue_with(InMemoryMemberDirectory::new());
        let book_id = BookId::new();
        let base = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let first = queue
            .create(tx.as_mut(), MemberId::new(), book_id, base)
            .await
            .unwrap();
        queue
            .create(
                tx.as_mut(),
                MemberId::new(),
                book_id,
                base + chrono::Duration::minutes(1),
            )
            .await
            .unwrap();

        // No copies yet: nothing to hand out.
        let mut outbox = Vec::new();
        assert!(queue
            .try_fulfill_next(tx.as_mut(), &mut outbox, book_id, base)
            .await
            .unwrap()
            .is_none());

        let copy = BookCopy::new(book_id);
        tx.insert_copy(copy.clone()).await.unwrap();
        let fulfilled = queue
            .try_fulfill_next(tx.as_mut(), &mut outbox, book_id, base)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fulfilled.id, first.id);
        assert_eq!(fulfilled.copy_id, Some(copy.id));
        assert_eq!(fulfilled.status, ReservationStatus::Fulfilled);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].kind, NotificationKind::ReservationFulfilled);

        let held = tx.copy(copy.id).await.unwrap().unwrap();
        assert_eq!(held.status, CopyStatus::Reserved);
        tx.rollback().await;
    }

    #[tokio::test]
    async fn test_fulfill_requires_contact_info() {
        let store = InMemoryStore::new();
        let members = InMemoryMemberDirectory::new();
        let member_id = MemberId::new();
        members.set_contact_info(member_id, false);
        let queue = queue_with(members);
        let book_id = BookId::new();

        let mut tx = store.begin().await.unwrap();
        let reservation = queue
            .create(tx.as_mut(), member_id, book_id, Utc::now())
            .await
            .unwrap();
        let copy = BookCopy::new(book_id);
        tx.insert_copy(copy.clone()).await.unwrap();

        let mut outbox = Vec::new();
        let err = queue
            .fulfill(tx.as_mut(), &mut outbox, reservation.id, copy.id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CirculationError::Rule(RuleViolation::MissingContactInfo { .. })
        ));
        assert!(outbox.is_empty());
        tx.rollback().await;
    }

    #[tokio::test]
    async fn test_fulfill_rejects_copy_of_other_book() {
        let store = InMemoryStore::new();
        let queue = queue_with(InMemoryMemberDirectory::new());
        let book_id = BookId::new();

        let mut tx = store.begin().await.unwrap();
        let reservation = queue
            .create(tx.as_mut(), MemberId::new(), book_id, Utc::now())
            .await
            .unwrap();
        let other_copy = BookCopy::new(BookId::new());
        tx.insert_copy(other_copy.clone()).await.unwrap();

        let mut outbox = Vec::new();
        let err = queue
            .fulfill(
                tx.as_mut(),
                &mut outbox,
                reservation.id,
                other_copy.id,
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CirculationError::Rule(RuleViolation::CopyBookMismatch { .. })
        ));
        tx.rollback().await;
    }

    #[tokio::test]
    async fn test_sweep_expired_frees_copy_and_cascades() {
        let store = InMemoryStore::new();
        let queue = queue_with(InMemoryMemberDirectory::new());
        let book_id = BookId::new();
        let base = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let first = queue
            .create(tx.as_mut(), MemberId::new(), book_id, base)
            .await
            .unwrap();
        let second = queue
            .create(
                tx.as_mut(),
                MemberId::new(),
                book_id,
                base + chrono::Duration::minutes(1),
            )
            .await
            .unwrap();
        let copy = BookCopy::new(book_id);
        tx.insert_copy(copy.clone()).await.unwrap();

        let mut outbox = Vec::new();
        queue
            .try_fulfill_next(tx.as_mut(), &mut outbox, book_id, base)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        // 73 hours later the first hold has lapsed; the copy passes to the
        // second member inside one sweep.
        let later = base + chrono::Duration::hours(73);
        let mut tx = store.begin().await.unwrap();
        let mut outbox = Vec::new();
        let expired = queue
            .sweep_expired(tx.as_mut(), &mut outbox, later)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(expired, 1);
        let first_after = store.get_reservation(first.id).await.unwrap();
        assert_eq!(first_after.status, ReservationStatus::Expired);
        let second_after = store.get_reservation(second.id).await.unwrap();
        assert_eq!(second_after.status, ReservationStatus::Fulfilled);
        assert_eq!(second_after.copy_id, Some(copy.id));
        let copy_after = store.get_copy(copy.id).await.unwrap();
        assert_eq!(copy_after.status, CopyStatus::Reserved);

        let kinds: Vec<_> = outbox.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::ReservationExpired,
                NotificationKind::ReservationFulfilled
            ]
        );
    }

    #[tokio::test]
    async fn test_sweep_ignores_holds_inside_window() {
        let store = InMemoryStore::new();
        let queue = queue_with(InMemoryMemberDirectory::new());
        let book_id = BookId::new();
        let base = Utc::now();

        let mut tx = store.begin().await.unwrap();
        queue
            .create(tx.as_mut(), MemberId::new(), book_id, base)
            .await
            .unwrap();
        tx.insert_copy(BookCopy::new(book_id)).await.unwrap();
        let mut outbox = Vec::new();
        queue
            .try_fulfill_next(tx.as_mut(), &mut outbox, book_id, base)
            .await
            .unwrap();

        let within_window = base + chrono::Duration::hours(71);
        let expired = queue
            .sweep_expired(tx.as_mut(), &mut outbox, within_window)
            .await
            .unwrap();
        assert_eq!(expired, 0);
        tx.rollback().await;
    }

    #[tokio::test]
    async fn test_suspended_member_cannot_reserve() {
        let store = InMemoryStore::new();
        let members = InMemoryMemberDirectory::new();
        let member_id = MemberId::new();
        members.set_standing(member_id, crate::ports::MemberStanding::Suspended);
        let queue = queue_with(members);

        let mut tx = store.begin().await.unwrap();
        let err = queue
            .create(tx.as_mut(), member_id, BookId::new(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CirculationError::Rule(RuleViolation::MemberNotActive { .. })
        ));
        tx.rollback().await;
    }
}
