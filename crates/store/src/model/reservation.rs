//! Reservation record and its lifecycle state machine.

use chrono::{DateTime, Duration, Utc};
use common::{BookId, CopyId, MemberId, ReservationId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a reservation.
///
/// State transitions:
/// ```text
/// Active ──┬──► Fulfilled ──► Expired   (unclaimed pickup)
///          ├──► Cancelled
///          └──► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReservationStatus {
    /// Waiting in the queue for a copy to free up.
    #[default]
    Active,

    /// A copy is held for the member, awaiting pickup.
    Fulfilled,

    /// Cancelled by the member or staff (terminal).
    Cancelled,

    /// Lapsed without pickup (terminal).
    Expired,
}

impl ReservationStatus {
    /// Returns true if the reservation can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    /// Returns true if a copy can be assigned in this status.
    pub fn can_fulfill(&self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    /// Returns true if the reservation can lapse in this status.
    pub fn can_expire(&self) -> bool {
        matches!(self, ReservationStatus::Active | ReservationStatus::Fulfilled)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Cancelled | ReservationStatus::Expired)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "Active",
            ReservationStatus::Fulfilled => "Fulfilled",
            ReservationStatus::Cancelled => "Cancelled",
            ReservationStatus::Expired => "Expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A member's place in the queue for a title.
///
/// Queue position is never stored; it is derived at read time by ranking
/// the Active reservations for a book by `(reserved_at, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique reservation identifier.
    pub id: ReservationId,

    /// The member in the queue.
    pub member_id: MemberId,

    /// The title being waited on.
    pub book_id: BookId,

    /// The held copy, set when the reservation is fulfilled.
    pub copy_id: Option<CopyId>,

    /// When the member joined the queue.
    pub reserved_at: DateTime<Utc>,

    /// When a copy was held for the member, if one has been.
    pub fulfilled_at: Option<DateTime<Utc>>,

    /// Current lifecycle status.
    pub status: ReservationStatus,

    /// Record version for optimistic concurrency.
    pub version: u64,
}

impl Reservation {
    /// Creates a new active reservation at the back of the queue.
    pub fn new(member_id: MemberId, book_id: BookId, reserved_at: DateTime<Utc>) -> Self {
        Self {
            id: ReservationId::new(),
            member_id,
            book_id,
            copy_id: None,
            reserved_at,
            fulfilled_at: None,
            status: ReservationStatus::Active,
            version: 0,
        }
    }

    /// Returns the pickup deadline, derived from the fulfillment timestamp.
    ///
    /// `None` until the reservation has been fulfilled.
    pub fn pickup_deadline(&self, pickup_window: Duration) -> Option<DateTime<Utc>> {
        self.fulfilled_at.map(|at| at + pickup_window)
    }

    /// Ordering key for queue rank: earliest reservation first, ties broken by id.
    pub fn queue_key(&self) -> (DateTime<Utc>, ReservationId) {
        (self.reserved_at, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_only_active_can_cancel_or_fulfill() {
        assert!(ReservationStatus::Active.can_cancel());
        assert!(ReservationStatus::Active.can_fulfill());
        for s in [
            ReservationStatus::Fulfilled,
            ReservationStatus::Cancelled,
            ReservationStatus::Expired,
        ] {
            assert!(!s.can_cancel());
            assert!(!s.can_fulfill());
        }
    }

    #[test]
    fn test_expirable_statuses() {
        assert!(ReservationStatus::Active.can_expire());
        assert!(ReservationStatus::Fulfilled.can_expire());
        assert!(!ReservationStatus::Cancelled.can_expire());
        assert!(!ReservationStatus::Expired.can_expire());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ReservationStatus::Active.is_terminal());
        assert!(!ReservationStatus::Fulfilled.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
    }

    #[test]
    fn test_pickup_deadline_derived_from_fulfillment() {
        let reserved = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut reservation = Reservation::new(MemberId::new(), BookId::new(), reserved);
        assert_eq!(reservation.pickup_deadline(Duration::hours(72)), None);

        let fulfilled = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        reservation.fulfilled_at = Some(fulfilled);
        assert_eq!(
            reservation.pickup_deadline(Duration::hours(72)),
            Some(fulfilled + Duration::hours(72))
        );
    }

    #[test]
    fn test_queue_key_orders_by_date_then_id() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let t1 = t0 + Duration::minutes(5);
        let book = BookId::new();

        let earlier = Reservation::new(MemberId::new(), book, t0);
        let later = Reservation::new(MemberId::new(), book, t1);
        assert!(earlier.queue_key() < later.queue_key());

        let a = Reservation::new(MemberId::new(), book, t0);
        let b = Reservation::new(MemberId::new(), book, t0);
        // Same instant: the id decides, deterministically.
        assert_eq!(a.queue_key() < b.queue_key(), a.id < b.id);
    }
}
