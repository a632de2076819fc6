//! The circulation engine: one transaction per operation.
//!
//! Every public operation runs begin, mutate, commit. A rule rejection rolls
//! the transaction back; a commit-time conflict surfaces as
//! [`CirculationError::Conflict`] and the caller may retry the whole
//! operation. Audit entries are recorded for success and failure alike, and
//! member notifications are dispatched only after a successful commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{BookId, CopyId, FineId, LoanId, MemberId, Money, ReservationId};
use serde::Serialize;
use store::{Fine, FineKind, Loan, Reservation, Store, StoreTx};

use crate::error::Result;
use crate::fines::FineCalculator;
use crate::loans::LoanLedger;
use crate::policy::CirculationPolicy;
use crate::ports::{AuditEntry, AuditPort, MemberDirectory, Notification, NotificationPort};
use crate::reservations::ReservationQueue;

/// Front door for all circulation operations.
pub struct CirculationEngine<S: Store> {
    store: S,
    loans: LoanLedger,
    reservations: ReservationQueue,
    fines: FineCalculator,
    notifier: Arc<dyn NotificationPort>,
    audit: Arc<dyn AuditPort>,
}

impl<S: Store> CirculationEngine<S> {
    pub fn new(
        store: S,
        policy: CirculationPolicy,
        members: Arc<dyn MemberDirectory>,
        notifier: Arc<dyn NotificationPort>,
        audit: Arc<dyn AuditPort>,
    ) -> Self {
        Self {
            store,
            loans: LoanLedger::new(policy.clone(), members.clone()),
            reservations: ReservationQueue::new(policy.clone(), members),
            fines: FineCalculator::new(policy),
            notifier,
            audit,
        }
    }

    /// Checks a copy out to a member.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(
        &self,
        actor: &str,
        member_id: MemberId,
        copy_id: CopyId,
        due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        let mut tx = self.store.begin().await?;
        let outcome = self
            .loans
            .checkout(tx.as_mut(), member_id, copy_id, due_date, now)
            .await;
        let entity_id = outcome.as_ref().ok().map(|l| l.id.to_string());
        self.finish(tx, Vec::new(), actor, "loan.checkout", "loan", entity_id, outcome)
            .await
    }

    /// Extends an active loan's due date.
    #[tracing::instrument(skip(self))]
    pub async fn renew(
        &self,
        actor: &str,
        loan_id: LoanId,
        new_due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        let mut tx = self.store.begin().await?;
        let outcome = self.loans.renew(tx.as_mut(), loan_id, new_due_date, now).await;
        self.finish(
            tx,
            Vec::new(),
            actor,
            "loan.renew",
            "loan",
            Some(loan_id.to_string()),
            outcome,
        )
        .await
    }

    /// Closes a loan on return of the copy.
    #[tracing::instrument(skip(self))]
    pub async fn return_book(
        &self,
        actor: &str,
        loan_id: LoanId,
        condition_ok: bool,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        let mut tx = self.store.begin().await?;
        let mut outbox = Vec::new();
        let outcome = self
            .loans
            .return_book(tx.as_mut(), &mut outbox, loan_id, condition_ok, now)
            .await;
        self.finish(
            tx,
            outbox,
            actor,
            "loan.return",
            "loan",
            Some(loan_id.to_string()),
            outcome,
        )
        .await
    }

    /// Closes a loan whose copy will not come back and bills the member.
    #[tracing::instrument(skip(self))]
    pub async fn report_lost(
        &self,
        actor: &str,
        loan_id: LoanId,
        replacement_cost: Money,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        let mut tx = self.store.begin().await?;
        let outcome = self
            .loans
            .report_lost(tx.as_mut(), loan_id, replacement_cost, now)
            .await;
        self.finish(
            tx,
            Vec::new(),
            actor,
            "loan.report_lost",
            "loan",
            Some(loan_id.to_string()),
            outcome,
        )
        .await
    }

    /// Places a hold for a member on a book.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(
        &self,
        actor: &str,
        member_id: MemberId,
        book_id: BookId,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut tx = self.store.begin().await?;
        let outcome = self
            .reservations
            .create(tx.as_mut(), member_id, book_id, now)
            .await;
        let entity_id = outcome.as_ref().ok().map(|r| r.id.to_string());
        self.finish(
            tx,
            Vec::new(),
            actor,
            "reservation.create",
            "reservation",
            entity_id,
            outcome,
        )
        .await
    }

    /// Cancels an active reservation.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_reservation(
        &self,
        actor: &str,
        reservation_id: ReservationId,
    ) -> Result<Reservation> {
        let mut tx = self.store.begin().await?;
        let outcome = self.reservations.cancel(tx.as_mut(), reservation_id).await;
        self.finish(
            tx,
            Vec::new(),
            actor,
            "reservation.cancel",
            "reservation",
            Some(reservation_id.to_string()),
            outcome,
        )
        .await
    }

    /// Fulfills a specific reservation against a specific available copy.
    #[tracing::instrument(skip(self))]
    pub async fn fulfill_reservation(
        &self,
        actor: &str,
        reservation_id: ReservationId,
        copy_id: CopyId,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut tx = self.store.begin().await?;
        let mut outbox = Vec::new();
        let outcome = self
            .reservations
            .fulfill(tx.as_mut(), &mut outbox, reservation_id, copy_id, now)
            .await;
        self.finish(
            tx,
            outbox,
            actor,
            "reservation.fulfill",
            "reservation",
            Some(reservation_id.to_string()),
            outcome,
        )
        .await
    }

    /// Offers an available copy to the head of a book's hold queue.
    #[tracing::instrument(skip(self))]
    pub async fn try_fulfill_next(
        &self,
        actor: &str,
        book_id: BookId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let mut tx = self.store.begin().await?;
        let mut outbox = Vec::new();
        let outcome = self
            .reservations
            .try_fulfill_next(tx.as_mut(), &mut outbox, book_id, now)
            .await;
        let entity_id = outcome
            .as_ref()
            .ok()
            .and_then(|r| r.as_ref())
            .map(|r| r.id.to_string());
        self.finish(
            tx,
            outbox,
            actor,
            "reservation.try_fulfill_next",
            "reservation",
            entity_id,
            outcome,
        )
        .await
    }

    /// Records a manually assessed fine.
    #[tracing::instrument(skip(self, description))]
    pub async fn assess_fine(
        &self,
        actor: &str,
        member_id: MemberId,
        loan_id: Option<LoanId>,
        amount: Money,
        kind: FineKind,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Fine> {
        let mut tx = self.store.begin().await?;
        let outcome = self
            .fines
            .assess(
                tx.as_mut(),
                Fine::new(member_id, loan_id, amount, kind, description, now),
            )
            .await;
        let entity_id = outcome.as_ref().ok().map(|f| f.id.to_string());
        self.finish(tx, Vec::new(), actor, "fine.assess", "fine", entity_id, outcome)
            .await
    }

    /// Settles a fine by payment; a partial payment leaves a pending
    /// remainder fine.
    #[tracing::instrument(skip(self))]
    pub async fn pay_fine(
        &self,
        actor: &str,
        fine_id: FineId,
        amount_paid: Money,
        now: DateTime<Utc>,
    ) -> Result<Fine> {
        let mut tx = self.store.begin().await?;
        let outcome = self.fines.pay(tx.as_mut(), fine_id, amount_paid, now).await;
        self.finish(
            tx,
            Vec::new(),
            actor,
            "fine.pay",
            "fine",
            Some(fine_id.to_string()),
            outcome,
        )
        .await
    }

    /// Settles a fine by waiver.
    #[tracing::instrument(skip(self))]
    pub async fn waive_fine(&self, actor: &str, fine_id: FineId, reason: &str) -> Result<Fine> {
        let mut tx = self.store.begin().await?;
        let outcome = self.fines.waive(tx.as_mut(), fine_id, reason).await;
        self.finish(
            tx,
            Vec::new(),
            actor,
            "fine.waive",
            "fine",
            Some(fine_id.to_string()),
            outcome,
        )
        .await
    }

    /// Scheduler entry point: flips active loans past due to `Overdue`.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_overdue(&self, as_of: DateTime<Utc>) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let mut outbox = Vec::new();
        let outcome = self.loans.sweep_overdue(tx.as_mut(), &mut outbox, as_of).await;
        let flipped = self
            .finish(tx, outbox, "scheduler", "loan.sweep_overdue", "loan", None, outcome)
            .await?;
        metrics::counter!("circulation_overdue_loans_flipped_total").increment(flipped as u64);
        Ok(flipped)
    }

    /// Scheduler entry point: expires lapsed pickups and cascades freed
    /// copies down each queue.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired_reservations(&self, as_of: DateTime<Utc>) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let mut outbox = Vec::new();
        let outcome = self
            .reservations
            .sweep_expired(tx.as_mut(), &mut outbox, as_of)
            .await;
        let expired = self
            .finish(
                tx,
                outbox,
                "scheduler",
                "reservation.sweep_expired",
                "reservation",
                None,
                outcome,
            )
            .await?;
        metrics::counter!("circulation_reservations_expired_total").increment(expired as u64);
        Ok(expired)
    }

    /// Sum of a member's pending fines.
    pub async fn outstanding_balance(&self, member_id: MemberId) -> Result<Money> {
        let mut tx = self.store.begin().await?;
        let balance = self.fines.outstanding_balance(tx.as_mut(), member_id).await;
        tx.rollback().await;
        balance
    }

    /// 1-based queue position of an active reservation.
    pub async fn queue_position(&self, reservation_id: ReservationId) -> Result<Option<usize>> {
        let mut tx = self.store.begin().await?;
        let position = self.reservations.position(tx.as_mut(), reservation_id).await;
        tx.rollback().await;
        position
    }

    /// Commits or rolls back, audits the attempt, and dispatches
    /// notifications on success.
    async fn finish<T: Serialize>(
        &self,
        tx: Box<dyn StoreTx>,
        outbox: Vec<Notification>,
        actor: &str,
        action: &'static str,
        entity: &'static str,
        entity_id: Option<String>,
        outcome: Result<T>,
    ) -> Result<T> {
        match outcome {
            Ok(value) => match tx.commit().await {
                Ok(()) => {
                    let after = serde_json::to_value(&value).ok();
                    self.record_audit(actor, action, entity, entity_id, after, None)
                        .await;
                    self.dispatch(outbox).await;
                    metrics::counter!(
                        "circulation_operations_total",
                        "action" => action, "outcome" => "ok"
                    )
                    .increment(1);
                    Ok(value)
                }
                Err(store_err) => {
                    let err = crate::error::CirculationError::from(store_err);
                    self.record_audit(actor, action, entity, entity_id, None, Some(&err))
                        .await;
                    metrics::counter!(
                        "circulation_operations_total",
                        "action" => action, "outcome" => "conflict"
                    )
                    .increment(1);
                    Err(err)
                }
            },
            Err(err) => {
                tx.rollback().await;
                self.record_audit(actor, action, entity, entity_id, None, Some(&err))
                    .await;
                metrics::counter!(
                    "circulation_operations_total",
                    "action" => action, "outcome" => "rejected"
                )
                .increment(1);
                Err(err)
            }
        }
    }

    async fn record_audit(
        &self,
        actor: &str,
        action: &'static str,
        entity: &'static str,
        entity_id: Option<String>,
        after_state: Option<serde_json::Value>,
        error: Option<&crate::error::CirculationError>,
    ) {
        let entry = AuditEntry {
            actor: actor.to_string(),
            action,
            entity,
            entity_id,
            after_state,
            success: error.is_none(),
            error: error.map(|e| e.to_string()),
            at: Utc::now(),
        };
        if let Err(audit_err) = self.audit.record(entry).await {
            tracing::warn!(action, error = %audit_err, "audit write failed");
        }
    }

    async fn dispatch(&self, outbox: Vec<Notification>) {
        for notification in outbox {
            let kind = notification.kind;
            if let Err(err) = self.notifier.notify(notification).await {
                tracing::warn!(?kind, error = %err, "notification delivery failed");
            }
        }
    }
}
