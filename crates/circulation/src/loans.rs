//! Loan lifecycle: checkout, renewal, return, loss, and the overdue sweep.
//!
//! Loans are append-only history: closing a loan sets its status and return
//! date rather than deleting it, so a member's borrowing record survives.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{CopyId, LoanId, MemberId, Money};
use serde_json::json;
use store::{CopyStatus, Fine, FineKind, Loan, LoanStatus, StoreTx};

use crate::availability;
use crate::error::{CirculationError, Result, RuleViolation};
use crate::fines::FineCalculator;
use crate::policy::CirculationPolicy;
use crate::ports::{MemberDirectory, Notification, NotificationKind};
use crate::reservations::ReservationQueue;

/// Runs the loan side of circulation.
#[derive(Clone)]
pub struct LoanLedger {
    policy: CirculationPolicy,
    fines: FineCalculator,
    reservations: ReservationQueue,
    members: Arc<dyn MemberDirectory>,
}

impl LoanLedger {
    pub fn new(policy: CirculationPolicy, members: Arc<dyn MemberDirectory>) -> Self {
        Self {
            fines: FineCalculator::new(policy.clone()),
            reservations: ReservationQueue::new(policy.clone(), members.clone()),
            policy,
            members,
        }
    }

    /// Checks a copy out to a member.
    ///
    /// The copy must be `Available`, or `Reserved` with the member's own
    /// fulfilled reservation against it (a hold pickup). The member must be
    /// in active standing, owe nothing, and be under the open-loan limit.
    /// Without an explicit `due_date` the policy's loan period applies.
    pub async fn checkout(
        &self,
        tx: &mut dyn StoreTx,
        member_id: MemberId,
        copy_id: CopyId,
        due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        self.check_member_eligible(tx, member_id).await?;

        let count = tx.open_loan_count(member_id).await?;
        if count >= self.policy.max_open_loans {
            return Err(RuleViolation::LoanLimitReached {
                member_id,
                count,
                limit: self.policy.max_open_loans,
            }
            .into());
        }

        let copy = tx
            .copy(copy_id)
            .await?
            .ok_or_else(|| CirculationError::not_found("copy", copy_id))?;

        match copy.status {
            CopyStatus::Available => {
                availability::transition(tx, copy_id, CopyStatus::Available, CopyStatus::OnLoan)
                    .await?;
            }
            CopyStatus::Reserved => {
                // Hold pickup: only the member the copy is held for may take it.
                let holder = tx.fulfilled_reservation_for_copy(copy_id).await?;
                match holder {
                    Some(mut reservation) if reservation.member_id == member_id => {
                        availability::transition(
                            tx,
                            copy_id,
                            CopyStatus::Reserved,
                            CopyStatus::OnLoan,
                        )
                        .await?;
                        // Consume the hold: the copy changes hands here, and
                        // a collected reservation must never claim it again.
                        reservation.copy_id = None;
                        tx.update_reservation(reservation).await?;
                    }
                    _ => return Err(RuleViolation::ReservedForAnotherMember { copy_id }.into()),
                }
            }
            _ => return Err(RuleViolation::CopyUnavailable { copy_id }.into()),
        }

        let due = match due_date {
            Some(d) if d <= now => {
                return Err(RuleViolation::InvalidDueDate {
                    reason: format!("due date {d} is not in the future"),
                }
                .into());
            }
            Some(d) => d,
            None => now + self.policy.loan_period(),
        };

        let loan = Loan::new(member_id, copy_id, copy.book_id, now, due);
        tx.insert_loan(loan.clone()).await?;
        tracing::debug!(loan_id = %loan.id, %member_id, %copy_id, due = %due, "checkout");
        Ok(loan)
    }

    /// Extends an active loan's due date.
    ///
    /// Renewal is refused when anyone is queued for the book, when the loan
    /// is already overdue, or when the new date would fall at or before the
    /// current one or beyond the renewal horizon.
    pub async fn renew(
        &self,
        tx: &mut dyn StoreTx,
        loan_id: LoanId,
        new_due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        let mut loan = self.load(tx, loan_id).await?;
        if !loan.status.can_renew() {
            return Err(CirculationError::invalid_transition(
                "loan",
                loan.status,
                LoanStatus::Active,
            ));
        }

        self.check_member_eligible(tx, loan.member_id).await?;

        if !tx
            .active_reservations_for_book(loan.book_id)
            .await?
            .is_empty()
        {
            return Err(RuleViolation::RenewalBlockedByReservation {
                book_id: loan.book_id,
            }
            .into());
        }

        let new_due = new_due_date.unwrap_or(now + self.policy.loan_period());
        if new_due <= loan.due_date {
            return Err(RuleViolation::InvalidDueDate {
                reason: format!("{new_due} does not extend the current due date"),
            }
            .into());
        }
        if new_due > now + self.policy.renewal_horizon() {
            return Err(RuleViolation::InvalidDueDate {
                reason: format!(
                    "{new_due} is beyond the {}-day renewal horizon",
                    self.policy.renewal_horizon_days
                ),
            }
            .into());
        }

        loan.due_date = new_due;
        tx.update_loan(loan.clone()).await?;
        tracing::debug!(%loan_id, due = %new_due, "renewal");
        Ok(loan)
    }

    /// Closes a loan on return of the copy.
    ///
    /// A late return assesses the overdue fine; a damaged copy additionally
    /// incurs the damage fee and the copy leaves circulation. A clean return
    /// offers the freed copy to the book's reservation queue.
    pub async fn return_book(
        &self,
        tx: &mut dyn StoreTx,
        outbox: &mut Vec<Notification>,
        loan_id: LoanId,
        condition_ok: bool,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        let mut loan = self.load(tx, loan_id).await?;
        if !loan.status.can_return() {
            return Err(CirculationError::invalid_transition(
                "loan",
                loan.status,
                LoanStatus::Returned,
            ));
        }

        let overdue_fine = self.fines.calculate(&loan, now);
        if overdue_fine.is_positive() {
            let days = ((now - loan.due_date).num_seconds() + 86_399) / 86_400;
            self.fines
                .assess(
                    &mut *tx,
                    Fine::new(
                        loan.member_id,
                        Some(loan.id),
                        overdue_fine,
                        FineKind::Overdue,
                        format!("Returned {days} day(s) late"),
                        now,
                    ),
                )
                .await?;
        }

        if condition_ok {
            availability::transition(tx, loan.copy_id, CopyStatus::OnLoan, CopyStatus::Available)
                .await?;
        } else {
            availability::transition(tx, loan.copy_id, CopyStatus::OnLoan, CopyStatus::Damaged)
                .await?;
            self.fines
                .assess(
                    &mut *tx,
                    Fine::new(
                        loan.member_id,
                        Some(loan.id),
                        self.fines.damage_fee(),
                        FineKind::Damage,
                        "Copy returned damaged",
                        now,
                    ),
                )
                .await?;
        }

        loan.status = LoanStatus::Returned;
        loan.return_date = Some(now);
        tx.update_loan(loan.clone()).await?;

        if condition_ok {
            self.reservations
                .try_fulfill_next(tx, outbox, loan.book_id, now)
                .await?;
        }

        tracing::debug!(%loan_id, condition_ok, fine = %overdue_fine, "return");
        Ok(loan)
    }

    /// Closes a loan whose copy will not come back.
    ///
    /// The copy leaves circulation and the member owes the replacement cost.
    pub async fn report_lost(
        &self,
        tx: &mut dyn StoreTx,
        loan_id: LoanId,
        replacement_cost: Money,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        let mut loan = self.load(tx, loan_id).await?;
        if !loan.status.is_open() {
            return Err(CirculationError::invalid_transition(
                "loan",
                loan.status,
                LoanStatus::Lost,
            ));
        }

        availability::transition(tx, loan.copy_id, CopyStatus::OnLoan, CopyStatus::Lost).await?;
        self.fines
            .assess(
                &mut *tx,
                Fine::new(
                    loan.member_id,
                    Some(loan.id),
                    replacement_cost,
                    FineKind::Lost,
                    "Replacement cost for lost copy",
                    now,
                ),
            )
            .await?;

        loan.status = LoanStatus::Lost;
        tx.update_loan(loan.clone()).await?;
        tracing::debug!(%loan_id, cost = %replacement_cost, "reported lost");
        Ok(loan)
    }

    /// Flips active loans past their due date to `Overdue` and queues one
    /// overdue notice per flipped loan. Returns the number flipped.
    ///
    /// Already-overdue loans are left alone, so repeated sweeps never notify
    /// twice.
    pub async fn sweep_overdue(
        &self,
        tx: &mut dyn StoreTx,
        outbox: &mut Vec<Notification>,
        as_of: DateTime<Utc>,
    ) -> Result<usize> {
        let due = tx.active_loans_due_before(as_of).await?;
        let mut flipped = 0;

        for mut loan in due {
            loan.status = LoanStatus::Overdue;
            tx.update_loan(loan.clone()).await?;
            outbox.push(Notification {
                member_id: loan.member_id,
                kind: NotificationKind::LoanOverdue,
                payload: json!({
                    "loan_id": loan.id,
                    "book_id": loan.book_id,
                    "due_date": loan.due_date,
                    "accrued_fine": self.fines.calculate(&loan, as_of),
                }),
            });
            flipped += 1;
        }

        Ok(flipped)
    }

    /// Active standing and a clean slate of fines.
    async fn check_member_eligible(
        &self,
        tx: &mut dyn StoreTx,
        member_id: MemberId,
    ) -> Result<()> {
        if !self.members.standing(member_id).await.is_active() {
            return Err(RuleViolation::MemberNotActive { member_id }.into());
        }
        let balance = self.fines.outstanding_balance(tx, member_id).await?;
        if balance.is_positive() {
            return Err(RuleViolation::OutstandingFines { member_id, balance }.into());
        }
        Ok(())
    }

    async fn load(&self, tx: &mut dyn StoreTx, loan_id: LoanId) -> Result<Loan> {
        tx.loan(loan_id)
            .await?
            .ok_or_else(|| CirculationError::not_found("loan", loan_id))
    }
}
