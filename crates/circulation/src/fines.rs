//! Fine assessment and settlement.
//!
//! Fines are immutable once created: a fine is assessed at some amount, then
//! settled exactly once by payment or waiver. A partial payment settles the
//! original fine in full and assesses a fresh pending fine for the remainder,
//! so the ledger stays append-only.

use chrono::{DateTime, Utc};
use common::{FineId, MemberId, Money};
use store::{Fine, Loan, StoreTx};

use crate::error::{CirculationError, Result, RuleViolation};
use crate::policy::CirculationPolicy;

/// Computes, assesses, and settles fines under a [`CirculationPolicy`].
#[derive(Debug, Clone)]
pub struct FineCalculator {
    policy: CirculationPolicy,
}

impl FineCalculator {
    pub fn new(policy: CirculationPolicy) -> Self {
        Self { policy }
    }

    /// Overdue fine owed on a loan as of `as_of`.
    ///
    /// Zero when the loan is closed or not yet past due. Any fraction of a
    /// day late counts as a full day.
    pub fn calculate(&self, loan: &Loan, as_of: DateTime<Utc>) -> Money {
        if !loan.is_past_due(as_of) {
            return Money::zero();
        }
        let late_seconds = (as_of - loan.due_date).num_seconds();
        let days = (late_seconds + 86_399) / 86_400;
        self.policy.daily_fine.multiply(days)
    }

    /// Records a new pending fine.
    pub async fn assess(
        &self,
        tx: &mut dyn StoreTx,
        fine: Fine,
    ) -> Result<Fine> {
        if !fine.amount.is_positive() {
            return Err(RuleViolation::NonPositiveAmount {
                amount: fine.amount,
            }
            .into());
        }
        tx.insert_fine(fine.clone()).await?;
        tracing::debug!(fine_id = %fine.id, amount = %fine.amount, kind = ?fine.kind, "fine assessed");
        Ok(fine)
    }

    /// Settles a fine by payment.
    ///
    /// `amount_paid` must be positive and no more than the fine's amount.
    /// A partial payment marks this fine `Paid` and assesses a new pending
    /// fine for the unpaid remainder; the returned fine is the settled one.
    pub async fn pay(
        &self,
        tx: &mut dyn StoreTx,
        fine_id: FineId,
        amount_paid: Money,
        now: DateTime<Utc>,
    ) -> Result<Fine> {
        let mut fine = tx
            .fine(fine_id)
            .await?
            .ok_or_else(|| CirculationError::not_found("fine", fine_id))?;

        if !fine.status.can_settle() {
            return Err(CirculationError::invalid_transition(
                "fine",
                fine.status,
                store::FineStatus::Paid,
            ));
        }
        if !amount_paid.is_positive() {
            return Err(RuleViolation::NonPositiveAmount {
                amount: amount_paid,
            }
            .into());
        }
        if amount_paid > fine.amount {
            return Err(RuleViolation::Overpayment {
                paid: amount_paid,
                owed: fine.amount,
            }
            .into());
        }

        let remainder = fine.amount - amount_paid;
        fine.status = store::FineStatus::Paid;
        tx.update_fine(fine.clone()).await?;

        if remainder.is_positive() {
            let carried = Fine::new(
                fine.member_id,
                fine.loan_id,
                remainder,
                fine.kind,
                format!("Unpaid remainder of fine {}", fine.id),
                now,
            );
            tx.insert_fine(carried).await?;
        }

        tracing::debug!(%fine_id, paid = %amount_paid, remainder = %remainder, "fine paid");
        Ok(fine)
    }

    /// Settles a fine by waiver. A non-empty reason is required.
    pub async fn waive(
        &self,
        tx: &mut dyn StoreTx,
        fine_id: FineId,
        reason: &str,
    ) -> Result<Fine> {
        if reason.trim().is_empty() {
            return Err(RuleViolation::EmptyWaiveReason.into());
        }

        let mut fine = tx
            .fine(fine_id)
            .await?
            .ok_or_else(|| CirculationError::not_found("fine", fine_id))?;

        if !fine.status.can_settle() {
            return Err(CirculationError::invalid_transition(
                "fine",
                fine.status,
                store::FineStatus::Waived,
            ));
        }

        fine.status = store::FineStatus::Waived;
        fine.description = format!("{} (waived: {})", fine.description, reason.trim());
        tx.update_fine(fine.clone()).await?;
        tracing::debug!(%fine_id, reason = reason.trim(), "fine waived");
        Ok(fine)
    }

    /// Sum of a member's pending fines.
    pub async fn outstanding_balance(
        &self,
        tx: &mut dyn StoreTx,
        member_id: MemberId,
    ) -> Result<Money> {
        let pending = tx.pending_fines(member_id).await?;
        Ok(pending.iter().map(|f| f.amount).sum())
    }

    /// Flat fee for a copy returned damaged.
    pub fn damage_fee(&self) -> Money {
        self.policy.damage_fee
    }
}
