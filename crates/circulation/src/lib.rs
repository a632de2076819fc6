//! Library circulation engine.
//!
//! Models the full lifecycle of lending: copies move through an availability
//! state machine, loans open and close against them, members queue for books
//! with no free copies, and late or careless returns turn into fines. The
//! [`CirculationEngine`] wraps every operation in a storage transaction so a
//! rejected rule or a concurrent writer never leaves entities half-updated.
//!
//! # Structure
//!
//! - [`engine`] — the transactional front door for all operations
//! - [`loans`] — checkout, renewal, return, loss, overdue sweep
//! - [`reservations`] — hold queue, fulfillment, pickup expiry
//! - [`fines`] — fine accrual and settlement
//! - [`availability`] — the copy status state machine
//! - [`ports`] — notification, audit, and member-directory boundaries
//! - [`policy`] — tunable circulation rules
//! - [`error`] — the error taxonomy callers branch on

pub mod availability;
pub mod engine;
pub mod error;
pub mod fines;
pub mod loans;
pub mod policy;
pub mod ports;
pub mod reservations;

pub use engine::CirculationEngine;
pub use error::{CirculationError, Result, RuleViolation};
pub use fines::FineCalculator;
pub use loans::LoanLedger;
pub use policy::CirculationPolicy;
pub use reservations::ReservationQueue;
