//! Entity records and their status state machines.

mod copy;
mod fine;
mod loan;
mod reservation;

pub use copy::{BookCopy, CopyStatus};
pub use fine::{Fine, FineKind, FineStatus};
pub use loan::{Loan, LoanStatus};
pub use reservation::{Reservation, ReservationStatus};
