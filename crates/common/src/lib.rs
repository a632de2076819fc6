//! Shared value types for the circulation engine.
//!
//! Provides strongly-typed entity identifiers and the `Money` type used
//! for fine amounts throughout the workspace.

pub mod ids;
pub mod money;

pub use ids::{BookId, CopyId, FineId, LoanId, MemberId, ReservationId};
pub use money::Money;
