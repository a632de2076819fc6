//! Circulation records and their persistence seam.
//!
//! Defines the entity records ([`model`]), the capability-scoped store
//! traits callers depend on ([`store`]), and a transactional in-memory
//! implementation with optimistic concurrency ([`memory`]).

pub mod error;
pub mod memory;
pub mod model;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use model::{
    BookCopy, CopyStatus, Fine, FineKind, FineStatus, Loan, LoanStatus, Reservation,
    ReservationStatus,
};
pub use store::{CopyStore, FineStore, LoanStore, ReservationStore, Store, StoreTx};
