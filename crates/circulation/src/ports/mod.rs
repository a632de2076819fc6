//! External service boundaries: notifications, audit trail, member records.
//!
//! Each port ships with an in-memory implementation used by the test suites.

pub mod audit;
pub mod members;
pub mod notification;

pub use audit::{AuditEntry, AuditError, AuditPort, InMemoryAuditLog};
pub use members::{InMemoryMemberDirectory, MemberDirectory, MemberStanding};
pub use notification::{
    InMemoryNotifier, Notification, NotificationError, NotificationKind, NotificationPort,
};
