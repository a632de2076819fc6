//! Notification port and in-memory implementation.
//!
//! Notifications are fire-and-forget: delivery failures are logged by the
//! caller and never fail the operation that produced them.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::MemberId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What happened, from the member's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    ReservationFulfilled,
    ReservationExpired,
    LoanOverdue,
}

/// A message queued for a member, with event-specific context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub member_id: MemberId,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotificationError(pub String);

/// Trait for delivering member notifications.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail_on_notify: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    /// Creates a new in-memory notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail delivery.
    pub fn set_fail_on_notify(&self, fail: bool) {
        self.state.write().unwrap().fail_on_notify = fail;
    }

    /// Returns all notifications delivered so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.state.read().unwrap().sent.clone()
    }

    /// Returns notifications of the given kind delivered to a member.
    pub fn sent_to(&self, member_id: MemberId, kind: NotificationKind) -> Vec<Notification> {
        self.state
            .read()
            .unwrap()
            .sent
            .iter()
            .filter(|n| n.member_id == member_id && n.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationPort for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_notify {
            return Err(NotificationError("smtp unreachable".to_string()));
        }
        state.sent.push(notification);
        Ok(())
    }
}
