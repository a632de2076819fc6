//! Member directory port and in-memory implementation.
//!
//! Member records live outside the circulation engine; the engine only asks
//! two questions of them, so the port surface stays that small.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::MemberId;
use serde::{Deserialize, Serialize};

/// A member's standing with the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MemberStanding {
    #[default]
    Active,
    Suspended,
    Expired,
}

impl MemberStanding {
    /// Whether the member may borrow, renew, and reserve.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Trait for looking up member eligibility data.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn standing(&self, member_id: MemberId) -> MemberStanding;

    /// Whether the member can be reached for pickup notifications.
    async fn has_contact_info(&self, member_id: MemberId) -> bool;
}

#[derive(Debug, Default)]
struct InMemoryDirectoryState {
    standings: HashMap<MemberId, MemberStanding>,
    missing_contact: HashMap<MemberId, bool>,
}

/// In-memory member directory for testing.
///
/// Unknown members default to active standing with contact info on file, so
/// tests only configure the members they want to be exceptional.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMemberDirectory {
    state: Arc<RwLock<InMemoryDirectoryState>>,
}

impl InMemoryMemberDirectory {
    /// Creates a new in-memory member directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a member's standing.
    pub fn set_standing(&self, member_id: MemberId, standing: MemberStanding) {
        self.state
            .write()
            .unwrap()
            .standings
            .insert(member_id, standing);
    }

    /// Marks whether a member has contact info on file.
    pub fn set_contact_info(&self, member_id: MemberId, has_contact: bool) {
        self.state
            .write()
            .unwrap()
            .missing_contact
            .insert(member_id, !has_contact);
    }
}

#[async_trait]
impl MemberDirectory for InMemoryMemberDirectory {
    async fn standing(&self, member_id: MemberId) -> MemberStanding {
        self.state
            .read()
            .unwrap()
            .standings
            .get(&member_id)
            .copied()
            .unwrap_or_default()
    }

    async fn has_contact_info(&self, member_id: MemberId) -> bool {
        !self
            .state
            .read()
            .unwrap()
            .missing_contact
            .get(&member_id)
            .copied()
            .unwrap_or(false)
    }
}
