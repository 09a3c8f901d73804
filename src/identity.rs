//! The "who is logged in" fact the connection manager gates on.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Identifier of the authenticated member. `0` is the logged-out sentinel.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_anonymous(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only view of the current identity, polled when `connect` runs.
pub trait IdentityProvider: Send + Sync + 'static {
    fn current_user_id(&self) -> Option<UserId>;
}

impl<F> IdentityProvider for F
where
    F: Fn() -> Option<UserId> + Send + Sync + 'static,
{
    fn current_user_id(&self) -> Option<UserId> {
        self()
    }
}

/// The logged-in member as held by the application store.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentMember {
    pub id: u64,
    pub account: String,
}

impl CurrentMember {
    #[must_use]
    pub fn new<S: Into<String>>(id: u64, account: S) -> Self {
        Self {
            id,
            account: account.into(),
        }
    }
}

/// In-memory member store. Starts logged out.
#[derive(Debug, Default)]
pub struct MemberStore {
    current: RwLock<CurrentMember>,
}

impl MemberStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current_member(&self, member: CurrentMember) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = member;
    }

    /// Reset to the logged-out sentinel.
    pub fn clear(&self) {
        self.set_current_member(CurrentMember::default());
    }

    #[must_use]
    pub fn current_member(&self) -> CurrentMember {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl IdentityProvider for MemberStore {
    fn current_user_id(&self) -> Option<UserId> {
        let id = UserId::new(
            self.current
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .id,
        );
        (!id.is_anonymous()).then_some(id)
    }
}
