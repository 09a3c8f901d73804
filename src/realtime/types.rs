use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::identity::UserId;

/// Live attachment of a logical subscription to the current session.
///
/// Rebuilt every time the session is (re-)established; the `id` stays stable.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionHandle {
    /// Caller-facing subscription id
    pub id: String,
    pub destination: String,
    /// STOMP-level subscription id on the session
    pub receipt: String,
    /// Session generation the handle was attached on
    pub generation: u64,
    /// Establishment count the handle was attached in
    pub epoch: u64,
}

/// Registry entry as reported by [`crate::Client::subscriptions`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub id: String,
    pub destination: String,
    pub created_at: DateTime<Utc>,
    pub receipt: String,
}

/// Snapshot returned by [`crate::Client::connection_status`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub subscription_count: usize,
    /// Registered ids, sorted
    pub subscription_ids: Vec<String>,
}

/// Diagnostic snapshot returned by [`crate::Client::check_connection`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCheck {
    pub connected: bool,
    /// A session object exists
    pub has_session: bool,
    /// The session exists and is activated
    pub session_active: bool,
    pub user_id: Option<UserId>,
    pub attempts: u32,
}

/// Result of [`crate::Client::connect`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// No identity, or the logged-out sentinel
    NotAuthenticated,
    /// A session exists and is connected
    AlreadyConnected,
    /// A previous `connect` has not resolved yet
    InProgress,
    /// The attempt ceiling was reached; only `force_reconnect` resets it
    AttemptsExhausted,
    /// A new session was activated
    Started {
        attempt: u32,
    },
    /// The session could not be created or activated
    Failed,
}

/// Counts reported by a subscription restore pass.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Records re-attached to the new session
    pub restored: usize,
    /// Records already attached in the current epoch
    pub skipped: usize,
    /// Records whose re-attach failed and were removed
    pub dropped: usize,
}

/// Well-known per-user queues with fixed subscription ids.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Channel {
    Notifications,
    NotificationCount,
    ChatMessages,
    ChatUnreadCount,
}

impl Channel {
    #[must_use]
    pub const fn destination(self) -> &'static str {
        match self {
            Self::Notifications => "/user/queue/notifications",
            Self::NotificationCount => "/user/queue/notification-count",
            Self::ChatMessages => "/user/queue/chat-messages",
            Self::ChatUnreadCount => "/user/queue/chat-unread-count",
        }
    }

    #[must_use]
    pub const fn subscription_id(self) -> &'static str {
        match self {
            Self::Notifications => "notifications",
            Self::NotificationCount => "notification-count",
            Self::ChatMessages => "chat-messages",
            Self::ChatUnreadCount => "chat-unread-count",
        }
    }
}
