#![expect(
    clippy::module_name_repetitions,
    reason = "State types expose their domain in the name for clarity"
)]

use std::time::Instant;

/// Connection state of the shared session.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session, or the session lost its transport
    Disconnected,
    /// A session was activated and has not answered yet
    Connecting {
        /// Connect attempt number, starting at 1
        attempt: u32,
    },
    /// The session is established and accepts subscriptions
    Connected {
        /// When the session was established
        since: Instant,
    },
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting { .. })
    }

    /// Next state after `transition`.
    #[must_use]
    pub(crate) fn apply(self, transition: Transition) -> Self {
        match (self, transition) {
            (_, Transition::Started { attempt }) => Self::Connecting { attempt },
            (_, Transition::Established) => Self::Connected {
                since: Instant::now(),
            },
            (_, Transition::Lost) => Self::Disconnected,
        }
    }
}

/// Inputs driving [`ConnectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// `connect` activated a new session
    Started { attempt: u32 },
    /// The current session reported `CONNECTED`
    Established,
    /// Error, close or teardown of the current session
    Lost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_cycle() {
        let state = ConnectionState::Disconnected.apply(Transition::Started { attempt: 1 });
        assert_eq!(state, ConnectionState::Connecting { attempt: 1 });
        assert!(state.is_connecting());

        let state = state.apply(Transition::Established);
        assert!(state.is_connected());

        let state = state.apply(Transition::Lost);
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[test]
    fn failed_attempt_returns_to_disconnected() {
        let state = ConnectionState::Connecting { attempt: 3 }.apply(Transition::Lost);

        assert_eq!(state, ConnectionState::Disconnected);
        assert!(!state.is_connecting());
    }

    #[test]
    fn low_level_reconnect_establishes_from_disconnected() {
        let state = ConnectionState::Disconnected.apply(Transition::Established);

        assert!(state.is_connected());
    }

    #[test]
    fn lost_is_idempotent() {
        let state = ConnectionState::Disconnected.apply(Transition::Lost);

        assert_eq!(state, ConnectionState::Disconnected);
    }
}
