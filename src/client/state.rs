//! Client lifecycle states.

/// Lifecycle state of a [`Client`](crate::Client).
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Reconnecting
///                                   \              /
///                                    -> Closed <---
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ClientState {
    /// Not yet dialed.
    #[default]
    Disconnected,
    /// First dial in progress.
    Connecting,
    /// A connection is installed and the read loop is running.
    Connected,
    /// The connection failed; the supervisor is redialing.
    Reconnecting,
    /// `close()` has run. Terminal.
    Closed,
}

impl ClientState {
    /// Returns `true` only for `Connected`.
    #[must_use]
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, ClientState::Connected)
    }

    /// Returns `true` for `Closed`, which is never left.
    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, ClientState::Closed)
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientState::Disconnected => write!(f, "Disconnected"),
            ClientState::Connecting => write!(f, "Connecting"),
            ClientState::Connected => write!(f, "Connected"),
            ClientState::Reconnecting => write!(f, "Reconnecting"),
            ClientState::Closed => write!(f, "Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert_eq!(ClientState::default(), ClientState::Disconnected);
    }

    #[test]
    fn test_is_connected() {
        assert!(ClientState::Connected.is_connected());
        assert!(!ClientState::Reconnecting.is_connected());
        assert!(!ClientState::Closed.is_connected());
    }

    #[test]
    fn test_only_closed_is_terminal() {
        for state in [
            ClientState::Disconnected,
            ClientState::Connecting,
            ClientState::Connected,
            ClientState::Reconnecting,
        ] {
            assert!(!state.is_terminal(), "{state} should not be terminal");
        }
        assert!(ClientState::Closed.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(ClientState::Reconnecting.to_string(), "Reconnecting");
        assert_eq!(ClientState::Closed.to_string(), "Closed");
    }
}
