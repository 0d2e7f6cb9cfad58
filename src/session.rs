//! Session lifecycle state, shared across the capture, pacing, and protocol
//! tasks.
//!
//! The whole lifecycle lives in a single atomic cell so every component reads
//! one authoritative value instead of juxtaposed mode flags that can drift
//! apart.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No connection to the transcription service.
    Disconnected = 0,
    /// Transport handshake completed; not capturing.
    Connected = 1,
    /// Capturing and transmitting at the normal cadence.
    RecordingActive = 2,
    /// Capturing through a long idle period; transmission slowed.
    RecordingSleeping = 3,
    /// A commit is in flight; transmission suspended until the terminal
    /// response arrives.
    Processing = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connected,
            2 => SessionState::RecordingActive,
            3 => SessionState::RecordingSleeping,
            4 => SessionState::Processing,
            _ => SessionState::Disconnected,
        }
    }

    /// True while the capture source is running (frames are being buffered).
    pub fn is_capturing(self) -> bool {
        matches!(
            self,
            SessionState::RecordingActive
                | SessionState::RecordingSleeping
                | SessionState::Processing
        )
    }

    /// True while chunk transmission is allowed.
    pub fn is_transmitting(self) -> bool {
        matches!(
            self,
            SessionState::RecordingActive | SessionState::RecordingSleeping
        )
    }

    /// Lowercase name for logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::RecordingActive => "recording",
            SessionState::RecordingSleeping => "sleeping",
            SessionState::Processing => "processing",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically shared [`SessionState`].
///
/// Transitions go through [`SharedState::transition`] (compare-exchange) so a
/// stale reader can never overwrite a newer state; only connect/disconnect
/// use the unconditional [`SharedState::set`].
#[derive(Debug)]
pub struct SharedState(AtomicU8);

impl SharedState {
    pub fn new() -> Self {
        Self(AtomicU8::new(SessionState::Disconnected as u8))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Unconditionally overwrites the state. Reserved for connection
    /// establishment and teardown, which invalidate everything in flight.
    pub fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Applies `from -> to` only if the current state is `from`.
    ///
    /// Returns true when the transition was applied.
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Enters Processing from either recording state.
    ///
    /// Returns true if the state is now Processing because of this call;
    /// false if it already was Processing or recording never started.
    pub fn enter_processing(&self) -> bool {
        self.transition(SessionState::RecordingActive, SessionState::Processing)
            || self.transition(SessionState::RecordingSleeping, SessionState::Processing)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_disconnected() {
        let state = SharedState::new();
        assert_eq!(state.get(), SessionState::Disconnected);
    }

    #[test]
    fn test_transition_applies_only_from_expected_state() {
        let state = SharedState::new();
        state.set(SessionState::Connected);

        assert!(state.transition(SessionState::Connected, SessionState::RecordingActive));
        assert_eq!(state.get(), SessionState::RecordingActive);

        // Repeating the same transition is a no-op.
        assert!(!state.transition(SessionState::Connected, SessionState::RecordingActive));
        assert_eq!(state.get(), SessionState::RecordingActive);
    }

    #[test]
    fn test_enter_processing_from_active_and_sleeping() {
        let state = SharedState::new();

        state.set(SessionState::RecordingActive);
        assert!(state.enter_processing());
        assert_eq!(state.get(), SessionState::Processing);

        state.set(SessionState::RecordingSleeping);
        assert!(state.enter_processing());
        assert_eq!(state.get(), SessionState::Processing);

        // Already processing: no double-entry.
        assert!(!state.enter_processing());
    }

    #[test]
    fn test_enter_processing_requires_recording() {
        let state = SharedState::new();
        state.set(SessionState::Connected);
        assert!(!state.enter_processing());
        assert_eq!(state.get(), SessionState::Connected);
    }

    #[test]
    fn test_capture_and_transmit_gates() {
        assert!(!SessionState::Disconnected.is_capturing());
        assert!(!SessionState::Connected.is_capturing());
        assert!(SessionState::RecordingActive.is_capturing());
        assert!(SessionState::RecordingSleeping.is_capturing());
        // Capture keeps buffering during Processing; only transmission stops.
        assert!(SessionState::Processing.is_capturing());
        assert!(!SessionState::Processing.is_transmitting());

        assert!(SessionState::RecordingActive.is_transmitting());
        assert!(SessionState::RecordingSleeping.is_transmitting());
        assert!(!SessionState::Connected.is_transmitting());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
        assert_eq!(SessionState::Processing.to_string(), "processing");
    }
}
