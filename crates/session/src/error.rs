//! Error types for the session layer

use eeg_types::SubsystemError;
use thiserror::Error;

/// Failures of a single handshake operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("handshake '{name}' already holds an unconsumed signal")]
    SlotFull { name: &'static str },

    #[error("handshake '{name}' lost its peer")]
    Disconnected { name: &'static str },

    #[error("handshake '{name}' abandoned because stop was requested")]
    Stopped { name: &'static str },
}

/// Session-level error types
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("subsystem '{subsystem}' failed to initialize: {source}")]
    Init {
        subsystem: &'static str,
        #[source]
        source: SubsystemError,
    },

    #[error("failed to spawn thread for '{name}': {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("session has already been started")]
    AlreadyStarted,

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Subsystem error: {0}")]
    Subsystem(#[from] SubsystemError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<HandshakeError> for SubsystemError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::SlotFull { .. } => SubsystemError::HandshakeOverrun(err.to_string()),
            HandshakeError::Disconnected { .. } => SubsystemError::Disconnected(err.to_string()),
            HandshakeError::Stopped { .. } => SubsystemError::Other(err.to_string()),
        }
    }
}

impl From<SessionError> for SubsystemError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Subsystem(inner) => inner,
            SessionError::Init { source, .. } => source,
            SessionError::Io(e) => SubsystemError::Io(e.to_string()),
            SessionError::Csv(e) => SubsystemError::Io(e.to_string()),
            SessionError::Serialization(e) => SubsystemError::Io(e.to_string()),
            other => SubsystemError::Other(other.to_string()),
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_errors_keep_their_kind() {
        assert!(matches!(
            SubsystemError::from(HandshakeError::SlotFull { name: "feedback_ready" }),
            SubsystemError::HandshakeOverrun(msg) if msg.contains("feedback_ready")
        ));
        assert!(matches!(
            SubsystemError::from(HandshakeError::Disconnected { name: "trial_processed" }),
            SubsystemError::Disconnected(_)
        ));
        assert!(matches!(
            SubsystemError::from(HandshakeError::Stopped { name: "trial_data_ready" }),
            SubsystemError::Other(_)
        ));
    }
}
