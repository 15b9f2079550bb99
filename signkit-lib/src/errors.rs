//! Error types for SignKit operations.
//!
//! Every caller-facing failure of the protocol engine is a [`SignError`].
//! Variants are grouped by kind (validation, state, persistence, transport,
//! timeout) so hosts can react to the category without matching every case.

use std::fmt;

/// Error codes for FFI and mobile integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SignErrorCode {
    /// Proposal or session namespaces are invalid
    InvalidNamespace = 1000,
    /// Session request has an invalid shape
    InvalidRequest = 1001,
    /// Session event has an invalid shape
    InvalidEvent = 1002,
    /// Extend parameters are out of bounds
    InvalidExtend = 1003,
    /// Method not authorized by the session namespaces
    UnauthorizedMethod = 1100,
    /// Event not authorized by the session namespaces
    UnauthorizedEvent = 1101,
    /// No pairing or session stored for the topic
    NoSequenceForTopic = 2000,
    /// No pending proposal for the proposer key
    CannotFindSessionProposal = 2001,
    /// Caller is not the controller of the session
    UnauthorizedPeer = 2002,
    /// Session has not been acknowledged by the peer yet
    SessionNotAcknowledged = 2003,
    /// Pairing for the topic already exists
    PairingAlreadyExists = 2004,
    /// Pairing URI could not be parsed
    MalformedPairingUri = 2005,
    /// Storage error
    Storage = 3000,
    /// Transport/relay error
    Transport = 4000,
    /// Peer answered with an error response
    PeerRejected = 4001,
    /// Local wait for a response timed out
    Timeout = 4002,
    /// Key management error
    Crypto = 5000,
    /// Serialization error
    Serialization = 5001,
    /// Internal/unexpected error
    Internal = 9999,
}

/// Comprehensive error type for SignKit operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SignError {
    /// Proposal or session namespaces failed validation.
    InvalidNamespace(String),

    /// Session request parameters failed validation.
    InvalidRequest(String),

    /// Session event parameters failed validation.
    InvalidEvent(String),

    /// Extend parameters failed validation.
    InvalidExtend(String),

    /// Method is not authorized for the chain by the session namespaces.
    UnauthorizedMethod(String),

    /// Event is not authorized for the chain by the session namespaces.
    UnauthorizedEvent(String),

    /// No valid pairing or session is stored for the topic.
    NoSequenceForTopic(String),

    /// No pending proposal is recorded for the proposer public key.
    CannotFindSessionProposal(String),

    /// The operation is reserved to the session controller.
    UnauthorizedPeer(String),

    /// The session has not been acknowledged by the peer.
    SessionNotAcknowledged(String),

    /// A pairing for the topic is already stored.
    PairingAlreadyExists(String),

    /// The pairing URI is malformed.
    MalformedPairingUri(String),

    /// Storage operation failed.
    Storage(String),

    /// Relay transport failed.
    Transport(String),

    /// The peer answered with a JSON-RPC error.
    PeerRejected {
        /// Peer error code
        code: i64,
        /// Peer error message
        message: String,
    },

    /// Local wait for a response timed out.
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Key management failed.
    Crypto(String),

    /// Serialization/deserialization error.
    Serialization(String),

    /// Internal/unexpected error.
    Internal(String),
}

impl SignError {
    /// Get the error code for FFI/mobile integration.
    pub fn code(&self) -> SignErrorCode {
        match self {
            Self::InvalidNamespace(_) => SignErrorCode::InvalidNamespace,
            Self::InvalidRequest(_) => SignErrorCode::InvalidRequest,
            Self::InvalidEvent(_) => SignErrorCode::InvalidEvent,
            Self::InvalidExtend(_) => SignErrorCode::InvalidExtend,
            Self::UnauthorizedMethod(_) => SignErrorCode::UnauthorizedMethod,
            Self::UnauthorizedEvent(_) => SignErrorCode::UnauthorizedEvent,
            Self::NoSequenceForTopic(_) => SignErrorCode::NoSequenceForTopic,
            Self::CannotFindSessionProposal(_) => SignErrorCode::CannotFindSessionProposal,
            Self::UnauthorizedPeer(_) => SignErrorCode::UnauthorizedPeer,
            Self::SessionNotAcknowledged(_) => SignErrorCode::SessionNotAcknowledged,
            Self::PairingAlreadyExists(_) => SignErrorCode::PairingAlreadyExists,
            Self::MalformedPairingUri(_) => SignErrorCode::MalformedPairingUri,
            Self::Storage(_) => SignErrorCode::Storage,
            Self::Transport(_) => SignErrorCode::Transport,
            Self::PeerRejected { .. } => SignErrorCode::PeerRejected,
            Self::Timeout { .. } => SignErrorCode::Timeout,
            Self::Crypto(_) => SignErrorCode::Crypto,
            Self::Serialization(_) => SignErrorCode::Serialization,
            Self::Internal(_) => SignErrorCode::Internal,
        }
    }

    /// Get the error message as an owned String (useful for FFI).
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Returns true for input validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidNamespace(_)
                | Self::InvalidRequest(_)
                | Self::InvalidEvent(_)
                | Self::InvalidExtend(_)
                | Self::UnauthorizedMethod(_)
                | Self::UnauthorizedEvent(_)
        )
    }

    /// Returns true for precondition failures on sequence existence, role or readiness.
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            Self::NoSequenceForTopic(_)
                | Self::CannotFindSessionProposal(_)
                | Self::UnauthorizedPeer(_)
                | Self::SessionNotAcknowledged(_)
                | Self::PairingAlreadyExists(_)
        )
    }

    /// Returns true if this error is potentially recoverable by retrying.
    ///
    /// The engine itself never retries; this is a hint for the host.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }

    /// Create a missing-sequence error for a topic.
    pub fn no_sequence(topic: impl fmt::Display) -> Self {
        Self::NoSequenceForTopic(topic.to_string())
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

impl fmt::Display for SignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNamespace(msg) => write!(f, "invalid namespace: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            Self::InvalidEvent(msg) => write!(f, "invalid event: {}", msg),
            Self::InvalidExtend(msg) => write!(f, "invalid extend: {}", msg),
            Self::UnauthorizedMethod(msg) => write!(f, "unauthorized method: {}", msg),
            Self::UnauthorizedEvent(msg) => write!(f, "unauthorized event: {}", msg),
            Self::NoSequenceForTopic(topic) => {
                write!(f, "cannot find sequence for given topic: {}", topic)
            }
            Self::CannotFindSessionProposal(key) => {
                write!(f, "no session proposal for proposer: {}", key)
            }
            Self::UnauthorizedPeer(msg) => write!(f, "unauthorized peer: {}", msg),
            Self::SessionNotAcknowledged(topic) => {
                write!(f, "session is not acknowledged: {}", topic)
            }
            Self::PairingAlreadyExists(topic) => {
                write!(f, "pairing already exists for topic: {}", topic)
            }
            Self::MalformedPairingUri(msg) => write!(f, "malformed pairing uri: {}", msg),
            Self::Storage(msg) => write!(f, "storage error: {}", msg),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::PeerRejected { code, message } => {
                write!(f, "peer rejected with {}: {}", code, message)
            }
            Self::Timeout {
                operation,
                timeout_ms,
            } => write!(f, "{} timed out after {}ms", operation, timeout_ms),
            Self::Crypto(msg) => write!(f, "crypto error: {}", msg),
            Self::Serialization(msg) => write!(f, "serialization error: {}", msg),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for SignError {}

impl From<serde_json::Error> for SignError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
