//! Error types for call signaling

use crate::coordinator::state::CallState;
use crate::session::SessionId;
use thiserror::Error;

/// Errors surfaced by the coordinator and its collaborators
#[derive(Error, Debug)]
pub enum SignalingError {
    /// The mailbox rejected a write; never retried
    #[error("Mailbox rejected write to {path}: {reason}")]
    StoreWrite { path: String, reason: String },

    /// The mailbox could not be read
    #[error("Mailbox read failed for {path}: {reason}")]
    StoreRead { path: String, reason: String },

    /// The peer connection refused a remote candidate
    #[error("Remote candidate rejected ({candidate}): {reason}")]
    CandidateRejected { candidate: String, reason: String },

    /// Join referenced a session that does not exist
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session already carries an answer
    #[error("Session {0} already has an answer")]
    AnswerAlreadyWritten(SessionId),

    /// Negotiation engine call made in an invalid state
    #[error("Negotiation engine in invalid state: {0}")]
    EngineState(String),

    /// Error reported by the WebRTC stack
    #[error("WebRTC error: {0}")]
    Engine(#[from] webrtc::Error),

    /// Local media could not be obtained
    #[error("Failed to acquire local media: {0}")]
    MediaAcquisition(String),

    /// A record in the mailbox does not have the expected shape
    #[error("Malformed record at {path}: {reason}")]
    MalformedRecord { path: String, reason: String },

    /// Action not allowed in the current state
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: CallState,
        action: &'static str,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Hang-up interrupted an `initiate` or `join` in flight
    #[error("Call was hung up")]
    Cancelled,

    /// The coordinator task has stopped
    #[error("Coordinator is no longer running")]
    CoordinatorGone,
}

impl SignalingError {
    pub(crate) fn malformed(path: impl ToString, reason: impl ToString) -> Self {
        Self::MalformedRecord {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SignalingError>;
