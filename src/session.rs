use crate::error::{Result, SignalingError};
use crate::mailbox::{CollectionPath, RecordPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Field of the session record holding the caller's description
pub const OFFER_FIELD: &str = "offer";
/// Field of the session record holding the callee's description
pub const ANSWER_FIELD: &str = "answer";

/// Opaque session identifier, minted by the mailbox for the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.trim().to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// `{ type, sdp }` as stored in the session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Decoded view of a session record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
}

impl SessionRecord {
    pub fn from_value(path: &RecordPath, data: &Value) -> Result<Self> {
        if data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(data.clone()).map_err(|e| SignalingError::malformed(path, e))
    }
}

/// Which side of the call this coordinator plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

impl Role {
    /// Sub-collection this side appends its candidates to
    pub fn own_candidates(self) -> &'static str {
        match self {
            Role::Caller => "offerCandidates",
            Role::Callee => "answerCandidates",
        }
    }

    /// Sub-collection this side reads the peer's candidates from
    pub fn remote_candidates(self) -> &'static str {
        match self {
            Role::Caller => "answerCandidates",
            Role::Callee => "offerCandidates",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Caller => f.write_str("caller"),
            Role::Callee => f.write_str("callee"),
        }
    }
}

/// Mailbox locations belonging to one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub id: SessionId,
    pub record: RecordPath,
    pub offer_candidates: CollectionPath,
    pub answer_candidates: CollectionPath,
}

impl SessionPaths {
    pub fn new(calls: &CollectionPath, id: SessionId) -> Self {
        let record = calls.record(id.as_str());
        Self {
            offer_candidates: record.collection(Role::Caller.own_candidates()),
            answer_candidates: record.collection(Role::Callee.own_candidates()),
            record,
            id,
        }
    }

    pub fn from_record(record: RecordPath) -> Self {
        let id = SessionId(record.id().to_string());
        Self {
            offer_candidates: record.collection(Role::Caller.own_candidates()),
            answer_candidates: record.collection(Role::Callee.own_candidates()),
            record,
            id,
        }
    }

    pub fn own_candidates(&self, role: Role) -> &CollectionPath {
        match role {
            Role::Caller => &self.offer_candidates,
            Role::Callee => &self.answer_candidates,
        }
    }

    pub fn remote_candidates(&self, role: Role) -> &CollectionPath {
        match role {
            Role::Caller => &self.answer_candidates,
            Role::Callee => &self.offer_candidates,
        }
    }
}
