//! Mailbox change events → coordinator actions

use crate::error::{Result, SignalingError};
use crate::mailbox::{ChangeEvent, ChangeKind};
use crate::peer::types::IceCandidate;
use crate::session::{SdpType, SessionDescription, SessionRecord};

/// Answer carried by a session-record change, if any.
///
/// Whether it still needs applying is the coordinator's call; this only
/// decodes.
pub fn answer_from_change(ev: &ChangeEvent) -> Result<Option<SessionDescription>> {
    if ev.kind == ChangeKind::Removed {
        return Ok(None);
    }
    let record = SessionRecord::from_value(&ev.path, &ev.data)?;
    match record.answer {
        Some(answer) if answer.kind != SdpType::Answer => Err(SignalingError::malformed(
            &ev.path,
            "answer field holds an offer",
        )),
        answer => Ok(answer),
    }
}

/// Candidate to feed the engine. `Modified` and `Removed` never produce one.
pub fn candidate_from_change(ev: &ChangeEvent) -> Result<Option<IceCandidate>> {
    match ev.kind {
        ChangeKind::Added => serde_json::from_value(ev.data.clone())
            .map(Some)
            .map_err(|e| SignalingError::malformed(&ev.path, e)),
        ChangeKind::Modified | ChangeKind::Removed => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::RecordPath;
    use serde_json::{json, Value};

    fn change(kind: ChangeKind, data: Value) -> ChangeEvent {
        ChangeEvent {
            kind,
            path: RecordPath::new("calls/S1/answerCandidates/x"),
            data,
        }
    }

    #[test]
    fn added_candidate_is_fed() {
        let ev = change(ChangeKind::Added, json!({ "candidate": "c1", "sdpMid": "0", "sdpMLineIndex": 0 }));
        let cand = candidate_from_change(&ev).unwrap().unwrap();
        assert_eq!(cand.candidate, "c1");
    }

    #[test]
    fn modified_and_removed_candidates_are_noops() {
        for kind in [ChangeKind::Modified, ChangeKind::Removed] {
            let ev = change(kind, json!({ "candidate": "c1" }));
            assert_eq!(candidate_from_change(&ev).unwrap(), None);
        }
    }

    #[test]
    fn undecodable_candidate_is_reported() {
        let ev = change(ChangeKind::Added, json!({ "sdpMid": "0" }));
        assert!(matches!(
            candidate_from_change(&ev),
            Err(SignalingError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn session_without_answer_yields_nothing() {
        let ev = change(ChangeKind::Modified, json!({ "offer": { "type": "offer", "sdp": "O" } }));
        assert_eq!(answer_from_change(&ev).unwrap(), None);
    }

    #[test]
    fn session_with_answer_yields_it() {
        let ev = change(
            ChangeKind::Modified,
            json!({
                "offer": { "type": "offer", "sdp": "O" },
                "answer": { "type": "answer", "sdp": "A" }
            }),
        );
        assert_eq!(
            answer_from_change(&ev).unwrap(),
            Some(SessionDescription::answer("A"))
        );
    }

    #[test]
    fn answer_of_wrong_type_is_malformed() {
        let ev = change(ChangeKind::Modified, json!({ "answer": { "type": "offer", "sdp": "A" } }));
        assert!(answer_from_change(&ev).is_err());
    }

    #[test]
    fn removed_session_yields_nothing() {
        let ev = change(ChangeKind::Removed, json!({ "answer": { "type": "answer", "sdp": "A" } }));
        assert_eq!(answer_from_change(&ev).unwrap(), None);
    }
}
