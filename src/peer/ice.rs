use crate::peer::types::IceCandidate;
use tracing::{debug, info, warn};
use webrtc::peer_connection::RTCPeerConnection;

/// Candidate counts by type
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

/// Applies candidates that arrived before the remote description, in
/// arrival order, and hands back each one with its outcome
pub async fn apply_pending_candidates(
    pc: &RTCPeerConnection,
    pending: &mut Vec<IceCandidate>,
) -> Vec<(IceCandidate, Result<(), webrtc::Error>)> {
    let mut outcomes = Vec::with_capacity(pending.len());
    for candidate in pending.drain(..) {
        debug!("Applying pending candidate: {:?}", candidate);
        let result = pc.add_ice_candidate(candidate.clone().into()).await;
        if let Err(e) = &result {
            warn!("Failed to apply pending candidate: {:?}", e);
        }
        outcomes.push((candidate, result));
    }
    outcomes
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateStats {
    let mut stats = CandidateStats::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            stats.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            stats.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            stats.relay += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        stats.host, stats.srflx, stats.relay
    );

    if stats.relay == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_type() {
        let candidates = [
            IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host"),
            IceCandidate::new("candidate:2 1 udp 1686052607 1.2.3.4 50000 typ srflx raddr 10.0.0.2 rport 50000"),
            IceCandidate::new("candidate:3 1 udp 41885439 5.6.7.8 3478 typ relay raddr 1.2.3.4 rport 50000"),
            IceCandidate::new("candidate:4 1 udp 2122260223 10.0.0.3 50001 typ host"),
        ];
        assert_eq!(
            analyze_candidates(&candidates),
            CandidateStats { host: 2, srflx: 1, relay: 1 }
        );
    }
}
