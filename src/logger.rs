use crate::config::{DEFAULT_LOG_FILTER, LOGGING_ENABLED};
use crate::peer::types::IceCandidate;
use tracing::{debug, info};
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;

/// Local wall-clock timestamps with milliseconds
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Installs the global subscriber.
///
/// PIPERCHAT_LOG takes an `EnvFilter` directive and always wins; otherwise
/// debug builds log with [`DEFAULT_LOG_FILTER`] and release builds stay quiet.
/// Calling this more than once is harmless.
pub fn init_logging() {
    let filter = match std::env::var("PIPERCHAT_LOG") {
        Ok(directive) => directive,
        Err(_) if LOGGING_ENABLED => DEFAULT_LOG_FILTER.to_string(),
        Err(_) => return,
    };

    let _ = tracing_subscriber::fmt()
        .with_timer(LocalTime)
        .with_target(false)
        .with_env_filter(EnvFilter::new(filter))
        .try_init();
}

/// Trickle-ICE trace of one candidate
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}

/// Snapshot of getStats → nominated pair
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{}  type: {:?}  bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.stats_type,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}
