use crate::config::SignalingConfig;
use crate::error::{Result, SignalingError};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::media::LocalTrack;
use crate::peer::engine::{EngineFactory, NegotiationEngine};
use crate::peer::ice::{analyze_candidates, apply_pending_candidates};
use crate::peer::types::{
    CandidateDelivery, EngineEvent, IceCandidate, PeerState, RemoteTrack, ServerConfig,
};
use crate::session::{Role, SdpType, SessionDescription};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::{
    api::APIBuilder,
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Builds [`WebrtcEngine`]s sharing one ICE configuration and set of local tracks
pub struct WebrtcEngineFactory {
    ice_servers: Vec<RTCIceServer>,
    tracks: Vec<LocalTrack>,
    data_channel: Option<String>,
}

impl WebrtcEngineFactory {
    pub fn new(config: &SignalingConfig, tracks: Vec<LocalTrack>) -> Self {
        Self {
            ice_servers: get_user_ice_servers(&config.ice_servers),
            tracks,
            data_channel: config.data_channel.clone(),
        }
    }
}

#[async_trait]
impl EngineFactory for WebrtcEngineFactory {
    type Engine = WebrtcEngine;

    async fn create(&self, role: Role) -> Result<WebrtcEngine> {
        new_peer(role, self.ice_servers.clone(), &self.tracks, self.data_channel.as_deref()).await
    }
}

/// Negotiation engine backed by `webrtc::RTCPeerConnection`
pub struct WebrtcEngine {
    pc: Arc<RTCPeerConnection>,
    events: Option<UnboundedReceiver<EngineEvent>>,
    /// Reports the fate of deferred candidates
    notify: UnboundedSender<EngineEvent>,
    /// Remote candidates received before the remote description
    pending: Vec<IceCandidate>,
}

impl WebrtcEngine {
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

/// Creates the peer; the caller opens the data channel, the callee accepts it
async fn new_peer(
    role: Role,
    ice_servers: Vec<RTCIceServer>,
    tracks: &[LocalTrack],
    data_channel: Option<&str>,
) -> Result<WebrtcEngine> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await?);
    let (tx, rx) = mpsc::unbounded_channel();

    watch_candidates(&pc, tx.clone());
    watch_state(&pc, tx.clone());
    watch_tracks(&pc, tx.clone());

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    for track in tracks {
        let sender = pc.add_track(Arc::clone(track)).await?;
        // RTCP has to be drained for the interceptors to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
    }

    match (role, data_channel) {
        (Role::Caller, Some(label)) => {
            let dc = pc
                .create_data_channel(label, Some(RTCDataChannelInit::default()))
                .await?;
            attach_dc(&dc);
        }
        (Role::Callee, _) => {
            pc.on_data_channel(Box::new(|dc: Arc<RTCDataChannel>| {
                attach_dc(&dc);
                Box::pin(async {})
            }));
        }
        (Role::Caller, None) => {}
    }

    info!("Created {} peer connection", role);
    Ok(WebrtcEngine {
        pc,
        events: Some(rx),
        notify: tx,
        pending: Vec::new(),
    })
}

fn watch_candidates(pc: &RTCPeerConnection, tx: UnboundedSender<EngineEvent>) {
    let gathered = Arc::new(Mutex::new(Vec::<IceCandidate>::new()));
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        let gathered = Arc::clone(&gathered);
        Box::pin(async move {
            let Some(cand) = cand else {
                // None means gathering is over
                if let Ok(all) = gathered.lock() {
                    analyze_candidates(&all);
                }
                let _ = tx.send(EngineEvent::GatheringComplete);
                return;
            };
            match cand.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate::from(init);
                    dump_candidate("LOCAL", &candidate);
                    if let Ok(mut all) = gathered.lock() {
                        all.push(candidate.clone());
                    }
                    let _ = tx.send(EngineEvent::LocalCandidate(candidate));
                }
                Err(e) => warn!("Failed to serialize local candidate: {:?}", e),
            }
        })
    }));
}

fn watch_state(pc: &Arc<RTCPeerConnection>, tx: UnboundedSender<EngineEvent>) {
    let pc_stats = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Peer connection state changed to: {:?}", st);
        if st == RTCPeerConnectionState::Failed {
            if let Some(pc) = pc_stats.upgrade() {
                tokio::spawn(async move {
                    dump_selected_pair(&pc, "BEFORE-FAIL").await;
                });
            }
        }
        let _ = tx.send(EngineEvent::ConnectionState(PeerState::from(st)));
        Box::pin(async {})
    }));
}

fn watch_tracks(pc: &RTCPeerConnection, tx: UnboundedSender<EngineEvent>) {
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let remote = RemoteTrack {
            id: track.id(),
            stream_id: track.stream_id(),
            kind: track.kind().to_string(),
        };
        info!("Remote {} track added: {}", remote.kind, remote.id);
        let _ = tx.send(EngineEvent::RemoteTrack(remote));
        Box::pin(async {})
    }));
}

fn attach_dc(dc: &Arc<RTCDataChannel>) {
    let label = dc.label().to_string();
    dc.on_open(Box::new(move || {
        info!("Data channel '{}' open", label);
        Box::pin(async {})
    }));
}

#[async_trait]
impl NegotiationEngine for WebrtcEngine {
    async fn create_offer(&mut self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        if self.pc.remote_description().await.is_some() {
            return Err(SignalingError::EngineState(
                "remote description already set".into(),
            ));
        }
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        for (candidate, result) in apply_pending_candidates(&self.pc, &mut self.pending).await {
            let event = match result {
                Ok(()) => EngineEvent::PendingCandidateApplied(candidate),
                Err(e) => EngineEvent::PendingCandidateRejected {
                    candidate,
                    reason: e.to_string(),
                },
            };
            let _ = self.notify.send(event);
        }
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<CandidateDelivery> {
        dump_candidate("REMOTE", &candidate);
        if self.pc.remote_description().await.is_none() {
            debug!("Remote description not set yet, queuing candidate");
            self.pending.push(candidate);
            return Ok(CandidateDelivery::Deferred);
        }
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(CandidateDelivery::Applied)
    }

    fn take_events(&mut self) -> Option<UnboundedReceiver<EngineEvent>> {
        self.events.take()
    }

    async fn close(&mut self) -> Result<()> {
        self.pending.clear();
        self.pc.close().await?;
        Ok(())
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
    })
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(SignalingError::EngineState(format!(
            "unexpected description type {other}"
        ))),
    }
}

fn rtc_config(ice_servers: Vec<RTCIceServer>) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// ICE servers in the shape the WebRTC stack expects
pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_servers_get_scheme_and_credentials() {
        let servers = get_user_ice_servers(&[ServerConfig {
            id: "t".into(),
            r#type: "turn".into(),
            url: "relay.example:80".into(),
            username: Some("user".into()),
            credential: Some("pass".into()),
        }]);
        assert_eq!(servers[0].urls, vec!["turn:relay.example:80".to_string()]);
        assert_eq!(servers[0].username, "user");
        assert_eq!(servers[0].credential, "pass");
    }

    #[tokio::test]
    async fn loopback_offer_answer_over_webrtc() {
        let config = SignalingConfig {
            ice_servers: Vec::new(),
            ..Default::default()
        };
        let factory = WebrtcEngineFactory::new(&config, Vec::new());
        let mut caller = factory.create(Role::Caller).await.unwrap();
        let mut callee = factory.create(Role::Callee).await.unwrap();

        let offer = caller.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
        caller.set_local_description(offer.clone()).await.unwrap();

        callee.set_remote_description(offer.clone()).await.unwrap();
        let answer = callee.create_answer().await.unwrap();
        assert_eq!(answer.kind, SdpType::Answer);
        callee.set_local_description(answer.clone()).await.unwrap();

        caller.set_remote_description(answer.clone()).await.unwrap();
        let err = caller.set_remote_description(answer).await.unwrap_err();
        assert!(matches!(err, SignalingError::EngineState(_)));

        caller.close().await.unwrap();
        callee.close().await.unwrap();
    }

    #[tokio::test]
    async fn deferred_candidate_failure_is_reported() {
        let config = SignalingConfig {
            ice_servers: Vec::new(),
            ..Default::default()
        };
        let factory = WebrtcEngineFactory::new(&config, Vec::new());
        let mut caller = factory.create(Role::Caller).await.unwrap();
        let mut callee = factory.create(Role::Callee).await.unwrap();
        let mut events = callee.take_events().unwrap();

        let delivery = callee
            .add_ice_candidate(IceCandidate::new("not a candidate"))
            .await
            .unwrap();
        assert_eq!(delivery, CandidateDelivery::Deferred);

        let offer = caller.create_offer().await.unwrap();
        caller.set_local_description(offer.clone()).await.unwrap();
        callee.set_remote_description(offer).await.unwrap();

        let rejected = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while let Some(ev) = events.recv().await {
                if let EngineEvent::PendingCandidateRejected { candidate, .. } = ev {
                    return Some(candidate);
                }
            }
            None
        })
        .await
        .unwrap();
        assert_eq!(rejected.map(|c| c.candidate).as_deref(), Some("not a candidate"));

        caller.close().await.unwrap();
        callee.close().await.unwrap();
    }
}
