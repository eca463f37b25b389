//! Local media acquisition
//!
//! Capturing devices is outside this crate. A [`LocalMedia`] hands over
//! ready-made tracks before a call starts; if it fails, the call is never
//! started.

use crate::error::{Result, SignalingError};
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

#[async_trait]
pub trait LocalMedia: Send + Sync {
    async fn acquire(&self) -> Result<Vec<LocalTrack>>;
}

/// Data-channel-only calls
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMedia;

#[async_trait]
impl LocalMedia for NoMedia {
    async fn acquire(&self) -> Result<Vec<LocalTrack>> {
        Ok(Vec::new())
    }
}

/// Sample-fed audio/video tracks; the application writes frames into them
#[derive(Debug, Clone)]
pub struct SampleTracks {
    pub audio: bool,
    pub video: bool,
    pub stream_id: String,
}

impl Default for SampleTracks {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            stream_id: "piperchat".into(),
        }
    }
}

impl SampleTracks {
    /// Tracks with concrete types, for feeding samples
    pub fn build(&self) -> Result<Vec<Arc<TrackLocalStaticSample>>> {
        if !self.audio && !self.video {
            return Err(SignalingError::MediaAcquisition(
                "neither audio nor video requested".into(),
            ));
        }
        let mut tracks = Vec::new();
        if self.audio {
            tracks.push(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                "audio".to_owned(),
                self.stream_id.clone(),
            )));
        }
        if self.video {
            tracks.push(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                self.stream_id.clone(),
            )));
        }
        Ok(tracks)
    }
}

#[async_trait]
impl LocalMedia for SampleTracks {
    async fn acquire(&self) -> Result<Vec<LocalTrack>> {
        Ok(self
            .build()?
            .into_iter()
            .map(|track| track as LocalTrack)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sample_tracks_by_kind() {
        let tracks = SampleTracks {
            video: false,
            ..Default::default()
        }
        .acquire()
        .await
        .unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].kind().to_string(), "audio");
    }

    #[tokio::test]
    async fn empty_request_fails_acquisition() {
        let err = SampleTracks {
            audio: false,
            video: false,
            ..Default::default()
        }
        .acquire()
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SignalingError::MediaAcquisition(_)));
    }
}
