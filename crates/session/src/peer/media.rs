//! Local media acquisition
//!
//! The link acquires local tracks through the [`MediaSource`] seam; the
//! capture pipeline behind it belongs to the embedding application. The
//! default [`StaticTrackSource`] builds sample-fed tracks the app writes
//! encoded frames into.

use crate::config::LinkOptions;
use async_trait::async_trait;
use paircam_core::{MediaError, Retrier, RetryPolicy, Session};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// The local tracks attached to a transport for sending.
#[derive(Clone, Default)]
pub struct LocalTrackSet {
    /// Opus audio track, if acquired
    pub audio: Option<Arc<TrackLocalStaticSample>>,
    /// Video track, if acquired
    pub video: Option<Arc<TrackLocalStaticSample>>,
}

impl LocalTrackSet {
    /// All acquired tracks, audio first.
    pub fn all(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.audio
            .iter()
            .chain(self.video.iter())
            .cloned()
            .collect()
    }

    /// Whether anything was acquired.
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// Provides local media tracks for the camera role.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire local tracks for the session.
    async fn acquire(&self, session: &Session) -> std::result::Result<LocalTrackSet, MediaError>;

    /// Stop and release previously acquired tracks.
    async fn release(&self, tracks: LocalTrackSet);
}

/// Default source backed by sample-fed static tracks.
///
/// Acquisition cannot fail here; platform sources that wrap real capture
/// devices surface the [`MediaError`] taxonomy instead.
pub struct StaticTrackSource;

#[async_trait]
impl MediaSource for StaticTrackSource {
    async fn acquire(&self, session: &Session) -> std::result::Result<LocalTrackSet, MediaError> {
        let stream_id = format!("stream-{}", session.session_id);

        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48_000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            format!("audio-{}", session.local_device_id),
            stream_id.clone(),
        ));

        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90_000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            format!("video-{}", session.local_device_id),
            stream_id,
        ));

        Ok(LocalTrackSet {
            audio: Some(audio),
            video: Some(video),
        })
    }

    async fn release(&self, tracks: LocalTrackSet) {
        debug!(
            "releasing local tracks (audio: {}, video: {})",
            tracks.audio.is_some(),
            tracks.video.is_some()
        );
    }
}

/// Acquire local media under the configured timeout with bounded retries.
///
/// Each attempt is cut off at the acquisition timeout; transient failure
/// classes are retried, permanent ones short-circuit through the retry
/// executor's message classification.
pub async fn acquire_with_retry(
    source: &Arc<dyn MediaSource>,
    session: &Session,
    options: &LinkOptions,
) -> std::result::Result<LocalTrackSet, MediaError> {
    let retrier = Retrier::new(
        "media acquisition",
        RetryPolicy {
            max_attempts: options.media_retry_attempts,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
        },
    );

    retrier
        .run(|attempt| {
            let source = source.clone();
            let session = session.clone();
            let timeout = options.media_timeout();
            async move {
                debug!("acquiring local media (attempt {})", attempt + 1);
                match tokio::time::timeout(timeout, source.acquire(&session)).await {
                    Ok(result) => result,
                    Err(_) => Err(MediaError::Timeout),
                }
            }
        })
        .await
}
