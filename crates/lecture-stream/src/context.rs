//! Live media context of a running stream session
//!
//! A [`StreamContext`] is built from the configuration each time the stream
//! starts and dropped on stop. It is shared between the controller, the
//! peer connections and the hot-swap listener through [`SharedContext`];
//! every writer goes through the same `parking_lot` lock.

use crate::config::{StreamConfig, VideoCaptureCapability};
use crate::media::audio::AudioFrameProcessor;
use crate::peer::{Contact, PeerState};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Shared handle to the active stream context
pub type SharedContext = Arc<RwLock<StreamContext>>;

/// Consumer of raw video frames
pub type VideoFrameConsumer = Arc<dyn Fn(&VideoFrame) + Send + Sync>;

/// Consumer of peer connection state changes
pub type PeerStateConsumer = Arc<dyn Fn(&Contact, PeerState) + Send + Sync>;

/// Callback invoked when the shared screen or window goes away
pub type SourceEndedCallback = Arc<dyn Fn() + Send + Sync>;

/// Course the session streams to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Opaque course id, also used as the media room name
    pub id: String,

    pub title: String,
}

impl Course {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// STUN/TURN server entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }
}

/// Raw video frame (I420)
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp_us: u64,
    pub data: Bytes,
}

/// Shareable screen or window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSource {
    pub id: u64,
    pub title: String,
    /// Whole screen rather than a single window
    pub is_screen: bool,
}

/// Audio part of the stream context
#[derive(Clone)]
pub struct AudioContext {
    pub capture_device: Option<String>,
    pub playback_device: Option<String>,
    pub playback_volume: f32,
    pub send_audio: bool,
    pub receive_audio: bool,
    /// Converts captured frames for the recording sink
    pub frame_consumer: Option<Arc<Mutex<AudioFrameProcessor>>>,
}

/// Camera part of the stream context
#[derive(Clone)]
pub struct VideoContext {
    pub capture_device: Option<String>,
    pub capability: VideoCaptureCapability,
    pub bitrate_kbps: u32,
    pub send_video: bool,
    pub receive_video: bool,
    pub frame_consumer: Option<VideoFrameConsumer>,
}

/// Screen-share part of the stream context
#[derive(Clone)]
pub struct ScreenContext {
    pub source: Option<ScreenSource>,
    pub frame_rate: u32,
    pub bitrate_kbps: u32,
    pub send_screen: bool,
    pub local_frame_consumer: Option<VideoFrameConsumer>,
    pub remote_frame_consumer: Option<VideoFrameConsumer>,
    pub source_ended: Option<SourceEndedCallback>,
}

/// Everything a running session needs to negotiate and feed media
#[derive(Clone)]
pub struct StreamContext {
    pub audio: AudioContext,
    pub video: VideoContext,
    pub screen: ScreenContext,
    pub ice_servers: Vec<IceServer>,
    pub course: Option<Course>,
    pub peer_state_consumer: Option<PeerStateConsumer>,
}

impl StreamContext {
    /// Build a fresh context from the current configuration
    pub fn from_config(config: &StreamConfig, course: Option<Course>) -> Self {
        Self {
            audio: AudioContext {
                capture_device: config.audio.capture_device.clone(),
                playback_device: config.audio.playback_device.clone(),
                playback_volume: config.audio.playback_volume,
                send_audio: config.microphone_enabled,
                receive_audio: true,
                frame_consumer: None,
            },
            video: VideoContext {
                capture_device: config.camera.device.clone(),
                capability: config.camera.capability,
                bitrate_kbps: config.camera.bitrate_kbps,
                send_video: config.camera_enabled,
                receive_video: true,
                frame_consumer: None,
            },
            screen: ScreenContext {
                source: None,
                frame_rate: config.screen_share.frame_rate,
                bitrate_kbps: config.screen_share.bitrate_kbps,
                send_screen: false,
                local_frame_consumer: None,
                remote_frame_consumer: None,
                source_ended: None,
            },
            ice_servers: config.stun_servers.iter().map(IceServer::stun).collect(),
            course,
            peer_state_consumer: None,
        }
    }

    pub fn into_shared(self) -> SharedContext {
        Arc::new(RwLock::new(self))
    }

    pub fn course_id(&self) -> Option<&str> {
        self.course.as_ref().map(|c| c.id.as_str())
    }
}

impl fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamContext")
            .field("send_audio", &self.audio.send_audio)
            .field("receive_audio", &self.audio.receive_audio)
            .field("send_video", &self.video.send_video)
            .field("receive_video", &self.video.receive_video)
            .field("send_screen", &self.screen.send_screen)
            .field("ice_servers", &self.ice_servers.len())
            .field("course", &self.course)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_config() {
        let mut config = StreamConfig::default();
        config.microphone_enabled = false;
        config.camera_enabled = true;
        config.camera.device = Some("Front".to_string());

        let ctx = StreamContext::from_config(&config, Some(Course::new("C1", "Algorithms")));

        assert!(!ctx.audio.send_audio);
        assert!(ctx.audio.receive_audio);
        assert!(ctx.video.send_video);
        assert_eq!(ctx.video.capture_device.as_deref(), Some("Front"));
        assert_eq!(ctx.ice_servers, vec![IceServer::stun("stun:stun.l.google.com:19302")]);
        assert_eq!(ctx.course_id(), Some("C1"));
        assert!(ctx.screen.source.is_none());
    }
}
