//! Configuration types for the streaming session

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Placeholder substituted with the server name in endpoint templates
pub const SERVER_PLACEHOLDER: &str = "{server}";

/// Main configuration for a stream session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Session-state WebSocket URL template (ws:// or wss://)
    pub state_ws_url: String,

    /// Media-negotiation (Janus) WebSocket URL template
    pub janus_ws_url: String,

    /// Publisher REST API base URL (http:// or https://)
    pub publisher_api_url: String,

    /// Server name substituted for `{server}` at connect time
    pub server_name: String,

    /// Bearer token for the publisher API and WebSocket handshakes
    pub access_token: Option<String>,

    /// STUN server URLs used until the room parameters provide their own
    pub stun_servers: Vec<String>,

    /// Send local microphone audio
    pub microphone_enabled: bool,

    /// Send the camera stream right after the session started
    pub camera_enabled: bool,

    /// Offer screen sharing to the audience
    pub screen_share_enabled: bool,

    /// Camera capture settings
    pub camera: CameraConfig,

    /// Audio device settings
    pub audio: AudioDeviceConfig,

    /// Screen-share encoding profile
    pub screen_share: ScreenShareProfile,

    /// Automatic reconnection policy
    pub reconnect: ReconnectConfig,

    /// Format required by the recording sink
    pub recording_audio: RecordingAudioFormat,

    /// REST request timeout in seconds (default: 30)
    pub http_timeout_secs: u64,
}

/// Camera capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture device name
    pub device: Option<String>,

    /// Capture capability
    pub capability: VideoCaptureCapability,

    /// Target bitrate in kbps (default: 1500)
    pub bitrate_kbps: u32,
}

/// Camera capture capability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoCaptureCapability {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Audio device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDeviceConfig {
    /// Capture (microphone) device name
    pub capture_device: Option<String>,

    /// Playback (speaker) device name
    pub playback_device: Option<String>,

    /// Playback volume in range 0.0-1.0
    pub playback_volume: f32,
}

/// Screen-share encoding profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenShareProfile {
    pub frame_rate: u32,
    pub bitrate_kbps: u32,
}

/// Reconnection policy for failed signaling clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Maximum reconnection attempts (default: 5)
    pub max_retries: u32,

    /// Initial backoff in milliseconds (default: 1000)
    pub backoff_initial_ms: u64,

    /// Maximum backoff in milliseconds (default: 30000)
    pub backoff_max_ms: u64,

    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
}

/// Sample format of the recording sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingAudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            state_ws_url: "wss://{server}/api/publisher/messages".to_string(),
            janus_ws_url: "wss://{server}/janus".to_string(),
            publisher_api_url: "https://{server}".to_string(),
            server_name: "localhost".to_string(),
            access_token: None,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            microphone_enabled: true,
            camera_enabled: false,
            screen_share_enabled: true,
            camera: CameraConfig::default(),
            audio: AudioDeviceConfig::default(),
            screen_share: ScreenShareProfile::default(),
            reconnect: ReconnectConfig::default(),
            recording_audio: RecordingAudioFormat::default(),
            http_timeout_secs: 30,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: None,
            capability: VideoCaptureCapability {
                width: 640,
                height: 360,
                frame_rate: 30,
            },
            bitrate_kbps: 1500,
        }
    }
}

impl Default for AudioDeviceConfig {
    fn default() -> Self {
        Self {
            capture_device: None,
            playback_device: None,
            playback_volume: 1.0,
        }
    }
}

impl Default for ScreenShareProfile {
    fn default() -> Self {
        Self {
            frame_rate: 10,
            bitrate_kbps: 2000,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_initial_ms: 1000,
            backoff_max_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for RecordingAudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
        }
    }
}

/// Substitute the server name into an endpoint template
pub fn resolve_url(template: &str, server_name: &str) -> String {
    template.replace(SERVER_PLACEHOLDER, server_name)
}

impl StreamConfig {
    /// Parse a TOML configuration document; missing keys take defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StreamConfig = toml::from_str(content)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Session-state WebSocket URL with the server name resolved
    pub fn state_url(&self) -> String {
        resolve_url(&self.state_ws_url, &self.server_name)
    }

    /// Janus WebSocket URL with the server name resolved
    pub fn janus_url(&self) -> String {
        resolve_url(&self.janus_ws_url, &self.server_name)
    }

    /// Publisher API URL with the server name resolved
    pub fn api_url(&self) -> String {
        resolve_url(&self.publisher_api_url, &self.server_name)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        for (name, template) in [
            ("state_ws_url", &self.state_ws_url),
            ("janus_ws_url", &self.janus_ws_url),
        ] {
            if !template.starts_with("ws://") && !template.starts_with("wss://") {
                return Err(Error::InvalidConfig(format!(
                    "{} must start with ws:// or wss://, got: {}",
                    name, template
                )));
            }
        }

        if !self.publisher_api_url.starts_with("http://")
            && !self.publisher_api_url.starts_with("https://")
        {
            return Err(Error::InvalidConfig(format!(
                "publisher_api_url must start with http:// or https://, got: {}",
                self.publisher_api_url
            )));
        }

        let api_url = self.api_url();
        url::Url::parse(&api_url).map_err(|e| {
            Error::InvalidConfig(format!("Invalid publisher API URL {}: {}", api_url, e))
        })?;

        if self.server_name.is_empty() {
            return Err(Error::InvalidConfig(
                "server_name cannot be empty".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun: or stuns:, got: {}",
                    url
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.audio.playback_volume) {
            return Err(Error::InvalidConfig(format!(
                "playback_volume must be in range 0.0-1.0, got {}",
                self.audio.playback_volume
            )));
        }

        let capability = &self.camera.capability;
        if capability.width == 0 || capability.height == 0 || capability.frame_rate == 0 {
            return Err(Error::InvalidConfig(format!(
                "camera capability must be non-zero, got {}x{}@{}",
                capability.width, capability.height, capability.frame_rate
            )));
        }

        if self.recording_audio.sample_rate == 0 || self.recording_audio.channels == 0 {
            return Err(Error::InvalidConfig(
                "recording audio format must have a sample rate and channels".to_string(),
            ));
        }

        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.reconnect.backoff_multiplier
            )));
        }

        if self.http_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "http_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
