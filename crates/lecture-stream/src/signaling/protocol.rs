//! Wire types of the session-state and Janus media channels

use super::{IceCandidate, SdpType, SessionDescription};
use crate::action::PlaybackAction;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Janus video room plugin
pub const VIDEOROOM_PLUGIN: &str = "janus.plugin.videoroom";

/// WebSocket subprotocol of the Janus API
pub const JANUS_PROTOCOL: &str = "janus-protocol";

/// WebSocket subprotocol of the session-state channel
pub const STATE_PROTOCOL: &str = "state-protocol";

/// Message on the session-state channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateMessage {
    Action { action: PlaybackAction },
    Ping,
    Pong,
}

impl StateMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::InvalidData(format!("Invalid state message: {}", e)))
    }
}

/// Janus request verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JanusVerb {
    Create,
    Attach,
    Message,
    Trickle,
    Keepalive,
    Detach,
    Destroy,
}

/// JSEP payload attached to negotiation messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl From<SessionDescription> for Jsep {
    fn from(desc: SessionDescription) -> Self {
        Self {
            sdp_type: desc.sdp_type,
            sdp: desc.sdp,
        }
    }
}

impl From<Jsep> for SessionDescription {
    fn from(jsep: Jsep) -> Self {
        Self {
            sdp_type: jsep.sdp_type,
            sdp: jsep.sdp,
        }
    }
}

/// Trickled candidate, or the end-of-candidates marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrickleCandidate {
    Candidate(IceCandidate),
    Completed { completed: bool },
}

/// Outgoing Janus request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JanusRequest {
    pub janus: JanusVerb,

    pub transaction: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsep: Option<Jsep>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<TrickleCandidate>,
}

impl JanusRequest {
    pub fn new(janus: JanusVerb) -> Self {
        Self {
            janus,
            transaction: uuid::Uuid::new_v4().to_string(),
            session_id: None,
            handle_id: None,
            plugin: None,
            body: None,
            jsep: None,
            candidate: None,
        }
    }

    pub fn session(mut self, session_id: u64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn handle(mut self, handle_id: u64) -> Self {
        self.handle_id = Some(handle_id);
        self
    }

    pub fn plugin(mut self, plugin: &str) -> Self {
        self.plugin = Some(plugin.to_string());
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn jsep(mut self, jsep: Jsep) -> Self {
        self.jsep = Some(jsep);
        self
    }

    pub fn candidate(mut self, candidate: TrickleCandidate) -> Self {
        self.candidate = Some(candidate);
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// `data` member of a success response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JanusData {
    pub id: u64,
}

/// Plugin response payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginData {
    pub plugin: String,
    pub data: serde_json::Value,
}

/// Error member of a Janus error response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JanusError {
    pub code: i32,
    pub reason: String,
}

/// Publisher listed in a video room event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomPublisher {
    pub id: u64,
    #[serde(default)]
    pub display: String,
}

/// Incoming Janus message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "janus", rename_all = "lowercase")]
pub enum JanusMessage {
    Success {
        transaction: Option<String>,
        data: Option<JanusData>,
        plugindata: Option<PluginData>,
    },
    Ack {
        transaction: Option<String>,
    },
    Event {
        transaction: Option<String>,
        sender: Option<u64>,
        plugindata: Option<PluginData>,
        jsep: Option<Jsep>,
    },
    Trickle {
        sender: Option<u64>,
        candidate: TrickleCandidate,
    },
    WebRtcUp {
        sender: Option<u64>,
    },
    Hangup {
        sender: Option<u64>,
        reason: Option<String>,
    },
    Media {
        sender: Option<u64>,
        #[serde(rename = "type")]
        media_type: Option<String>,
        receiving: Option<bool>,
    },
    Error {
        transaction: Option<String>,
        error: JanusError,
    },
    Timeout {
        session_id: Option<u64>,
    },
    #[serde(other)]
    Unknown,
}

impl JanusMessage {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::InvalidData(format!("Invalid Janus message: {}", e)))
    }

    pub fn transaction(&self) -> Option<&str> {
        match self {
            JanusMessage::Success { transaction, .. }
            | JanusMessage::Ack { transaction }
            | JanusMessage::Event { transaction, .. }
            | JanusMessage::Error { transaction, .. } => transaction.as_deref(),
            _ => None,
        }
    }

    /// Id carried in the `data` member of a success response
    pub fn data_id(&self) -> Option<u64> {
        match self {
            JanusMessage::Success {
                data: Some(data), ..
            } => Some(data.id),
            _ => None,
        }
    }

    /// Video room payload of an event or synchronous plugin response
    pub fn room_data(&self) -> Option<&serde_json::Value> {
        match self {
            JanusMessage::Event {
                plugindata: Some(p),
                ..
            }
            | JanusMessage::Success {
                plugindata: Some(p),
                ..
            } => Some(&p.data),
            _ => None,
        }
    }

    /// Video room error carried inside a plugin payload
    pub fn room_error(&self) -> Option<String> {
        let data = self.room_data()?;
        let code = data.get("error_code")?;
        let reason = data
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("unknown error");

        Some(format!("{} ({})", reason, code))
    }

    /// Publishers announced in a video room event
    pub fn publishers(&self) -> Vec<RoomPublisher> {
        self.room_data()
            .and_then(|data| data.get("publishers"))
            .and_then(|p| serde_json::from_value(p.clone()).ok())
            .unwrap_or_default()
    }

    /// Feed id that left or stopped publishing
    pub fn departed_feed(&self) -> Option<u64> {
        let data = self.room_data()?;

        ["leaving", "unpublished"]
            .iter()
            .find_map(|key| data.get(*key).and_then(|v| v.as_u64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PageRef;

    #[test]
    fn test_state_action_message() {
        let msg = StateMessage::Action {
            action: PlaybackAction::PageSelected {
                page: PageRef {
                    document_id: uuid::Uuid::nil(),
                    number: 2,
                },
            },
        };

        let json = msg.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "action");
        assert_eq!(value["action"]["type"], "page_selected");
        assert_eq!(value["action"]["page"]["number"], 2);

        assert_eq!(StateMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_janus_request_skips_empty_members() {
        let req = JanusRequest::new(JanusVerb::Attach)
            .session(7)
            .plugin(VIDEOROOM_PLUGIN);

        let value: serde_json::Value = serde_json::from_str(&req.to_json().unwrap()).unwrap();
        assert_eq!(value["janus"], "attach");
        assert_eq!(value["session_id"], 7);
        assert_eq!(value["plugin"], VIDEOROOM_PLUGIN);
        assert!(value.get("handle_id").is_none());
        assert!(value.get("jsep").is_none());
    }

    #[test]
    fn test_parse_success() {
        let msg = JanusMessage::from_json(
            r#"{"janus":"success","transaction":"t1","data":{"id":4242}}"#,
        )
        .unwrap();
        assert_eq!(msg.transaction(), Some("t1"));
        assert_eq!(msg.data_id(), Some(4242));
    }

    #[test]
    fn test_parse_joined_event_with_publishers() {
        let msg = JanusMessage::from_json(
            r#"{
                "janus":"event","transaction":"t2","sender":11,
                "plugindata":{"plugin":"janus.plugin.videoroom","data":{
                    "videoroom":"joined","room":"C1","id":99,
                    "publishers":[{"id":5,"display":"Ada Lovelace"}]
                }}
            }"#,
        )
        .unwrap();

        assert_eq!(msg.room_data().unwrap()["videoroom"], "joined");
        assert_eq!(
            msg.publishers(),
            vec![RoomPublisher {
                id: 5,
                display: "Ada Lovelace".to_string()
            }]
        );
        assert!(msg.room_error().is_none());
    }

    #[test]
    fn test_parse_answer_event() {
        let msg = JanusMessage::from_json(
            r#"{"janus":"event","sender":11,"plugindata":{"plugin":"janus.plugin.videoroom","data":{"configured":"ok"}},"jsep":{"type":"answer","sdp":"v=0"}}"#,
        )
        .unwrap();

        match msg {
            JanusMessage::Event { jsep: Some(jsep), .. } => {
                assert_eq!(SessionDescription::from(jsep), SessionDescription::answer("v=0"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_trickle_variants() {
        let msg = JanusMessage::from_json(
            r#"{"janus":"trickle","sender":11,"candidate":{"candidate":"candidate:1","sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            JanusMessage::Trickle {
                candidate: TrickleCandidate::Candidate(_),
                ..
            }
        ));

        let msg = JanusMessage::from_json(
            r#"{"janus":"trickle","sender":11,"candidate":{"completed":true}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            JanusMessage::Trickle {
                candidate: TrickleCandidate::Completed { completed: true },
                ..
            }
        ));
    }

    #[test]
    fn test_parse_room_error_and_unknown() {
        let msg = JanusMessage::from_json(
            r#"{"janus":"event","plugindata":{"plugin":"janus.plugin.videoroom","data":{"videoroom":"event","error_code":426,"error":"No such room"}}}"#,
        )
        .unwrap();
        assert_eq!(msg.room_error().unwrap(), "No such room (426)");

        let msg = JanusMessage::from_json(r#"{"janus":"slowlink","sender":1}"#).unwrap();
        assert_eq!(msg, JanusMessage::Unknown);
    }

    #[test]
    fn test_departed_feed() {
        let msg = JanusMessage::from_json(
            r#"{"janus":"event","plugindata":{"plugin":"janus.plugin.videoroom","data":{"videoroom":"event","unpublished":5}}}"#,
        )
        .unwrap();
        assert_eq!(msg.departed_feed(), Some(5));
    }
}
