//! Typed model for the video recorder's REST and websocket control API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The overall mode of the recorder's transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    /// Displaying the live input feed.
    #[default]
    InputPreview,
    /// Recording the live input feed.
    InputRecord,
    /// Displaying a recorded clip.
    Output,
}

/// `PUT /transports/0` request body to set the transport mode.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportModeRequest {
    pub mode: TransportMode,
}

/// `POST /transports/0/record` request body to start a recording.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordRequest {
    /// Optional name for the clip being recorded.
    #[serde(rename = "clipName", default, skip_serializing_if = "Option::is_none")]
    pub clip_name: Option<String>,
}

/// The current mode of the playback interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackType {
    Play,
    #[default]
    Jog,
    Shuttle,
    Var,
}

/// `PUT /transports/0/playback` request and websocket body for playback state.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    #[serde(rename = "type")]
    pub playback_type: PlaybackType,
    #[serde(rename = "loop")]
    pub loop_enabled: bool,
    /// Whether to play a single clip or the whole timeline.
    pub single_clip: bool,
    /// Playback speed, where 1.0 is normal speed and 0 is paused.
    pub speed: f64,
    /// Playback position on the timeline, in frames from the timeline start.
    pub position: u64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            playback_type: PlaybackType::Jog,
            loop_enabled: false,
            single_clip: true,
            speed: 0.0,
            position: 0,
        }
    }
}

/// Codec format for a recorded clip.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecFormat {
    /// Codec used for the clip, e.g. "H.264".
    pub codec: String,
    /// Container format used for the clip, e.g. "MOV".
    pub container: String,
}

/// Video format for a recorded clip.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    /// Name of the video format, e.g. "1920x1080p60".
    pub name: String,
    pub frame_rate: f64,
    pub height: u32,
    pub width: u32,
    pub interlaced: bool,
}

/// Information about a recorded clip.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    /// Unique ID identifying the clip.
    pub clip_unique_id: u32,
    /// File path to the clip on the recorder.
    pub file_path: String,
    /// Size of the clip file in bytes.
    pub file_size: u64,
    pub codec_format: CodecFormat,
    pub video_format: VideoFormat,
    /// Start timecode in HH:MM:SS:FF format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timecode: Option<String>,
    /// Duration in HH:MM:SS:FF format.
    pub duration_timecode: String,
    /// Total number of frames in the clip.
    pub frame_count: u64,
}

/// `GET /transports/0/clip` response. During recording the clip record is
/// only partially populated; the ID and frame count appear once the clip
/// has been finalized on disk.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct CurrentClipResponse {
    #[serde(default)]
    pub clip: Option<CurrentClip>,
}

/// Possibly partial clip record returned while a recording finalizes.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentClip {
    #[serde(default)]
    pub clip_unique_id: Option<u32>,
    #[serde(default)]
    pub frame_count: Option<u64>,
}

impl CurrentClip {
    /// A clip is finalized once the recorder has assigned its ID and frame count.
    pub fn finalized_id(&self) -> Option<u32> {
        match (self.clip_unique_id, self.frame_count) {
            (Some(id), Some(_)) => Some(id),
            _ => None,
        }
    }
}

/// `GET /clips` response.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ClipList {
    #[serde(default)]
    pub clips: Vec<Clip>,
}

/// A clip's placement on the playback timeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineClip {
    pub clip_unique_id: u32,
    /// Number of frames of the clip present on the timeline.
    pub frame_count: u64,
    pub duration_timecode: String,
    /// First frame of the clip included on the timeline.
    pub clip_in: u64,
    pub in_timecode: String,
    /// Timeline frame where the clip starts.
    pub timeline_in: u64,
    pub timeline_in_timecode: String,
}

/// `/timelines/0` property value.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TimelineClipList {
    #[serde(default)]
    pub clips: Vec<TimelineClip>,
}

/// Data about one media storage device on the recorder.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaWorkingSetEntry {
    pub index: u32,
    /// Whether this media is the active disk.
    pub active_disk: bool,
    pub volume: String,
    pub device_name: String,
    /// Remaining record time on the media in seconds.
    pub remaining_record_time: u64,
    /// Total space in bytes.
    pub total_space: u64,
    /// Remaining space in bytes.
    pub remaining_space: u64,
    pub clip_count: u32,
}

/// `/media/workingset` property value.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct MediaWorkingSet {
    pub size: u32,
    /// Slots may be empty when no media is inserted.
    #[serde(default)]
    pub workingset: Vec<Option<MediaWorkingSetEntry>>,
}

/// Outbound websocket message.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Request {
        data: RequestData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<i64>,
    },
}

/// Request payload for a websocket request message.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RequestData {
    Subscribe { properties: Vec<String> },
    Unsubscribe { properties: Vec<String> },
}

/// Inbound websocket message, tagged by `type`.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Response {
        data: ResponseData,
        #[serde(default)]
        id: Option<i64>,
    },
    Event {
        data: EventData,
    },
}

/// Response payload, tagged by the original request action.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ResponseData {
    Subscribe {
        properties: Vec<String>,
        success: bool,
        /// Current values for the subscribed properties.
        #[serde(default)]
        values: HashMap<String, serde_json::Value>,
    },
    Unsubscribe {
        properties: Vec<String>,
        success: bool,
    },
}

/// Event payload, tagged by `action`.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action")]
pub enum EventData {
    #[serde(rename = "propertyValueChanged")]
    PropertyValueChanged {
        property: String,
        value: serde_json::Value,
    },
    #[serde(rename = "websocketOpened")]
    WebsocketOpened,
}
