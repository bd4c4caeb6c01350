//! Reconnecting client session for the video recorder.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite;
use tracing::{debug, error, info, warn};

use crate::model::{
    Clip, ClipList, CurrentClipResponse, EventData, InboundMessage, MediaWorkingSet,
    MediaWorkingSetEntry, OutboundMessage, PlaybackState, PlaybackType, RecordRequest,
    RequestData, ResponseData, TimelineClip, TimelineClipList, TransportMode,
    TransportModeRequest,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Properties subscribed on every recorder session.
const SUBSCRIBED_PROPERTIES: [&str; 4] = [
    "/transports/0",
    "/transports/0/playback",
    "/timelines/0",
    "/media/workingset",
];

/// Settings for the recorder client.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HyperdeckClientSettings {
    /// Recorder address.
    pub address: String,
    /// Interval between clip-finalization polls after a stop, in milliseconds.
    pub finalization_poll_interval_ms: u64,
    /// How long to wait for clip finalization before giving up, in milliseconds.
    pub finalization_timeout_ms: u64,
}

impl Default for HyperdeckClientSettings {
    fn default() -> Self {
        Self {
            address: "localhost:8001".to_string(),
            finalization_poll_interval_ms: 250,
            finalization_timeout_ms: 5000,
        }
    }
}

/// Error from a recorder command.
#[derive(Debug, thiserror::Error)]
pub enum HyperdeckError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("clip {0} not found on the recorder")]
    UnknownClip(u32),
    #[error("timed out waiting for clip finalization")]
    FinalizationTimeout,
}

#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    Ws(#[from] tungstenite::Error),
    #[error("recorder property subscription failed")]
    SubscriptionFailed,
}

/// Notifiers that can be subscribed by the rest of the system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HyperdeckNotifier {
    ConnectionStateUpdated,
    TransportModeUpdated,
    PlaybackStateUpdated,
    /// The set of known clip IDs changed.
    ClipListUpdated,
    DiskSpaceUpdated,
}

type NotifyHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Observable recorder state, written only by the session task.
#[derive(Clone, Debug, Default)]
pub struct HyperdeckState {
    pub connected: bool,
    pub transport_mode: TransportMode,
    pub playback: PlaybackState,
    /// Known clips by clip ID.
    pub clips: HashMap<u32, Clip>,
    /// Timeline placement by clip ID.
    pub timeline: HashMap<u32, TimelineClip>,
    /// Media devices currently in the working set.
    pub media: Vec<MediaWorkingSetEntry>,
}

impl HyperdeckState {
    fn known_clip_ids(&self) -> BTreeSet<u32> {
        self.clips
            .keys()
            .chain(self.timeline.keys())
            .copied()
            .collect()
    }
}

/// Summary of the active media device's capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkingSetSummary {
    pub remaining_record_time: u64,
    pub total_space: u64,
    pub remaining_space: u64,
}

/// Client for driving the video recorder.
pub struct HyperdeckClient {
    settings: HyperdeckClientSettings,
    http: reqwest::Client,
    state: RwLock<HyperdeckState>,
    subscribers: Mutex<HashMap<HyperdeckNotifier, Vec<NotifyHandler>>>,
}

impl HyperdeckClient {
    pub fn new(settings: HyperdeckClientSettings) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("failed to build recorder HTTP client");
        Self {
            settings,
            http,
            state: RwLock::new(HyperdeckState::default()),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe a handler to a specific recorder notifier.
    pub fn subscribe<F>(&self, notifier: HyperdeckNotifier, handler: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .expect("recorder subscriber lock poisoned")
            .entry(notifier)
            .or_default()
            .push(Arc::new(handler));
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, HyperdeckState> {
        self.state.read().expect("recorder state lock poisoned")
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, HyperdeckState> {
        self.state.write().expect("recorder state lock poisoned")
    }

    /// Whether the client is currently connected to the recorder.
    pub fn connected(&self) -> bool {
        self.read_state().connected
    }

    /// Whether the recorder is currently capturing the live input.
    pub fn recording(&self) -> bool {
        self.read_state().transport_mode == TransportMode::InputRecord
    }

    pub fn transport_mode(&self) -> TransportMode {
        self.read_state().transport_mode
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.read_state().playback
    }

    /// A clip is playable when the recorder both lists it and places it on
    /// the playback timeline.
    pub fn has_playable_clip(&self, clip_id: u32) -> bool {
        let state = self.read_state();
        state.clips.contains_key(&clip_id) && state.timeline.contains_key(&clip_id)
    }

    /// Current playback time within the given clip, in seconds, clamped to
    /// `[0, clip_duration)`.
    pub fn current_time_within_clip(&self, clip_id: u32) -> Option<f64> {
        let state = self.read_state();
        let clip = state.clips.get(&clip_id)?;
        let timeline = state.timeline.get(&clip_id)?;
        let frame_rate = clip.video_format.frame_rate;
        if frame_rate <= 0.0 || timeline.frame_count == 0 {
            return Some(0.0);
        }
        let frames_in = state
            .playback
            .position
            .saturating_sub(timeline.timeline_in)
            .min(timeline.frame_count - 1);
        Some(frames_in as f64 / frame_rate)
    }

    /// Capacity data for the active media device.
    pub fn active_working_set(&self) -> Option<WorkingSetSummary> {
        let state = self.read_state();
        state
            .media
            .iter()
            .find(|entry| entry.active_disk)
            .map(|entry| WorkingSetSummary {
                remaining_record_time: entry.remaining_record_time,
                total_space: entry.total_space,
                remaining_space: entry.remaining_space,
            })
    }

    /// Main entrypoint for the recorder client. Reconnects after any failure.
    pub async fn run(&self) {
        info!("starting recorder client");
        loop {
            match self.run_session().await {
                Ok(()) => {}
                Err(e) => error!(error = %e, "recorder client error"),
            }
            info!("reconnecting to recorder in 3 seconds");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn run_session(&self) -> Result<(), SessionError> {
        let endpoint = format!(
            "ws://{}/control/api/v1/event/websocket",
            self.settings.address
        );
        let (mut websocket, _) = tokio_tungstenite::connect_async(&endpoint).await?;

        info!("recorder connection established");
        self.write_state().connected = true;
        self.notify(HyperdeckNotifier::ConnectionStateUpdated).await;

        let result = async {
            self.refresh_clip_list().await?;

            let subscribe = OutboundMessage::Request {
                data: RequestData::Subscribe {
                    properties: SUBSCRIBED_PROPERTIES
                        .iter()
                        .map(|p| p.to_string())
                        .collect(),
                },
                id: None,
            };
            let text = serde_json::to_string(&subscribe).expect("subscribe message serializes");
            websocket.send(tungstenite::Message::text(text)).await?;

            while let Some(message) = websocket.next().await {
                match message? {
                    msg @ (tungstenite::Message::Text(_) | tungstenite::Message::Binary(_)) => {
                        if let Ok(text) = msg.to_text() {
                            self.handle_recorder_message(text).await?;
                        }
                    }
                    tungstenite::Message::Close(_) => break,
                    _ => {}
                }
            }
            Ok(())
        }
        .await;

        self.write_state().connected = false;
        info!("recorder connection closed");
        self.notify(HyperdeckNotifier::ConnectionStateUpdated).await;
        result
    }

    async fn handle_recorder_message(&self, raw: &str) -> Result<(), SessionError> {
        let message: InboundMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "malformed message from recorder");
                return Ok(());
            }
        };

        match message {
            InboundMessage::Response {
                data:
                    ResponseData::Subscribe {
                        properties,
                        success,
                        values,
                    },
                ..
            } => {
                if !success {
                    return Err(SessionError::SubscriptionFailed);
                }
                info!(?properties, "subscribed to recorder properties");
                for (property, value) in values {
                    self.handle_property_change(&property, value).await;
                }
            }
            InboundMessage::Response {
                data: ResponseData::Unsubscribe { .. },
                ..
            } => {}
            InboundMessage::Event {
                data: EventData::PropertyValueChanged { property, value },
            } => {
                debug!(property = %property, "recorder property changed");
                self.handle_property_change(&property, value).await;
            }
            InboundMessage::Event {
                data: EventData::WebsocketOpened,
            } => {}
        }
        Ok(())
    }

    /// Apply a property update received from the recorder websocket.
    async fn handle_property_change(&self, property: &str, value: serde_json::Value) {
        match property {
            "/transports/0" => {
                if let Some(request) = validate::<TransportModeRequest>(property, value) {
                    self.write_state().transport_mode = request.mode;
                    self.notify(HyperdeckNotifier::TransportModeUpdated).await;
                }
            }
            "/transports/0/playback" => {
                if let Some(playback) = validate::<PlaybackState>(property, value) {
                    self.write_state().playback = playback;
                    self.notify(HyperdeckNotifier::PlaybackStateUpdated).await;
                }
            }
            "/timelines/0" => {
                if let Some(timeline) = validate::<TimelineClipList>(property, value) {
                    let changed = {
                        let mut state = self.write_state();
                        let before = state.known_clip_ids();
                        state.timeline = timeline
                            .clips
                            .into_iter()
                            .map(|clip| (clip.clip_unique_id, clip))
                            .collect();
                        state.known_clip_ids() != before
                    };
                    if changed {
                        self.notify(HyperdeckNotifier::ClipListUpdated).await;
                    }
                }
            }
            "/media/workingset" => {
                if let Some(set) = validate::<MediaWorkingSet>(property, value) {
                    self.write_state().media = set.workingset.into_iter().flatten().collect();
                    self.notify(HyperdeckNotifier::DiskSpaceUpdated).await;
                }
            }
            other => {
                warn!(property = other, "update for unknown recorder property");
            }
        }
    }

    fn base_url(&self) -> String {
        format!("http://{}/control/api/v1", self.settings.address)
    }

    /// Fetch the full clip list from the recorder.
    async fn refresh_clip_list(&self) -> Result<(), SessionError> {
        let clip_list: ClipList = self
            .http
            .get(format!("{}/clips", self.base_url()))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!(count = clip_list.clips.len(), "retrieved clip list");

        let changed = {
            let mut state = self.write_state();
            let before = state.known_clip_ids();
            state.clips = clip_list
                .clips
                .into_iter()
                .map(|clip| (clip.clip_unique_id, clip))
                .collect();
            state.known_clip_ids() != before
        };
        if changed {
            self.notify(HyperdeckNotifier::ClipListUpdated).await;
        }
        Ok(())
    }

    /// Start recording a new clip.
    pub async fn start_recording(&self, clip_name: &str) -> Result<(), HyperdeckError> {
        let request = RecordRequest {
            clip_name: Some(clip_name.to_string()),
        };
        self.http
            .post(format!("{}/transports/0/record", self.base_url()))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        info!(clip_name, "started recording");
        Ok(())
    }

    /// Stop the current recording and wait for the clip to finalize.
    ///
    /// Returns the finalized clip's ID. The recorder takes a moment to
    /// finish writing the clip after a stop; this polls the current-clip
    /// endpoint until the ID and frame count are populated, giving up with
    /// [`HyperdeckError::FinalizationTimeout`] after the configured limit.
    pub async fn stop_recording(&self) -> Result<u32, HyperdeckError> {
        self.http
            .post(format!("{}/transports/0/stop", self.base_url()))
            .send()
            .await?
            .error_for_status()?;
        info!("stopped recording, waiting for clip finalization");

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.settings.finalization_timeout_ms);
        loop {
            let response: CurrentClipResponse = self
                .http
                .get(format!("{}/transports/0/clip", self.base_url()))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            if let Some(clip_id) = response.clip.as_ref().and_then(|clip| clip.finalized_id()) {
                info!(clip_id, "recording finalized");
                if let Err(e) = self.refresh_clip_list().await {
                    error!(error = %e, "failed to refresh clip list after stop");
                }
                return Ok(clip_id);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(HyperdeckError::FinalizationTimeout);
            }
            tokio::time::sleep(Duration::from_millis(
                self.settings.finalization_poll_interval_ms,
            ))
            .await;
        }
    }

    /// Jump playback to a specific time within a clip.
    pub async fn warp_to_clip(&self, clip_id: u32, time_sec: f64) -> Result<(), HyperdeckError> {
        let position = {
            let state = self.read_state();
            let clip = state
                .clips
                .get(&clip_id)
                .ok_or(HyperdeckError::UnknownClip(clip_id))?;
            let frame = (time_sec.max(0.0) * clip.video_format.frame_rate).floor() as u64;
            match state.timeline.get(&clip_id) {
                Some(timeline) => timeline_position(timeline, frame),
                None => {
                    error!(clip_id, "clip missing from timeline, warping to timeline start");
                    0
                }
            }
        };

        let request = PlaybackState {
            playback_type: PlaybackType::Jog,
            loop_enabled: false,
            single_clip: true,
            speed: 0.0,
            position,
        };
        self.http
            .put(format!("{}/transports/0/playback", self.base_url()))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Switch the recorder output to the live input feed.
    pub async fn show_live_view(&self) -> Result<(), HyperdeckError> {
        let request = TransportModeRequest {
            mode: TransportMode::InputPreview,
        };
        self.http
            .put(format!("{}/transports/0", self.base_url()))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn notify(&self, notifier: HyperdeckNotifier) {
        debug!(?notifier, "recorder notification");
        let handlers: Vec<NotifyHandler> = {
            let subscribers = self
                .subscribers
                .lock()
                .expect("recorder subscriber lock poisoned");
            subscribers.get(&notifier).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler().await;
        }
    }
}

fn validate<T: serde::de::DeserializeOwned>(property: &str, value: serde_json::Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            error!(property, error = %e, "malformed recorder property value");
            None
        }
    }
}

/// Timeline frame for a clip-relative frame, clamped to the clip's extent.
fn timeline_position(timeline: &TimelineClip, frame: u64) -> u64 {
    let last_frame = timeline.clip_in + timeline.frame_count.saturating_sub(1);
    let clamped = frame.max(timeline.clip_in).min(last_frame);
    timeline.timeline_in + (clamped - timeline.clip_in)
}
