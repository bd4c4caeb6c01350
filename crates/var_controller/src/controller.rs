//! The central VAR state machine.
//!
//! Turns arena lifecycle notifications into recorder commands and durable
//! match records, mirrors referee fouls and VAR review requests into each
//! match's event timeline, and publishes observable state to the operator
//! bus. All mutable state is serialized by a single mutex; every lifecycle
//! and command handler acquires it for the duration of its critical section.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use var_arena::model::{MatchWithResultAndSummary, RealtimeScoreMessage};
use var_arena::{ArenaClient, ArenaNotifier};
use var_db::model::{Alliance, EventType, MatchEvent, RecordedMatch};
use var_db::Db;
use var_hyperdeck::model::TransportMode;
use var_hyperdeck::{HyperdeckClient, HyperdeckNotifier};
use var_web::Bus;

use crate::commands::{
    AddVarReviewCommand, ExitReviewCommand, LoadMatchCommand, UpdateEventCommand,
    WarpToTimeCommand,
};

/// Tunables for the VAR state machine.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct VarSettings {
    /// Seconds past the end of auto to place the auto scoring review point.
    pub auto_scoring_delay: f64,
    /// Seconds past the end of the match to place the endgame review point.
    pub endgame_scoring_delay: f64,
    /// Extra seconds of video captured after the endgame review point.
    pub recording_extra_time: f64,
    /// Operator reaction time subtracted when placing a live VAR review.
    pub var_reaction_time: f64,
}

impl Default for VarSettings {
    fn default() -> Self {
        Self {
            auto_scoring_delay: 3.0,
            endgame_scoring_delay: 3.0,
            recording_extra_time: 2.0,
            var_reaction_time: 0.0,
        }
    }
}

/// Top-level mode of the controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ControllerState {
    #[default]
    Idle,
    Recording,
    ReviewingCurrentMatch,
    ReviewingHistoricalMatch,
}

/// One entry in the observable match list.
#[derive(Clone, Debug, Serialize)]
pub struct MatchListEntry {
    /// VAR server data for the match.
    pub var_data: RecordedMatch,
    /// Arena data associated with the match, if available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arena_data: Option<MatchWithResultAndSummary>,
    /// Whether the match clip is available for playback.
    pub clip_available: bool,
}

/// Payload of the `controller_status` topic.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ControllerStatus {
    pub selected_match_id: Option<String>,
    /// Whether a match is currently being recorded.
    pub recording: bool,
    /// False only while reviewing a historical match.
    pub realtime_data: bool,
}

/// Payload of the `hyperdeck_status` topic.
#[derive(Clone, Debug, Serialize)]
pub struct HyperdeckStatus {
    pub transport_mode: TransportMode,
    pub playing: bool,
    /// Current position within the selected match's clip, in seconds.
    pub clip_time: f64,
    pub remaining_record_time: u64,
    pub total_space: u64,
    pub remaining_space: u64,
}

#[derive(Default)]
struct ControllerInner {
    state: ControllerState,
    matches: HashMap<String, MatchListEntry>,
    current_match: Option<String>,
}

/// Snapshot mirror read by the bus topic emitters. Refreshed under the
/// controller lock before every publish so emitters never need the lock.
#[derive(Default)]
struct SharedView {
    status: ControllerStatus,
    match_list: BTreeMap<String, MatchListEntry>,
    recording_start: Option<DateTime<Utc>>,
    current_clip_id: Option<u32>,
}

/// The VAR coordinator.
pub struct Controller {
    settings: VarSettings,
    db: Db,
    arena: Arc<ArenaClient>,
    hyperdeck: Arc<HyperdeckClient>,
    bus: Arc<Bus>,
    inner: Mutex<ControllerInner>,
    shared: RwLock<SharedView>,
}

impl Controller {
    /// Build the controller, load persisted matches, and wire it up to the
    /// arena client, recorder client, and operator bus.
    pub fn new(
        settings: VarSettings,
        db: Db,
        arena: Arc<ArenaClient>,
        hyperdeck: Arc<HyperdeckClient>,
        bus: Arc<Bus>,
    ) -> Arc<Self> {
        let matches: HashMap<String, MatchListEntry> = db
            .load_all_matches()
            .into_iter()
            .map(|(id, var_data)| {
                (
                    id,
                    MatchListEntry {
                        var_data,
                        arena_data: None,
                        clip_available: false,
                    },
                )
            })
            .collect();
        info!(count = matches.len(), "loaded recorded matches");

        let controller = Arc::new(Self {
            settings,
            db,
            arena,
            hyperdeck,
            bus,
            inner: Mutex::new(ControllerInner {
                state: ControllerState::Idle,
                matches,
                current_match: None,
            }),
            shared: RwLock::new(SharedView::default()),
        });

        // Seed the emitter mirror before any client can subscribe
        if let Ok(inner) = controller.inner.try_lock() {
            controller.sync_shared(&inner);
        }

        controller.register_topics();
        controller.register_commands();
        controller.register_arena_handlers();
        controller.register_hyperdeck_handlers();
        controller
    }

    fn register_topics(self: &Arc<Self>) {
        let ctrl = self.clone();
        self.bus.add_event_type("controller_status", move || {
            serde_json::to_value(&ctrl.shared().status).unwrap_or_default()
        });
        let ctrl = self.clone();
        self.bus.add_event_type("match_list", move || {
            serde_json::to_value(&ctrl.shared().match_list).unwrap_or_default()
        });
        let ctrl = self.clone();
        self.bus.add_event_type("current_match_time", move || {
            json!({"time": ctrl.current_match_time()})
        });
        let arena = self.arena.clone();
        self.bus.add_event_type("match_timing", move || {
            serde_json::to_value(arena.state().match_timing).unwrap_or_default()
        });
        let arena = self.arena.clone();
        self.bus.add_event_type("current_match_data", move || {
            serde_json::to_value(arena.state().match_data).unwrap_or_default()
        });
        let arena = self.arena.clone();
        self.bus.add_event_type("realtime_score", move || {
            serde_json::to_value(arena.state().realtime_score).unwrap_or_default()
        });
        let arena = self.arena.clone();
        self.bus.add_event_type("arena_connection", move || {
            json!({"connected": arena.connected()})
        });
        let hyperdeck = self.hyperdeck.clone();
        self.bus.add_event_type("hyperdeck_connection", move || {
            json!({"connected": hyperdeck.connected()})
        });
        let ctrl = self.clone();
        self.bus.add_event_type("hyperdeck_status", move || {
            serde_json::to_value(ctrl.hyperdeck_status()).unwrap_or_default()
        });
    }

    fn register_commands(self: &Arc<Self>) {
        let ctrl = self.clone();
        self.bus
            .add_command_handler("load_match", move |cmd: LoadMatchCommand| {
                let ctrl = ctrl.clone();
                async move { ctrl.handle_load_match(cmd).await }.boxed()
            });
        let ctrl = self.clone();
        self.bus
            .add_command_handler("warp_to_time", move |cmd: WarpToTimeCommand| {
                let ctrl = ctrl.clone();
                async move { ctrl.handle_warp_to_time(cmd).await }.boxed()
            });
        let ctrl = self.clone();
        self.bus
            .add_command_handler("add_var_review", move |cmd: AddVarReviewCommand| {
                let ctrl = ctrl.clone();
                async move { ctrl.handle_add_var_review(cmd).await }.boxed()
            });
        let ctrl = self.clone();
        self.bus
            .add_command_handler("exit_review", move |cmd: ExitReviewCommand| {
                let ctrl = ctrl.clone();
                async move { ctrl.handle_exit_review(cmd).await }.boxed()
            });
        let ctrl = self.clone();
        self.bus
            .add_command_handler("update_event", move |cmd: UpdateEventCommand| {
                let ctrl = ctrl.clone();
                async move { ctrl.handle_update_event(cmd).await }.boxed()
            });
    }

    fn register_arena_handlers(self: &Arc<Self>) {
        macro_rules! on_arena {
            ($notifier:expr, $method:ident) => {{
                let ctrl = self.clone();
                self.arena.subscribe($notifier, move || {
                    let ctrl = ctrl.clone();
                    async move { ctrl.$method().await }.boxed()
                });
            }};
        }

        on_arena!(ArenaNotifier::MatchStarted, handle_match_started);
        on_arena!(ArenaNotifier::AutoPeriodEnded, handle_auto_period_ended);
        on_arena!(ArenaNotifier::MatchEnded, handle_match_ended);
        on_arena!(
            ArenaNotifier::MatchCommittedOrDiscarded,
            handle_match_committed
        );
        on_arena!(
            ArenaNotifier::HistoricalScoresUpdated,
            handle_historical_scores
        );
        on_arena!(ArenaNotifier::RealtimeScoreUpdated, handle_realtime_score);

        let ctrl = self.clone();
        self.arena
            .subscribe(ArenaNotifier::ConnectionStateUpdated, move || {
                let ctrl = ctrl.clone();
                async move { ctrl.bus.notify("arena_connection", None) }.boxed()
            });
        let ctrl = self.clone();
        self.arena
            .subscribe(ArenaNotifier::MatchTimingUpdated, move || {
                let ctrl = ctrl.clone();
                async move { ctrl.bus.notify("match_timing", None) }.boxed()
            });
        let ctrl = self.clone();
        self.arena.subscribe(ArenaNotifier::MatchTimeUpdated, move || {
            let ctrl = ctrl.clone();
            async move { ctrl.bus.notify("current_match_time", None) }.boxed()
        });
        let ctrl = self.clone();
        self.arena.subscribe(ArenaNotifier::MatchDataUpdated, move || {
            let ctrl = ctrl.clone();
            async move { ctrl.bus.notify("current_match_data", None) }.boxed()
        });
    }

    fn register_hyperdeck_handlers(self: &Arc<Self>) {
        let ctrl = self.clone();
        self.hyperdeck
            .subscribe(HyperdeckNotifier::ConnectionStateUpdated, move || {
                let ctrl = ctrl.clone();
                async move {
                    ctrl.bus.notify("hyperdeck_connection", None);
                    ctrl.bus.notify("hyperdeck_status", None);
                }
                .boxed()
            });
        for notifier in [
            HyperdeckNotifier::TransportModeUpdated,
            HyperdeckNotifier::PlaybackStateUpdated,
            HyperdeckNotifier::DiskSpaceUpdated,
        ] {
            let ctrl = self.clone();
            self.hyperdeck.subscribe(notifier, move || {
                let ctrl = ctrl.clone();
                async move { ctrl.bus.notify("hyperdeck_status", None) }.boxed()
            });
        }
        let ctrl = self.clone();
        self.hyperdeck
            .subscribe(HyperdeckNotifier::ClipListUpdated, move || {
                let ctrl = ctrl.clone();
                async move { ctrl.handle_clip_list_updated().await }.boxed()
            });
    }

    fn shared(&self) -> std::sync::RwLockReadGuard<'_, SharedView> {
        self.shared.read().expect("controller shared lock poisoned")
    }

    /// Rebuild the emitter mirror from the authoritative state.
    fn sync_shared(&self, inner: &ControllerInner) {
        let current = inner
            .current_match
            .as_ref()
            .and_then(|id| inner.matches.get(id));
        let mut shared = self.shared.write().expect("controller shared lock poisoned");
        shared.status = ControllerStatus {
            selected_match_id: inner.current_match.clone(),
            recording: inner.state == ControllerState::Recording,
            realtime_data: inner.state != ControllerState::ReviewingHistoricalMatch,
        };
        shared.match_list = inner
            .matches
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        shared.recording_start = current.map(|entry| entry.var_data.recording_start_time);
        shared.current_clip_id = current.and_then(|entry| entry.var_data.clip_id);
    }

    /// Refresh the emitter mirror and publish the given topics.
    fn publish(&self, inner: &ControllerInner, topics: &[&str]) {
        self.sync_shared(inner);
        for topic in topics {
            self.bus.notify(topic, None);
        }
    }

    /// Seconds elapsed since the current match's recording started.
    pub fn current_match_time(&self) -> f64 {
        let shared = self.shared();
        match shared.recording_start {
            Some(start) => seconds_since(start),
            None => 0.0,
        }
    }

    fn hyperdeck_status(&self) -> HyperdeckStatus {
        let playback = self.hyperdeck.playback_state();
        let clip_time = self
            .shared()
            .current_clip_id
            .and_then(|clip_id| self.hyperdeck.current_time_within_clip(clip_id))
            .unwrap_or(0.0);
        let working_set = self.hyperdeck.active_working_set().unwrap_or_default();
        HyperdeckStatus {
            transport_mode: self.hyperdeck.transport_mode(),
            playing: playback.speed != 0.0,
            clip_time,
            remaining_record_time: working_set.remaining_record_time,
            total_space: working_set.total_space,
            remaining_space: working_set.remaining_space,
        }
    }

    fn persist(&self, record: &RecordedMatch) {
        if let Err(e) = self.db.save_match(record) {
            error!(var_id = %record.var_id, error = %e, "failed to persist match");
        }
    }

    // ------------------------------------------------------------------
    // Arena lifecycle handlers
    // ------------------------------------------------------------------

    async fn handle_match_started(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.state != ControllerState::Idle {
            warn!(state = ?inner.state, "match started while not idle, starting a new recording");
        }

        let arena_state = self.arena.state();
        let match_data = &arena_state.match_data;
        let var_id = allocate_match_id(
            &inner.matches,
            &match_data.match_info.short_name,
            match_data.is_replay,
        );
        info!(var_id = %var_id, "match started, beginning recording");

        if let Err(e) = self.hyperdeck.start_recording(&var_id).await {
            error!(error = %e, "failed to start recording");
        }

        let now = Utc::now();
        let mut teams = BTreeMap::new();
        teams.insert(
            Alliance::Red,
            [
                match_data.match_info.red1,
                match_data.match_info.red2,
                match_data.match_info.red3,
            ],
        );
        teams.insert(
            Alliance::Blue,
            [
                match_data.match_info.blue1,
                match_data.match_info.blue2,
                match_data.match_info.blue3,
            ],
        );
        let record = RecordedMatch {
            var_id: var_id.clone(),
            arena_match_id: match_data.match_info.id,
            clip_file_name: var_id.clone(),
            clip_id: None,
            match_start_time: now,
            recording_start_time: now,
            teams,
            events: Vec::new(),
        };
        self.persist(&record);

        let arena_data = arena_state.match_results.get(&record.arena_match_id).cloned();
        inner.matches.insert(
            var_id.clone(),
            MatchListEntry {
                var_data: record,
                arena_data,
                clip_available: false,
            },
        );
        inner.current_match = Some(var_id);
        inner.state = ControllerState::Recording;

        self.publish(
            &inner,
            &["controller_status", "match_list", "current_match_time"],
        );
    }

    async fn handle_auto_period_ended(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.state != ControllerState::Recording {
            return;
        }
        let delay = self.settings.auto_scoring_delay;
        if let Some(entry) = current_entry(&mut inner) {
            let time = seconds_since(entry.var_data.recording_start_time) + delay;
            entry
                .var_data
                .events
                .push(new_event(EventType::AutoScoring, time));
            debug!(time, "placed auto scoring review point");
            let record = entry.var_data.clone();
            self.persist(&record);
            self.publish(&inner, &["match_list"]);
        }
    }

    async fn handle_match_ended(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.state != ControllerState::Recording {
            return;
        }
        let delay = self.settings.endgame_scoring_delay;
        let Some(entry) = current_entry(&mut inner) else {
            return;
        };
        let time = seconds_since(entry.var_data.recording_start_time) + delay;
        entry
            .var_data
            .events
            .push(new_event(EventType::EndgameScoring, time));
        debug!(time, "placed endgame scoring review point");
        let record = entry.var_data.clone();
        let var_id = record.var_id.clone();
        self.persist(&record);
        self.publish(&inner, &["match_list"]);
        drop(inner);

        // Keep recording long enough to capture the endgame review point
        let stop_after =
            self.settings.endgame_scoring_delay + self.settings.recording_extra_time;
        let ctrl = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(stop_after.max(0.0))).await;
            ctrl.finish_recording(var_id).await;
        });
    }

    /// Delayed-stop task body: stop the recorder and move into review of the
    /// just-recorded match. A commit may have raced us and unloaded the
    /// match, in which case there is nothing left to do.
    async fn finish_recording(self: Arc<Self>, var_id: String) {
        let mut inner = self.inner.lock().await;
        if inner.state != ControllerState::Recording
            || inner.current_match.as_deref() != Some(var_id.as_str())
        {
            debug!(var_id = %var_id, "stale delayed stop, skipping");
            return;
        }

        self.attach_clip(&mut inner, &var_id).await;
        inner.state = ControllerState::ReviewingCurrentMatch;

        // Jump straight to the auto scoring review point
        if let Some(entry) = inner.matches.get(&var_id) {
            if let (Some(clip_id), true) = (entry.var_data.clip_id, entry.clip_available) {
                let time = entry
                    .var_data
                    .events
                    .iter()
                    .find(|event| event.event_type == EventType::AutoScoring)
                    .map(|event| event.time)
                    .unwrap_or(0.0);
                if let Err(e) = self.hyperdeck.warp_to_clip(clip_id, time).await {
                    error!(error = %e, "failed to warp to review point");
                }
            }
        }

        self.publish(
            &inner,
            &["controller_status", "match_list", "hyperdeck_status"],
        );
    }

    /// Stop the recorder and attach the finalized clip ID to the match.
    /// The match record is persisted either way; on a finalization timeout
    /// the clip ID simply stays unset.
    async fn attach_clip(&self, inner: &mut ControllerInner, var_id: &str) {
        match self.hyperdeck.stop_recording().await {
            Ok(clip_id) => {
                if let Some(entry) = inner.matches.get_mut(var_id) {
                    entry.var_data.clip_id = Some(clip_id);
                    entry.clip_available = self.hyperdeck.has_playable_clip(clip_id);
                    info!(var_id = %var_id, clip_id, "recording attached to match");
                }
            }
            Err(e) => {
                error!(var_id = %var_id, error = %e, "failed to finalize recording");
            }
        }
        if let Some(entry) = inner.matches.get(var_id) {
            self.persist(&entry.var_data);
        }
    }

    async fn handle_match_committed(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;

        // The arena refreshed its result cache just before this notification
        let results = self.arena.state().match_results;
        for entry in inner.matches.values_mut() {
            entry.arena_data = results.get(&entry.var_data.arena_match_id).cloned();
        }

        match inner.state {
            ControllerState::Recording => {
                // Commit arrived before the delayed stop fired
                if let Some(var_id) = inner.current_match.clone() {
                    self.attach_clip(&mut inner, &var_id).await;
                }
                self.unload_current(&mut inner).await;
            }
            ControllerState::ReviewingCurrentMatch => {
                if let Some(entry) = current_entry(&mut inner) {
                    let record = entry.var_data.clone();
                    self.persist(&record);
                }
                self.unload_current(&mut inner).await;
            }
            ControllerState::Idle | ControllerState::ReviewingHistoricalMatch => {}
        }

        self.publish(&inner, &["controller_status", "match_list"]);
    }

    /// Drop the current match selection and return the recorder to live.
    async fn unload_current(&self, inner: &mut ControllerInner) {
        inner.current_match = None;
        inner.state = ControllerState::Idle;
        if let Err(e) = self.hyperdeck.show_live_view().await {
            error!(error = %e, "failed to switch recorder to live view");
        }
    }

    async fn handle_historical_scores(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;
        let results = self.arena.state().match_results;
        for entry in inner.matches.values_mut() {
            entry.arena_data = results.get(&entry.var_data.arena_match_id).cloned();
        }
        self.publish(&inner, &["match_list"]);
    }

    async fn handle_realtime_score(self: Arc<Self>) {
        self.bus.notify("realtime_score", None);

        let mut inner = self.inner.lock().await;
        if inner.state != ControllerState::Recording {
            return;
        }
        let score = self.arena.state().realtime_score;
        if let Some(entry) = current_entry(&mut inner) {
            let offset = seconds_since(entry.var_data.recording_start_time);
            if reconcile_fouls(&mut entry.var_data, &score, offset) {
                let record = entry.var_data.clone();
                self.persist(&record);
                self.publish(&inner, &["match_list"]);
            }
        }
    }

    async fn handle_clip_list_updated(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;
        let mut changed = false;
        for entry in inner.matches.values_mut() {
            let available = entry
                .var_data
                .clip_id
                .map(|clip_id| self.hyperdeck.has_playable_clip(clip_id))
                .unwrap_or(false);
            if available != entry.clip_available {
                entry.clip_available = available;
                changed = true;
            }
        }
        if changed {
            self.publish(&inner, &["match_list"]);
        }
    }

    // ------------------------------------------------------------------
    // Operator command handlers
    // ------------------------------------------------------------------

    async fn handle_load_match(self: Arc<Self>, cmd: LoadMatchCommand) {
        let mut inner = self.inner.lock().await;
        if !matches!(
            inner.state,
            ControllerState::Idle | ControllerState::ReviewingHistoricalMatch
        ) {
            warn!(state = ?inner.state, "ignoring load_match during an active match");
            return;
        }
        let Some(entry) = inner.matches.get(&cmd.match_id) else {
            warn!(match_id = %cmd.match_id, "load_match for unknown match");
            return;
        };
        info!(match_id = %cmd.match_id, "loading match for review");

        let warp_target = entry
            .clip_available
            .then_some(entry.var_data.clip_id)
            .flatten();
        inner.current_match = Some(cmd.match_id);
        inner.state = ControllerState::ReviewingHistoricalMatch;
        if let Some(clip_id) = warp_target {
            if let Err(e) = self.hyperdeck.warp_to_clip(clip_id, 0.0).await {
                error!(error = %e, "failed to warp to clip start");
            }
        }
        self.publish(&inner, &["controller_status", "hyperdeck_status"]);
    }

    async fn handle_warp_to_time(self: Arc<Self>, cmd: WarpToTimeCommand) {
        let inner = self.inner.lock().await;
        if inner.current_match.as_deref() != Some(cmd.match_id.as_str()) {
            warn!(match_id = %cmd.match_id, "warp_to_time for a non-current match");
            return;
        }
        let Some(entry) = inner.matches.get(&cmd.match_id) else {
            return;
        };
        match entry.var_data.clip_id {
            Some(clip_id) if entry.clip_available => {
                if let Err(e) = self.hyperdeck.warp_to_clip(clip_id, cmd.time).await {
                    error!(error = %e, "failed to warp within clip");
                }
            }
            _ => warn!(match_id = %cmd.match_id, "no playable clip to warp within"),
        }
    }

    async fn handle_add_var_review(self: Arc<Self>, cmd: AddVarReviewCommand) {
        let mut inner = self.inner.lock().await;
        if inner.current_match.as_deref() != Some(cmd.match_id.as_str()) {
            warn!(match_id = %cmd.match_id, "add_var_review for a non-current match");
            return;
        }
        let recording = inner.state == ControllerState::Recording;
        let reaction_time = self.settings.var_reaction_time;
        if let Some(entry) = current_entry(&mut inner) {
            let time = if recording {
                // Backdate to when the operator actually saw the incident
                (seconds_since(entry.var_data.recording_start_time) - reaction_time).max(0.0)
            } else {
                cmd.time
            };
            info!(match_id = %cmd.match_id, time, "adding VAR review event");
            entry
                .var_data
                .events
                .push(new_event(EventType::VarReview, time));
            let record = entry.var_data.clone();
            self.persist(&record);
            self.publish(&inner, &["match_list"]);
        }
    }

    async fn handle_exit_review(self: Arc<Self>, _cmd: ExitReviewCommand) {
        let mut inner = self.inner.lock().await;
        if inner.state != ControllerState::ReviewingHistoricalMatch {
            warn!(state = ?inner.state, "exit_review outside historical review");
            return;
        }
        info!("exiting review");
        self.unload_current(&mut inner).await;
        self.publish(&inner, &["controller_status"]);
    }

    async fn handle_update_event(self: Arc<Self>, cmd: UpdateEventCommand) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.matches.get_mut(&cmd.match_id) else {
            warn!(match_id = %cmd.match_id, "update_event for unknown match");
            return;
        };
        let Some(event) = entry.var_data.event_by_id(&cmd.event_id) else {
            warn!(match_id = %cmd.match_id, event_id = %cmd.event_id, "update_event for unknown event");
            return;
        };
        if apply_event_updates(event, &cmd.updates) {
            let record = entry.var_data.clone();
            self.persist(&record);
            self.publish(&inner, &["match_list"]);
        }
    }
}

fn current_entry(inner: &mut ControllerInner) -> Option<&mut MatchListEntry> {
    let id = inner.current_match.clone()?;
    inner.matches.get_mut(&id)
}

fn seconds_since(start: DateTime<Utc>) -> f64 {
    let elapsed = Utc::now()
        .signed_duration_since(start)
        .num_milliseconds() as f64
        / 1000.0;
    elapsed.max(0.0)
}

fn new_event(event_type: EventType, time: f64) -> MatchEvent {
    MatchEvent {
        event_id: Uuid::new_v4().to_string(),
        event_type,
        time,
        alliance: None,
        team_idx: None,
        arena_foul_id: None,
    }
}

/// Allocate a unique VAR match ID from the arena short name, with a
/// `_replay` suffix for replays and a numeric disambiguator on collision.
pub(crate) fn allocate_match_id(
    matches: &HashMap<String, MatchListEntry>,
    short_name: &str,
    is_replay: bool,
) -> String {
    let base = if is_replay {
        format!("{short_name}_replay")
    } else {
        short_name.to_string()
    };
    if !matches.contains_key(&base) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}_{n}");
        if !matches.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Mirror the arena's current foul list into the match's event timeline.
///
/// New fouls are appended as MAJOR/MINOR events at the given recording
/// offset; fouls already represented get their type and team index updated
/// in place. Fouls without a stable arena ID are ignored. Returns whether
/// anything changed.
pub(crate) fn reconcile_fouls(
    record: &mut RecordedMatch,
    score: &RealtimeScoreMessage,
    offset: f64,
) -> bool {
    let mut changed = false;
    let sides = [
        (Alliance::Red, &score.red.score),
        (Alliance::Blue, &score.blue.score),
    ];
    for (alliance, side) in sides {
        let Some(fouls) = side.fouls.as_ref() else {
            continue;
        };
        let stations = record.teams.get(&alliance).copied();
        for foul in fouls {
            let Some(foul_id) = foul.foul_id else {
                continue;
            };
            let event_type = if foul.is_major {
                EventType::MajorFoul
            } else {
                EventType::MinorFoul
            };
            let team_idx =
                stations.and_then(|teams| teams.iter().position(|&num| num == foul.team_id));

            let existing = record
                .events
                .iter()
                .position(|event| event.arena_foul_id == Some(foul_id));
            match existing {
                Some(index) => {
                    let event = &mut record.events[index];
                    if event.event_type != event_type {
                        event.event_type = event_type;
                        changed = true;
                    }
                    if event.team_idx != team_idx {
                        event.team_idx = team_idx;
                        changed = true;
                    }
                }
                None => {
                    record.events.push(MatchEvent {
                        event_id: Uuid::new_v4().to_string(),
                        event_type,
                        time: offset,
                        alliance: Some(alliance),
                        team_idx,
                        arena_foul_id: Some(foul_id),
                    });
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Apply a whitelisted patch to an event. Unknown fields and invalid
/// values are logged and skipped. Returns whether anything changed.
pub(crate) fn apply_event_updates(
    event: &mut MatchEvent,
    updates: &HashMap<String, serde_json::Value>,
) -> bool {
    let mut changed = false;
    for (field, value) in updates {
        match field.as_str() {
            "event_type" => match serde_json::from_value::<EventType>(value.clone()) {
                Ok(event_type) => {
                    if event.event_type != event_type {
                        event.event_type = event_type;
                        changed = true;
                    }
                }
                Err(e) => warn!(error = %e, "invalid event_type in update_event"),
            },
            "time" => match serde_json::from_value::<f64>(value.clone()) {
                Ok(time) => {
                    if event.time != time {
                        event.time = time;
                        changed = true;
                    }
                }
                Err(e) => warn!(error = %e, "invalid time in update_event"),
            },
            "alliance" => match serde_json::from_value::<Option<Alliance>>(value.clone()) {
                Ok(alliance) => {
                    if event.alliance != alliance {
                        event.alliance = alliance;
                        changed = true;
                    }
                }
                Err(e) => warn!(error = %e, "invalid alliance in update_event"),
            },
            "team_idx" => match serde_json::from_value::<Option<usize>>(value.clone()) {
                Ok(team_idx) => {
                    if event.team_idx != team_idx {
                        event.team_idx = team_idx;
                        changed = true;
                    }
                }
                Err(e) => warn!(error = %e, "invalid team_idx in update_event"),
            },
            other => warn!(field = other, "ignoring unknown field in update_event"),
        }
    }
    changed
}
