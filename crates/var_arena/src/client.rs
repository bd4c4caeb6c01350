//! Reconnecting client session for the arena server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::{try_join_all, BoxFuture};
use futures::StreamExt;
use serde::Deserialize;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, error, info, warn};

use var_db::model::ArenaClientState;
use var_db::Db;

use crate::model::{
    ArenaStatusMessage, MatchLoadMessage, MatchState, MatchTimeMessage, MatchTimingMessage,
    MatchWithResultAndSummary, RealtimeScoreMessage, ScoringStatusMessage, WebsocketMessage,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);
const MATCH_TYPES: [&str; 4] = ["test", "practice", "qualification", "playoff"];

/// Settings for the arena client.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ArenaClientSettings {
    /// Arena server address.
    pub address: String,
    /// Password for arena APIs requiring authentication.
    pub password: Option<String>,
    /// Use the baseline referee panel endpoint instead of the VAR endpoint.
    pub compat_mode: bool,
}

impl Default for ArenaClientSettings {
    fn default() -> Self {
        Self {
            address: "10.0.100.5:8080".to_string(),
            password: None,
            compat_mode: false,
        }
    }
}

/// Unrecoverable startup failure, raised when arena authentication cannot
/// succeed. Propagated unmodified through the reconnect loop so the server
/// shuts down instead of retrying forever.
#[derive(Clone, Copy, Debug, thiserror::Error)]
#[error("server exit requested")]
pub struct ExitServer;

#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error(transparent)]
    Exit(#[from] ExitServer),
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    Ws(#[from] tungstenite::Error),
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),
    #[error("arena returned no session cookie")]
    MissingSessionCookie,
}

/// Notifiers that can be subscribed by the rest of the system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArenaNotifier {
    /// The arena is ready to start a match.
    ArenaReadyToStart,
    MatchStarted,
    AutoPeriodEnded,
    TeleopPeriodStarted,
    MatchEnded,
    /// The match's results have been committed or discarded.
    MatchCommittedOrDiscarded,

    ConnectionStateUpdated,
    HistoricalScoresUpdated,
    RealtimeScoreUpdated,
    MatchTimingUpdated,
    MatchTimeUpdated,
    MatchDataUpdated,
}

type NotifyHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Observable arena state, written only by the session task.
#[derive(Clone, Debug, Default)]
pub struct ArenaState {
    pub connected: bool,
    /// Results for all matches, keyed by arena match ID.
    pub match_results: HashMap<i64, MatchWithResultAndSummary>,
    pub realtime_score: RealtimeScoreMessage,
    /// Data about the currently loaded match.
    pub match_data: MatchLoadMessage,
    pub match_timing: MatchTimingMessage,
    pub match_time: MatchTimeMessage,
    pub arena_status: ArenaStatusMessage,
}

/// Client for interacting with the arena server.
pub struct ArenaClient {
    settings: ArenaClientSettings,
    db: Db,
    http: reqwest::Client,
    session_token: Mutex<Option<String>>,
    state: RwLock<ArenaState>,
    subscribers: Mutex<HashMap<ArenaNotifier, Vec<NotifyHandler>>>,
}

impl ArenaClient {
    pub fn new(settings: ArenaClientSettings, db: Db) -> Self {
        let session_token = db
            .load_arena_client_state()
            .and_then(|state| state.session_token);
        // The auth probe depends on seeing the 307 itself.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build arena HTTP client");
        Self {
            settings,
            db,
            http,
            session_token: Mutex::new(session_token),
            state: RwLock::new(ArenaState::default()),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe a handler to a specific arena notifier.
    pub fn subscribe<F>(&self, notifier: ArenaNotifier, handler: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .expect("arena subscriber lock poisoned")
            .entry(notifier)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Whether the client is currently connected to the arena.
    pub fn connected(&self) -> bool {
        self.read_state().connected
    }

    /// Snapshot of the full observable arena state.
    pub fn state(&self) -> ArenaState {
        self.read_state().clone()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ArenaState> {
        self.state.read().expect("arena state lock poisoned")
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ArenaState> {
        self.state.write().expect("arena state lock poisoned")
    }

    /// Main entrypoint for the arena client. Reconnects after any failure;
    /// only an authentication dead-end makes it return.
    pub async fn run(&self) -> Result<(), ExitServer> {
        info!("starting arena client");
        loop {
            match self.run_session().await {
                Ok(()) => {}
                Err(SessionError::Exit(exit)) => return Err(exit),
                Err(e) => error!(error = %e, "arena client error"),
            }
            info!("reconnecting to arena in 3 seconds");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn run_session(&self) -> Result<(), SessionError> {
        if self.check_auth_required().await? {
            if self.settings.password.is_none() {
                error!("arena requires password authentication but no password is configured");
                return Err(ExitServer.into());
            }
            self.acquire_session().await?;
        }

        let endpoint = if self.settings.compat_mode {
            // Baseline endpoint available in an unmodified arena
            format!("ws://{}/panels/referee/websocket", self.settings.address)
        } else {
            // VAR-specific endpoint, adds arena configuration and readiness reports
            format!("ws://{}/video_referee/websocket", self.settings.address)
        };

        let mut request = endpoint.into_client_request()?;
        if let Some(cookie) = self.cookie_header() {
            request.headers_mut().insert(COOKIE, cookie);
        }
        let (mut websocket, _) = tokio_tungstenite::connect_async(request).await?;

        info!("arena connection established");
        self.write_state().connected = true;
        self.notify(ArenaNotifier::ConnectionStateUpdated).await;

        let result = async {
            self.refresh_match_results().await?;
            while let Some(message) = websocket.next().await {
                match message? {
                    msg @ (tungstenite::Message::Text(_) | tungstenite::Message::Binary(_)) => {
                        if let Ok(text) = msg.to_text() {
                            self.handle_arena_message(text).await;
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
        info!("arena connection closed");
        self.notify(ArenaNotifier::ConnectionStateUpdated).await;
        result
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.settings.address)
    }

    fn cookie_header(&self) -> Option<HeaderValue> {
        let token = self.session_token.lock().expect("token lock poisoned");
        token
            .as_deref()
            .and_then(|t| HeaderValue::from_str(&format!("session_token={t}")).ok())
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.get(format!("{}{path}", self.base_url()));
        if let Some(cookie) = self.cookie_header() {
            builder = builder.header(COOKIE, cookie);
        }
        builder
    }

    /// Probe a protected endpoint to see whether authentication is needed.
    async fn check_auth_required(&self) -> Result<bool, SessionError> {
        let response = self.get("/panels/referee").send().await?;
        match response.status().as_u16() {
            307 => Ok(true),
            200 => Ok(false),
            other => Err(SessionError::UnexpectedStatus(other)),
        }
    }

    /// Acquire a session token from the arena login endpoint.
    async fn acquire_session(&self) -> Result<(), SessionError> {
        let form = [
            ("username", "admin"),
            ("password", self.settings.password.as_deref().unwrap_or("")),
        ];
        let response = self
            .http
            .post(format!("{}/login", self.base_url()))
            .form(&form)
            .send()
            .await?;

        match response.status().as_u16() {
            303 => {
                let token = extract_session_token(response.headers())
                    .ok_or(SessionError::MissingSessionCookie)?;
                *self.session_token.lock().expect("token lock poisoned") = Some(token.clone());
                if let Err(e) = self.db.save_arena_client_state(&ArenaClientState {
                    session_token: Some(token),
                }) {
                    error!(error = %e, "failed to persist arena session token");
                }
                Ok(())
            }
            200 => {
                // The login page renders again on a wrong password
                error!("incorrect arena password, check your configuration");
                Err(ExitServer.into())
            }
            other => Err(SessionError::UnexpectedStatus(other)),
        }
    }

    /// Refresh the local cache of historical match results.
    async fn refresh_match_results(&self) -> Result<(), SessionError> {
        let fetches = MATCH_TYPES.iter().map(|match_type| async move {
            let response = self
                .get(&format!("/api/matches/{match_type}"))
                .send()
                .await?
                .error_for_status()?;
            response
                .json::<Vec<MatchWithResultAndSummary>>()
                .await
                .map_err(SessionError::from)
        });
        let results_by_type = try_join_all(fetches).await?;

        let mut match_results = HashMap::new();
        for matches in results_by_type {
            match_results.extend(matches.into_iter().map(|m| (m.match_info.id, m)));
        }
        self.write_state().match_results = match_results;
        self.notify(ArenaNotifier::HistoricalScoresUpdated).await;
        Ok(())
    }

    /// Notify subscribers about a state change.
    async fn notify(&self, notifier: ArenaNotifier) {
        debug!(?notifier, "arena notification");
        let handlers: Vec<NotifyHandler> = {
            let subscribers = self
                .subscribers
                .lock()
                .expect("arena subscriber lock poisoned");
            subscribers.get(&notifier).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler().await;
        }
    }

    /// Handle a message received from the arena websocket.
    async fn handle_arena_message(&self, raw: &str) {
        let message: WebsocketMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "malformed message from arena");
                return;
            }
        };

        match message.message_type.as_str() {
            "matchLoad" => {
                if let Some(data) = self.validate::<MatchLoadMessage>(&message) {
                    self.handle_match_load(data).await;
                }
            }
            "matchTiming" => {
                if let Some(data) = self.validate::<MatchTimingMessage>(&message) {
                    self.write_state().match_timing = data;
                    self.notify(ArenaNotifier::MatchTimingUpdated).await;
                }
            }
            "matchTime" => {
                if let Some(data) = self.validate::<MatchTimeMessage>(&message) {
                    self.handle_match_time(data).await;
                }
            }
            "realtimeScore" => {
                if let Some(data) = self.validate::<RealtimeScoreMessage>(&message) {
                    self.write_state().realtime_score = data;
                    self.notify(ArenaNotifier::RealtimeScoreUpdated).await;
                }
            }
            "arenaStatus" => {
                if let Some(data) = self.validate::<ArenaStatusMessage>(&message) {
                    self.handle_arena_status(data).await;
                }
            }
            "scoringStatus" => {
                // Validated for protocol conformance, otherwise unused
                let _ = self.validate::<ScoringStatusMessage>(&message);
            }
            "ping" => {
                // May or may not carry a body; either way there is nothing to do
            }
            other => {
                warn!(message_type = other, "received unknown message type");
            }
        }
    }

    fn validate<T: serde::de::DeserializeOwned>(&self, message: &WebsocketMessage) -> Option<T> {
        match serde_json::from_value(message.data.clone()) {
            Ok(data) => Some(data),
            Err(e) => {
                error!(
                    message_type = %message.message_type,
                    error = %e,
                    "malformed message from arena"
                );
                None
            }
        }
    }

    async fn handle_match_load(&self, message: MatchLoadMessage) {
        info!(
            short_name = %message.match_info.short_name,
            long_name = %message.match_info.long_name,
            is_replay = message.is_replay,
            "match loaded"
        );
        self.write_state().match_data = message;
        self.notify(ArenaNotifier::MatchDataUpdated).await;
    }

    async fn handle_match_time(&self, message: MatchTimeMessage) {
        let prev_state = {
            let mut state = self.write_state();
            let prev = state.match_time.match_state;
            state.match_time = message;
            prev
        };
        self.notify(ArenaNotifier::MatchTimeUpdated).await;

        for notifier in lifecycle_notifiers(prev_state, message.match_state) {
            if notifier == ArenaNotifier::MatchCommittedOrDiscarded {
                // Pick up the committed scores before announcing the commit
                info!("scores committed");
                if let Err(e) = self.refresh_match_results().await {
                    error!(error = %e, "failed to refresh match results after commit");
                }
            }
            self.notify(notifier).await;
        }
    }

    async fn handle_arena_status(&self, message: ArenaStatusMessage) {
        let rising_edge = {
            let mut state = self.write_state();
            let prev = state.arena_status;
            state.arena_status = message;
            message.can_start_match && !prev.can_start_match
        };
        if rising_edge {
            info!("ready to start match");
            self.notify(ArenaNotifier::ArenaReadyToStart).await;
        }
    }
}

/// Lifecycle notifiers triggered by a match-state transition.
fn lifecycle_notifiers(prev: MatchState, current: MatchState) -> Vec<ArenaNotifier> {
    if prev == current {
        return Vec::new();
    }
    match current {
        MatchState::AutoPeriod => {
            info!("match started");
            vec![ArenaNotifier::MatchStarted]
        }
        MatchState::PausePeriod => {
            info!("auto ended");
            vec![ArenaNotifier::AutoPeriodEnded]
        }
        MatchState::TeleopPeriod => {
            info!("teleop started");
            vec![ArenaNotifier::TeleopPeriodStarted]
        }
        MatchState::PostMatch => {
            info!("match ended");
            vec![ArenaNotifier::MatchEnded]
        }
        MatchState::PreMatch if prev == MatchState::PostMatch => {
            vec![ArenaNotifier::MatchCommittedOrDiscarded]
        }
        _ => Vec::new(),
    }
}

fn extract_session_token(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            let (name, rest) = cookie.split_once('=')?;
            if name.trim() == "session_token" {
                Some(rest.split(';').next()?.trim().to_string())
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_client() -> (ArenaClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = var_db::Db::open(&var_db::DbSettings {
            folder: dir.path().to_path_buf(),
        })
        .unwrap();
        (ArenaClient::new(ArenaClientSettings::default(), db), dir)
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use ArenaNotifier::*;
        use MatchState::*;

        let cases = [
            (PreMatch, StartMatch, vec![]),
            (StartMatch, AutoPeriod, vec![MatchStarted]),
            (AutoPeriod, PausePeriod, vec![AutoPeriodEnded]),
            (PausePeriod, TeleopPeriod, vec![TeleopPeriodStarted]),
            (TeleopPeriod, PostMatch, vec![MatchEnded]),
            (PostMatch, PreMatch, vec![MatchCommittedOrDiscarded]),
            // A fresh load that never went through post-match is not a commit
            (TimeoutActive, PreMatch, vec![]),
            (AutoPeriod, AutoPeriod, vec![]),
        ];
        for (prev, current, expected) in cases {
            assert_eq!(
                lifecycle_notifiers(prev, current),
                expected,
                "{prev:?} -> {current:?}"
            );
        }
    }

    #[test]
    fn session_token_extraction() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.append(
            reqwest::header::SET_COOKIE,
            "other=1; Path=/".parse().unwrap(),
        );
        headers.append(
            reqwest::header::SET_COOKIE,
            "session_token=abc123; Path=/; HttpOnly".parse().unwrap(),
        );
        assert_eq!(extract_session_token(&headers), Some("abc123".to_string()));

        let empty = reqwest::header::HeaderMap::new();
        assert_eq!(extract_session_token(&empty), None);
    }

    #[tokio::test]
    async fn match_time_drives_notifiers() {
        let (client, _dir) = test_client();
        let started = Arc::new(AtomicUsize::new(0));
        let time_updates = Arc::new(AtomicUsize::new(0));

        let counter = started.clone();
        client.subscribe(ArenaNotifier::MatchStarted, move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        let counter = time_updates.clone();
        client.subscribe(ArenaNotifier::MatchTimeUpdated, move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        client
            .handle_arena_message(r#"{"type": "matchTime", "data": {"MatchState": 3, "MatchTimeSec": 0}}"#)
            .await;
        client
            .handle_arena_message(r#"{"type": "matchTime", "data": {"MatchState": 3, "MatchTimeSec": 1}}"#)
            .await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(time_updates.load(Ordering::SeqCst), 2);
        assert_eq!(client.state().match_time.match_time_sec, 1);
    }

    #[tokio::test]
    async fn ready_to_start_fires_on_rising_edge_only() {
        let (client, _dir) = test_client();
        let ready = Arc::new(AtomicUsize::new(0));
        let counter = ready.clone();
        client.subscribe(ArenaNotifier::ArenaReadyToStart, move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        for can_start in [false, true, true, false, true] {
            client
                .handle_arena_message(&format!(
                    r#"{{"type": "arenaStatus", "data": {{"CanStartMatch": {can_start}}}}}"#
                ))
                .await;
        }
        assert_eq!(ready.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_and_unknown_messages_are_skipped() {
        let (client, _dir) = test_client();
        client.handle_arena_message("{not json").await;
        client
            .handle_arena_message(r#"{"type": "matchTime", "data": {"MatchState": "bogus"}}"#)
            .await;
        client
            .handle_arena_message(r#"{"type": "somethingNew", "data": {}}"#)
            .await;
        client.handle_arena_message(r#"{"type": "ping"}"#).await;
        client
            .handle_arena_message(r#"{"type": "ping", "data": {"t": 1}}"#)
            .await;

        // No state changes from any of the above
        assert_eq!(client.state().match_time, MatchTimeMessage::default());
    }
}
