//! Typed model for the arena server's wire formats.
//!
//! The arena sends UpperCamelCase field names over the wire; every field
//! carries a serde alias so inbound messages validate against the wire
//! name while outbound serialization (for operator topics) uses the plain
//! field names.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Types of matches in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum MatchType {
    Test = 0,
    Practice = 1,
    Qualification = 2,
    Playoff = 3,
}

impl From<MatchType> for i64 {
    fn from(v: MatchType) -> i64 {
        v as i64
    }
}

impl TryFrom<i64> for MatchType {
    type Error = String;
    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(MatchType::Test),
            1 => Ok(MatchType::Practice),
            2 => Ok(MatchType::Qualification),
            3 => Ok(MatchType::Playoff),
            other => Err(format!("unknown match type {other}")),
        }
    }
}

/// Play status of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum MatchStatus {
    /// Match is scheduled but not played yet.
    Scheduled = 0,
    /// Match is hidden from the schedule, e.g. a skipped playoff match.
    Hidden = 1,
    RedWon = 2,
    BlueWon = 3,
    Tie = 4,
}

impl From<MatchStatus> for i64 {
    fn from(v: MatchStatus) -> i64 {
        v as i64
    }
}

impl TryFrom<i64> for MatchStatus {
    type Error = String;
    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(MatchStatus::Scheduled),
            1 => Ok(MatchStatus::Hidden),
            2 => Ok(MatchStatus::RedWon),
            3 => Ok(MatchStatus::BlueWon),
            4 => Ok(MatchStatus::Tie),
            other => Err(format!("unknown match status {other}")),
        }
    }
}

/// State of a match play cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum MatchState {
    /// Match is loaded but not started yet.
    PreMatch = 0,
    /// Start match has been pressed, arena is transitioning into match play.
    StartMatch = 1,
    /// Pre-match warmup period. Not used in most years.
    WarmupPeriod = 2,
    AutoPeriod = 3,
    /// Period between autonomous and teleop.
    PausePeriod = 4,
    TeleopPeriod = 5,
    PostMatch = 6,
    TimeoutActive = 7,
    PostTimeout = 8,
}

impl From<MatchState> for i64 {
    fn from(v: MatchState) -> i64 {
        v as i64
    }
}

impl TryFrom<i64> for MatchState {
    type Error = String;
    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(MatchState::PreMatch),
            1 => Ok(MatchState::StartMatch),
            2 => Ok(MatchState::WarmupPeriod),
            3 => Ok(MatchState::AutoPeriod),
            4 => Ok(MatchState::PausePeriod),
            5 => Ok(MatchState::TeleopPeriod),
            6 => Ok(MatchState::PostMatch),
            7 => Ok(MatchState::TimeoutActive),
            8 => Ok(MatchState::PostTimeout),
            other => Err(format!("unknown match state {other}")),
        }
    }
}

/// Schedule data for a match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Internal arena ID for the match.
    #[serde(alias = "Id")]
    pub id: i64,
    #[serde(alias = "Type")]
    pub match_type: MatchType,
    /// Order of the match within its type.
    #[serde(alias = "TypeOrder")]
    pub type_order: i64,
    /// Full name of the match, e.g. "Qualification Match 1".
    #[serde(alias = "LongName")]
    pub long_name: String,
    /// Abbreviated name of the match, e.g. "Q1".
    #[serde(alias = "ShortName")]
    pub short_name: String,
    #[serde(alias = "Red1")]
    pub red1: u32,
    #[serde(alias = "Red2")]
    pub red2: u32,
    #[serde(alias = "Red3")]
    pub red3: u32,
    #[serde(alias = "Blue1")]
    pub blue1: u32,
    #[serde(alias = "Blue2")]
    pub blue2: u32,
    #[serde(alias = "Blue3")]
    pub blue3: u32,
    #[serde(alias = "Status")]
    pub status: MatchStatus,
}

impl Default for Match {
    fn default() -> Self {
        Self {
            id: 0,
            match_type: MatchType::Test,
            type_order: 0,
            long_name: "Test Match".to_string(),
            short_name: "T".to_string(),
            red1: 0,
            red2: 0,
            red3: 0,
            blue1: 0,
            blue2: 0,
            blue3: 0,
            status: MatchStatus::Scheduled,
        }
    }
}

/// A team participating in the event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Team {
    /// Team number.
    #[serde(alias = "Id")]
    pub team_num: u32,
}

/// Per-row coral placement on the reef (12 branches per level).
pub type ReefRow = Vec<bool>;

/// Reef scoring data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reef {
    /// Coral placed on each branch during the autonomous period.
    #[serde(alias = "AutoBranches")]
    pub auto_branches: Vec<ReefRow>,
    /// Coral currently placed on each branch.
    #[serde(alias = "Branches")]
    pub branches: Vec<ReefRow>,
    #[serde(alias = "AutoTroughNear")]
    pub auto_trough_near: i64,
    #[serde(alias = "AutoTroughFar")]
    pub auto_trough_far: i64,
    #[serde(alias = "TroughNear")]
    pub trough_near: i64,
    #[serde(alias = "TroughFar")]
    pub trough_far: i64,
}

/// A foul committed during a match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Foul {
    /// Whether this is a major or minor foul.
    #[serde(alias = "IsMajor")]
    pub is_major: bool,
    /// The team that committed the foul.
    #[serde(alias = "TeamId")]
    pub team_id: u32,
    /// The rule that was violated.
    #[serde(alias = "RuleId")]
    pub rule_id: i64,
    /// Stable ID for the foul. Absent on arena builds without VAR support.
    #[serde(alias = "FoulId", default, skip_serializing_if = "Option::is_none")]
    pub foul_id: Option<u32>,
}

/// Endgame points qualification status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum EndgameStatus {
    #[default]
    None = 0,
    Parked = 1,
    ShallowCage = 2,
    DeepCage = 3,
}

impl From<EndgameStatus> for i64 {
    fn from(v: EndgameStatus) -> i64 {
        v as i64
    }
}

impl TryFrom<i64> for EndgameStatus {
    type Error = String;
    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(EndgameStatus::None),
            1 => Ok(EndgameStatus::Parked),
            2 => Ok(EndgameStatus::ShallowCage),
            3 => Ok(EndgameStatus::DeepCage),
            other => Err(format!("unknown endgame status {other}")),
        }
    }
}

/// An alliance's score components in a match.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Whether each team qualified for leave points.
    #[serde(alias = "LeaveStatuses")]
    pub leave_statuses: Vec<bool>,
    #[serde(alias = "Reef")]
    pub reef: Reef,
    /// Number of algae placed on the barge.
    #[serde(alias = "BargeAlgae")]
    pub barge_algae: i64,
    /// Number of algae placed in the processor.
    #[serde(alias = "ProcessorAlgae")]
    pub processor_algae: i64,
    #[serde(alias = "EndgameStatuses")]
    pub endgame_statuses: Vec<EndgameStatus>,
    /// Fouls committed by the alliance, absent when none were committed.
    #[serde(alias = "Fouls", default)]
    pub fouls: Option<Vec<Foul>>,
}

/// Final score tallies for an alliance in a match.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    /// Total points scored by the alliance.
    #[serde(alias = "MatchPoints")]
    pub match_points: i64,
}

/// The baseline results of a match stored in the arena database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    #[serde(alias = "MatchId")]
    pub match_id: i64,
    /// 1 for the first play, 2 for a replay, etc.
    #[serde(alias = "PlayNumber")]
    pub play_number: i64,
    #[serde(alias = "MatchType")]
    pub match_type: MatchType,
    #[serde(alias = "RedScore")]
    pub red_score: Score,
    #[serde(alias = "BlueScore")]
    pub blue_score: Score,
    /// Cards issued during the match, keyed by team number.
    #[serde(alias = "RedCards")]
    pub red_cards: HashMap<u32, String>,
    #[serde(alias = "BlueCards")]
    pub blue_cards: HashMap<u32, String>,
}

/// Match results with final scores computed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResultWithSummary {
    #[serde(flatten)]
    pub result: MatchResult,
    #[serde(alias = "RedSummary")]
    pub red_summary: ScoreSummary,
    #[serde(alias = "BlueSummary")]
    pub blue_summary: ScoreSummary,
}

/// Match schedule information together with its results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchWithResultAndSummary {
    #[serde(flatten)]
    pub match_info: Match,
    #[serde(alias = "Result")]
    pub result: MatchResultWithSummary,
}

/// Contents of a `matchLoad` message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchLoadMessage {
    #[serde(alias = "Match")]
    pub match_info: Match,
    /// Whether this is a replay of a match.
    #[serde(alias = "IsReplay")]
    pub is_replay: bool,
    /// Teams participating in the match, keyed by station ID.
    #[serde(alias = "Teams", default)]
    pub teams: HashMap<String, Option<Team>>,
}

/// Contents of a `matchTiming` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchTimingMessage {
    #[serde(alias = "WarmupDurationSec", default)]
    pub warmup_duration_sec: i64,
    #[serde(alias = "AutoDurationSec")]
    pub auto_duration_sec: i64,
    #[serde(alias = "PauseDurationSec")]
    pub pause_duration_sec: i64,
    #[serde(alias = "TeleopDurationSec")]
    pub teleop_duration_sec: i64,
    #[serde(alias = "WarningRemainingDurationSec", default)]
    pub warning_remaining_duration_sec: i64,
    #[serde(alias = "TimeoutDurationSec", default)]
    pub timeout_duration_sec: i64,
}

impl Default for MatchTimingMessage {
    fn default() -> Self {
        Self {
            warmup_duration_sec: 0,
            auto_duration_sec: 15,
            pause_duration_sec: 3,
            teleop_duration_sec: 135,
            warning_remaining_duration_sec: 20,
            timeout_duration_sec: 0,
        }
    }
}

/// Contents of a `matchTime` message.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchTimeMessage {
    #[serde(alias = "MatchState")]
    pub match_state: MatchState,
    /// Current match time in seconds, 0 in pre- or post-match states.
    #[serde(alias = "MatchTimeSec")]
    pub match_time_sec: i64,
}

impl Default for MatchTimeMessage {
    fn default() -> Self {
        Self {
            match_state: MatchState::PreMatch,
            match_time_sec: 0,
        }
    }
}

/// An alliance's realtime score with its summary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreWithSummary {
    #[serde(alias = "Score")]
    pub score: Score,
    #[serde(alias = "ScoreSummary")]
    pub score_summary: ScoreSummary,
}

/// Contents of a `realtimeScore` message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeScoreMessage {
    #[serde(alias = "Red")]
    pub red: ScoreWithSummary,
    #[serde(alias = "Blue")]
    pub blue: ScoreWithSummary,
    #[serde(alias = "RedCards", default)]
    pub red_cards: HashMap<u32, String>,
    #[serde(alias = "BlueCards", default)]
    pub blue_cards: HashMap<u32, String>,
}

/// Status for a referee or scorer position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionStatus {
    /// How many panels are connected to the arena for this position.
    #[serde(alias = "NumPanels")]
    pub num_panels: i64,
    /// How many panels are signaling scores ready for this position.
    #[serde(alias = "NumPanelsReady")]
    pub num_panels_ready: i64,
    /// Whether this position has completed scoring.
    #[serde(alias = "Ready")]
    pub ready: bool,
}

/// Contents of a `scoringStatus` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoringStatusMessage {
    #[serde(alias = "RefereeScoreReady")]
    pub referee_score_ready: bool,
    #[serde(alias = "PositionStatuses", default)]
    pub position_statuses: HashMap<String, PositionStatus>,
}

/// Contents of an `arenaStatus` message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArenaStatusMessage {
    /// Whether the arena is ready to start a match.
    #[serde(alias = "CanStartMatch")]
    pub can_start_match: bool,
}

/// Envelope for inbound websocket messages.
#[derive(Clone, Debug, Deserialize)]
pub struct WebsocketMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}
