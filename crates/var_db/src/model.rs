//! Durable data model for the VAR server.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One side of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Alliance {
    #[serde(rename = "RED")]
    Red,
    #[serde(rename = "BLUE")]
    Blue,
}

/// Kind of annotation on a match timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Snapshot point for reviewing autonomous scoring.
    AutoScoring,
    /// Snapshot point for reviewing endgame scoring.
    EndgameScoring,
    /// Manually requested VAR review.
    VarReview,
    MajorFoul,
    MinorFoul,
}

/// A single annotation on a recorded match's timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    /// Stable identifier for the event, assigned at creation.
    pub event_id: String,
    pub event_type: EventType,
    /// Offset in seconds from the start of the recording.
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alliance: Option<Alliance>,
    /// Index of the team within its alliance's station list (0..2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_idx: Option<usize>,
    /// Stable foul ID assigned by the arena, when this event mirrors a foul.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arena_foul_id: Option<u32>,
}

/// Durable record of one recorded match attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedMatch {
    /// Unique ID for this recording within the VAR server.
    pub var_id: String,
    /// The arena's own ID for the match.
    pub arena_match_id: i64,
    /// Recording name requested from the video recorder.
    pub clip_file_name: String,
    /// Clip ID assigned by the recorder once the clip is finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_id: Option<u32>,
    pub match_start_time: DateTime<Utc>,
    pub recording_start_time: DateTime<Utc>,
    /// Team numbers by alliance, in station order.
    pub teams: BTreeMap<Alliance, [u32; 3]>,
    #[serde(default)]
    pub events: Vec<MatchEvent>,
}

impl RecordedMatch {
    /// Look up an event by its stable ID.
    pub fn event_by_id(&mut self, event_id: &str) -> Option<&mut MatchEvent> {
        self.events.iter_mut().find(|e| e.event_id == event_id)
    }
}

/// Durable state of the arena client session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaClientState {
    /// Session cookie acquired from the arena login endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_uses_wire_names() {
        let json = serde_json::to_string(&EventType::AutoScoring).unwrap();
        assert_eq!(json, "\"AUTO_SCORING\"");
        let back: EventType = serde_json::from_str("\"MAJOR_FOUL\"").unwrap();
        assert_eq!(back, EventType::MajorFoul);
    }

    #[test]
    fn alliance_keys_serialize_as_strings() {
        let mut teams = BTreeMap::new();
        teams.insert(Alliance::Red, [254u32, 1678, 2056]);
        teams.insert(Alliance::Blue, [1114u32, 118, 148]);
        let json = serde_json::to_value(&teams).unwrap();
        assert_eq!(json["RED"][2], 2056);
        assert_eq!(json["BLUE"][0], 1114);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let event = MatchEvent {
            event_id: "abc".into(),
            event_type: EventType::VarReview,
            time: 12.5,
            alliance: None,
            team_idx: None,
            arena_foul_id: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("alliance").is_none());
        assert!(json.get("team_idx").is_none());
        assert!(json.get("arena_foul_id").is_none());
    }
}
