//! Operator commands accepted over the bus websocket.

use std::collections::HashMap;

use serde::Deserialize;

/// Load a match for review.
#[derive(Clone, Debug, Deserialize)]
pub struct LoadMatchCommand {
    pub match_id: String,
}

/// Warp the video player to a specific time within a match's clip.
#[derive(Clone, Debug, Deserialize)]
pub struct WarpToTimeCommand {
    pub match_id: String,
    /// Time in seconds from the recording start.
    pub time: f64,
}

/// Add a VAR review event to a match's timeline.
#[derive(Clone, Debug, Deserialize)]
pub struct AddVarReviewCommand {
    pub match_id: String,
    /// Time in seconds. Ignored while the match is being recorded, where
    /// the event is placed at the (backdated) current match time instead.
    pub time: f64,
}

/// Exit review mode and return to the live view.
#[derive(Clone, Debug, Deserialize)]
pub struct ExitReviewCommand {}

/// Update fields of an existing event.
#[derive(Clone, Debug, Deserialize)]
pub struct UpdateEventCommand {
    pub match_id: String,
    pub event_id: String,
    /// Field updates to apply; only whitelisted fields are honored.
    #[serde(default)]
    pub updates: HashMap<String, serde_json::Value>,
}
