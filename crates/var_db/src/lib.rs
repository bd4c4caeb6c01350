//! Simple one-file-per-record storage for the VAR server's durable state.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

pub mod model;

use model::{ArenaClientState, RecordedMatch};

/// Settings for the match database.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DbSettings {
    /// Folder where match data is stored.
    pub folder: PathBuf,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("var.db"),
        }
    }
}

/// Error saving a record to disk.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Simple database for storing the VAR server's data.
///
/// Each record is a pretty-printed JSON file; saves are atomic
/// (write to a temp file, then rename). Records that fail to parse are
/// logged and skipped so a corrupt file never prevents startup.
#[derive(Clone, Debug)]
pub struct Db {
    matches_path: PathBuf,
    arena_client_state_path: PathBuf,
}

impl Db {
    /// Open the database, creating the folder structure if needed.
    pub fn open(settings: &DbSettings) -> Result<Self, DbError> {
        let matches_path = settings.folder.join("matches");
        fs::create_dir_all(&matches_path)?;
        Ok(Self {
            matches_path,
            arena_client_state_path: settings.folder.join("arena_client.json"),
        })
    }

    fn load_data_file<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        debug!(path = %path.display(), "loading data file");
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read data file");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(path = %path.display(), error = %e, "invalid data file");
                None
            }
        }
    }

    fn save_data_file<T: Serialize>(&self, path: &Path, data: &T) -> Result<(), DbError> {
        debug!(path = %path.display(), "saving data file");
        let json = serde_json::to_string_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load the persisted arena client state, if any.
    pub fn load_arena_client_state(&self) -> Option<ArenaClientState> {
        self.load_data_file(&self.arena_client_state_path)
    }

    /// Persist the arena client state.
    pub fn save_arena_client_state(&self, state: &ArenaClientState) -> Result<(), DbError> {
        self.save_data_file(&self.arena_client_state_path, state)
    }

    /// List the IDs of all recorded matches.
    pub fn list_matches(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.matches_path) {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "failed to list match directory");
                return Vec::new();
            }
        };
        entries
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if path.extension()? == "json" {
                    Some(path.file_stem()?.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect()
    }

    fn match_path(&self, match_id: &str) -> PathBuf {
        self.matches_path.join(format!("{match_id}.json"))
    }

    /// Load a recorded match by its ID.
    pub fn load_match(&self, match_id: &str) -> Option<RecordedMatch> {
        self.load_data_file(&self.match_path(match_id))
    }

    /// Persist a recorded match.
    pub fn save_match(&self, m: &RecordedMatch) -> Result<(), DbError> {
        self.save_data_file(&self.match_path(&m.var_id), m)
    }

    /// Load all recorded matches, skipping any that fail to parse.
    pub fn load_all_matches(&self) -> HashMap<String, RecordedMatch> {
        self.list_matches()
            .into_iter()
            .filter_map(|id| self.load_match(&id))
            .map(|m| (m.var_id.clone(), m))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use model::{Alliance, EventType, MatchEvent};
    use std::collections::BTreeMap;

    fn test_db(dir: &Path) -> Db {
        Db::open(&DbSettings {
            folder: dir.to_path_buf(),
        })
        .unwrap()
    }

    fn sample_match(var_id: &str) -> RecordedMatch {
        let mut teams = BTreeMap::new();
        teams.insert(Alliance::Red, [254, 1678, 2056]);
        teams.insert(Alliance::Blue, [1114, 118, 148]);
        RecordedMatch {
            var_id: var_id.to_string(),
            arena_match_id: 17,
            clip_file_name: var_id.to_string(),
            clip_id: Some(42),
            match_start_time: chrono::Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap(),
            recording_start_time: chrono::Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 27).unwrap(),
            teams,
            events: vec![MatchEvent {
                event_id: "e1".into(),
                event_type: EventType::MinorFoul,
                time: 31.25,
                alliance: Some(Alliance::Red),
                team_idx: Some(2),
                arena_foul_id: Some(7),
            }],
        }
    }

    #[test]
    fn match_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(dir.path());

        let m = sample_match("Q1");
        db.save_match(&m).unwrap();
        assert_eq!(db.load_match("Q1"), Some(m));
    }

    #[test]
    fn list_and_load_all() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(dir.path());

        db.save_match(&sample_match("Q1")).unwrap();
        db.save_match(&sample_match("Q2_replay")).unwrap();

        let mut ids = db.list_matches();
        ids.sort();
        assert_eq!(ids, vec!["Q1".to_string(), "Q2_replay".to_string()]);

        let all = db.load_all_matches();
        assert_eq!(all.len(), 2);
        assert_eq!(all["Q1"].var_id, "Q1");
    }

    #[test]
    fn malformed_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(dir.path());

        db.save_match(&sample_match("Q1")).unwrap();
        fs::write(dir.path().join("matches/bad.json"), "{not json").unwrap();

        assert_eq!(db.load_match("bad"), None);
        let all = db.load_all_matches();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn missing_files_return_none() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(dir.path());

        assert_eq!(db.load_match("nope"), None);
        assert!(db.load_arena_client_state().is_none());
    }

    #[test]
    fn arena_client_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(dir.path());

        let state = ArenaClientState {
            session_token: Some("deadbeef".into()),
        };
        db.save_arena_client_state(&state).unwrap();
        assert_eq!(db.load_arena_client_state(), Some(state));
    }

    #[test]
    fn save_excludes_null_fields() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(dir.path());

        let mut m = sample_match("Q3");
        m.clip_id = None;
        db.save_match(&m).unwrap();

        let raw = fs::read_to_string(dir.path().join("matches/Q3.json")).unwrap();
        assert!(!raw.contains("clip_id"));
        assert!(raw.contains('\n'), "expected pretty-printed output");
    }
}
