//! TOML configuration for the VAR server.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use var_arena::ArenaClientSettings;
use var_controller::VarSettings;
use var_db::DbSettings;
use var_hyperdeck::HyperdeckClientSettings;
use var_web::{ServerSettings, UiSettings};

/// Full server configuration. Every group and field has a default, so an
/// empty file (or no file at all) yields a runnable configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub arena: ArenaClientSettings,
    pub db: DbSettings,
    pub server: ServerSettings,
    pub hyperdeck: HyperdeckClientSettings,
    pub var: VarSettings,
    pub ui: UiSettings,
}

impl Config {
    /// Load configuration from the given TOML file, or defaults when no
    /// file was specified.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.arena.address, "10.0.100.5:8080");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.hyperdeck.finalization_poll_interval_ms, 250);
        assert_eq!(config.var.auto_scoring_delay, 3.0);
        assert!(!config.ui.swap_red_blue);
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let config: Config = toml::from_str(
            r#"
            [arena]
            address = "127.0.0.1:8080"
            password = "hunter2"

            [var]
            var_reaction_time = 1.5

            [ui]
            swap_red_blue = true
            "#,
        )
        .unwrap();
        assert_eq!(config.arena.address, "127.0.0.1:8080");
        assert_eq!(config.arena.password.as_deref(), Some("hunter2"));
        assert!(!config.arena.compat_mode);
        assert_eq!(config.var.var_reaction_time, 1.5);
        assert_eq!(config.var.endgame_scoring_delay, 3.0);
        assert!(config.ui.swap_red_blue);
        assert_eq!(config.db.folder, std::path::PathBuf::from("var.db"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/no/such/config.toml"))).is_err());
    }
}
