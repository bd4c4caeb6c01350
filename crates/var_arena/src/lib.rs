//! Client session and typed wire model for the arena server.

mod client;
pub mod model;

pub use client::{ArenaClient, ArenaClientSettings, ArenaNotifier, ArenaState, ExitServer};
