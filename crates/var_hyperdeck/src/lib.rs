//! Client session and typed control model for the video recorder.

mod client;
pub mod model;

pub use client::{
    HyperdeckClient, HyperdeckClientSettings, HyperdeckError, HyperdeckNotifier, HyperdeckState,
    WorkingSetSummary,
};
