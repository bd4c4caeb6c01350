//! Match lifecycle coordination between the arena, the video recorder, and
//! the operator bus.

pub mod commands;
mod controller;

pub use controller::{
    Controller, ControllerState, ControllerStatus, HyperdeckStatus, MatchListEntry, VarSettings,
};
