//! Event bus and operator gateway for the VAR server.

mod bus;
mod gateway;
pub mod model;

pub use bus::{Bus, ClientId, UiSettings};
pub use gateway::{router, run, ServerSettings};
