#[cfg(feature = "desktop")]
pub mod commands;
mod controller;
mod loop_worker;
pub mod state;

pub use controller::SensingScheduler;
pub use state::{SensingSession, SensingSnapshot, SensingStatus};
