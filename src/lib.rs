//! Status core for a local LocalStack emulator
//!
//! Independent observers (container lifecycle, health endpoint, CLI and
//! setup files) publish through debounced signals and are folded into two
//! composite statuses: whether the emulator is running and whether the
//! local setup is ready.

pub mod checks;
pub mod config;
pub mod error;
pub mod manage;
pub mod process;
pub mod session;
pub mod signal;
pub mod status;
pub mod timing;
pub mod utils;
pub mod watchers;

pub use config::AppConfig;
pub use session::Session;
