//! Readiness checks for the local setup
//!
//! Each check is a plain async function plus a `track` constructor that
//! keeps it fresh through a [`FileStatusWatcher`](crate::watchers::FileStatusWatcher).
//!
//! - `cli` - LocalStack CLI present, executable and recent enough
//! - `profile` - `localstack` AWS profile points at the emulator
//! - `auth` - auth token stored
//! - `license` - license reported valid by the CLI

pub mod auth;
pub mod cli;
mod ini;
pub mod license;
pub mod profile;

pub use cli::{CliCheck, CliTracker};
