//! Lightweight signalling primitives shared by every tracker
//!
//! - `emitter` - debounced single-value publish/subscribe
//! - `once` - one-shot scheduler used to coalesce bursts of work

mod emitter;
mod once;

pub use emitter::{Callback, ValueEmitter};
pub use once::ImmediateOnce;
