//! Shared infrastructure: shutdown and fan-out primitives.

pub mod signal;

pub use signal::{CloseSignal, FanoutCell};
