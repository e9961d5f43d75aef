//! Per-account decision engine: notify and optionally auto-reply to new buyer
//! messages, exactly once per conversation within the retention window.

pub mod engine;

pub use engine::{AutoResponder, ResponderError, RunReport};
