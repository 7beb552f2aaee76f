//! Logging setup for the node.
//!
//! Every module logs through `tracing` with structured fields. Worker
//! registration changes are logged at info, malformed frames and failed
//! writes at warn, unmatched responses at debug.

mod logging;

pub use logging::{init_logging, LogFormat};
