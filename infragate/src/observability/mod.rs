//! Observability utilities.
//!
//! Logging goes through `tracing`; the binary installs the subscriber with
//! [`init_logging`]. Pipelines time their stages with [`SpanTimer`] and
//! close each run with a wide summary event.

mod logging;
mod timer;
mod wide_events;

pub use logging::{init_logging, LogFormat};
pub use timer::SpanTimer;
pub use wide_events::{pipeline_payload, stage_payload};
