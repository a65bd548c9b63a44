//! Event sink system for observability.
//!
//! Pipelines report every lifecycle transition (`pipeline.*`, `stage.*`,
//! `gate.*`, `plan.*`) to an [`EventSink`] carried by the pipeline context.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
