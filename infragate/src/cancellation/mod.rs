//! Pipeline cancellation.
//!
//! A cancel request tears down any waiting approval gate immediately and
//! aborts the invocation without running further stages.

mod token;

pub use token::CancellationToken;
