//! Answer aggregation.
//!
//! Queries fan out to both providers, and their payloads are folded into
//! one combined answer per query by the merger.

pub mod aggregator;
pub mod merger;
pub mod progress;
pub mod transcript;
pub mod view;

pub use aggregator::{Aggregator, MergeSettings, QueryResult};
pub use transcript::{ChatMessage, Role, Transcript};
