//! Enrichment-deduplication orchestrator.
//!
//! Resolves each submission in a batch to its business concept, copies the
//! concept's primary analysis where one exists, runs the rest fresh, and
//! persists the merged result without ever clearing stored trust fields.

pub mod bootstrap;
pub mod enrich;
pub mod metadata;
pub mod orchestrator;
pub mod report;
pub mod skip;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod trust;

pub use orchestrator::{BatchStage, EnrichmentDeps, Orchestrator};
pub use report::{BatchReport, KindCounts, StageOutcome};
