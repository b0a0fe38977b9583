// Trait seams for the enrichment orchestrator.
//
// Persistence (ConceptReader, TrustReader, ResultStore, ConceptWriter) is
// implemented for the Postgres OpportunityStore below. Collection, filtering
// and the inference-backed analyzers live outside this crate; the orchestrator
// only sees them through these traits, which keeps `cargo test` free of
// network and database dependencies.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use opportunity_common::{
    ConceptMatch, MonetizationEvidence, MonetizationOutput, Opportunity, ProfileOutput,
    Submission, TrustFields,
};
use opportunity_store::OpportunityStore;

use crate::metadata::FreshAnalysis;
use crate::report::BatchReport;

// ---------------------------------------------------------------------------
// Upstream collaborators
// ---------------------------------------------------------------------------

/// Produces the finite batch of submissions for one run.
#[async_trait]
pub trait SubmissionSource: Send + Sync {
    async fn fetch_batch(&self, limit: usize) -> Result<Vec<Submission>>;
}

/// Quality pre-filter: returns the subset worth analyzing.
#[async_trait]
pub trait QualityFilter: Send + Sync {
    async fn filter(&self, submissions: Vec<Submission>) -> Result<Vec<Submission>>;
}

/// Pre-filter that keeps everything.
pub struct AcceptAll;

#[async_trait]
impl QualityFilter for AcceptAll {
    async fn filter(&self, submissions: Vec<Submission>) -> Result<Vec<Submission>> {
        Ok(submissions)
    }
}

// ---------------------------------------------------------------------------
// Enrichment services
// ---------------------------------------------------------------------------

/// Implementations ask their service to answer in
/// `MonetizationOutput::output_schema()`.
#[async_trait]
pub trait MonetizationAnalyzer: Send + Sync {
    async fn analyze(&self, submission: &Submission) -> Result<MonetizationOutput>;
}

/// Profiling may use Monetization's findings for the same submission.
/// Answers follow `ProfileOutput::output_schema()`.
#[async_trait]
pub trait Profiler: Send + Sync {
    async fn analyze(
        &self,
        submission: &Submission,
        evidence: Option<&MonetizationEvidence>,
    ) -> Result<ProfileOutput>;
}

/// Computes fresh trust indicators. The core never scores trust itself.
#[async_trait]
pub trait TrustValidator: Send + Sync {
    async fn validate(&self, submission: &Submission) -> Result<TrustFields>;
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Batch submission → concept resolution. Implementations must issue one
/// query per call and none for an empty slice.
#[async_trait]
pub trait ConceptReader: Send + Sync {
    async fn concepts_for(&self, submission_ids: &[String])
        -> Result<HashMap<String, ConceptMatch>>;
}

/// Batch read of persisted trust fields. Same one-query contract.
#[async_trait]
pub trait TrustReader: Send + Sync {
    async fn trust_snapshots(&self, submission_ids: &[String])
        -> Result<HashMap<String, TrustFields>>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Probe once per batch. An error here is the only batch-level failure.
    async fn ensure_available(&self) -> Result<()>;

    /// Idempotent upsert keyed by submission id.
    async fn store(&self, opportunity: &Opportunity) -> Result<()>;

    /// Persist the finished batch report.
    async fn record_run(&self, report: &BatchReport) -> Result<()>;
}

#[async_trait]
pub trait ConceptWriter: Send + Sync {
    /// Fold one fresh analysis into its concept atomically.
    async fn record_fresh_analysis(&self, update: &FreshAnalysis) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Postgres implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl SubmissionSource for OpportunityStore {
    async fn fetch_batch(&self, limit: usize) -> Result<Vec<Submission>> {
        Ok(self.fetch_unprocessed(limit).await?)
    }
}

#[async_trait]
impl ConceptReader for OpportunityStore {
    async fn concepts_for(
        &self,
        submission_ids: &[String],
    ) -> Result<HashMap<String, ConceptMatch>> {
        Ok(self.concepts_for(submission_ids).await?)
    }
}

#[async_trait]
impl TrustReader for OpportunityStore {
    async fn trust_snapshots(
        &self,
        submission_ids: &[String],
    ) -> Result<HashMap<String, TrustFields>> {
        Ok(self.trust_snapshots(submission_ids).await?)
    }
}

#[async_trait]
impl ResultStore for OpportunityStore {
    async fn ensure_available(&self) -> Result<()> {
        Ok(self.ping().await?)
    }

    async fn store(&self, opportunity: &Opportunity) -> Result<()> {
        Ok(self.upsert_opportunity(opportunity).await?)
    }

    async fn record_run(&self, report: &BatchReport) -> Result<()> {
        let value = serde_json::to_value(report)?;
        Ok(self
            .record_run(report.run_id, report.started_at, report.finished_at, &value)
            .await?)
    }
}

#[async_trait]
impl ConceptWriter for OpportunityStore {
    async fn record_fresh_analysis(&self, update: &FreshAnalysis) -> Result<()> {
        Ok(self
            .record_fresh_analysis(
                update.concept_id,
                &update.submission_id,
                update.kind,
                update.score,
            )
            .await?)
    }
}
