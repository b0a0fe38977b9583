//! Batch orchestrator.
//!
//! Drives one batch through
//! `FETCHED → FILTERED → CONCEPT_RESOLVED → ENRICHED → TRUST_MERGED → STORED →
//! METADATA_UPDATED → REPORTED`. Every stage degrades on collaborator failure
//! except STORED, whose availability check is the only batch-level error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use opportunity_common::{
    AnalysisKind, ConceptMatch, EnrichError, Opportunity, PipelineConfig, Result, Submission,
    TrustFields,
};

use crate::enrich::{EnrichedSubmission, Enricher};
use crate::metadata::ConceptMetadataUpdater;
use crate::report::{BatchReport, StageOutcome};
use crate::traits::{
    AcceptAll, ConceptReader, ConceptWriter, MonetizationAnalyzer, Profiler, QualityFilter,
    ResultStore, SubmissionSource, TrustReader, TrustValidator,
};
use crate::trust;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStage {
    Fetched,
    Filtered,
    ConceptResolved,
    Enriched,
    TrustMerged,
    Stored,
    MetadataUpdated,
    Reported,
}

impl BatchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStage::Fetched => "fetched",
            BatchStage::Filtered => "filtered",
            BatchStage::ConceptResolved => "concept_resolved",
            BatchStage::Enriched => "enriched",
            BatchStage::TrustMerged => "trust_merged",
            BatchStage::Stored => "stored",
            BatchStage::MetadataUpdated => "metadata_updated",
            BatchStage::Reported => "reported",
        }
    }
}

impl fmt::Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn accept_all() -> Arc<dyn QualityFilter> {
    Arc::new(AcceptAll)
}

/// Collaborators for one orchestrator. Long-lived and cheap to clone.
#[derive(Clone, TypedBuilder)]
pub struct EnrichmentDeps {
    pub concepts: Arc<dyn ConceptReader>,
    pub trust_snapshots: Arc<dyn TrustReader>,
    pub results: Arc<dyn ResultStore>,
    pub concept_writer: Arc<dyn ConceptWriter>,
    #[builder(default = accept_all())]
    pub filter: Arc<dyn QualityFilter>,
    pub monetization: Arc<dyn MonetizationAnalyzer>,
    pub profiler: Arc<dyn Profiler>,
    #[builder(default)]
    pub trust_validator: Option<Arc<dyn TrustValidator>>,
    #[builder(default)]
    pub config: PipelineConfig,
}

pub struct Orchestrator {
    deps: EnrichmentDeps,
    enricher: Enricher,
    metadata: ConceptMetadataUpdater,
}

impl Orchestrator {
    pub fn new(deps: EnrichmentDeps) -> Self {
        let enricher = Enricher::new(
            deps.monetization.clone(),
            deps.profiler.clone(),
            deps.trust_validator.clone(),
            deps.config.clone(),
        );
        let metadata =
            ConceptMetadataUpdater::new(deps.concept_writer.clone(), deps.config.store_concurrency);
        Self {
            deps,
            enricher,
            metadata,
        }
    }

    /// Fetch up to `limit` submissions from `source`, then run them as one batch.
    pub async fn run(&self, source: &dyn SubmissionSource, limit: usize) -> Result<BatchReport> {
        let submissions = source
            .fetch_batch(limit)
            .await
            .map_err(|e| EnrichError::Fetch(e.to_string()))?;
        self.run_batch(submissions).await
    }

    pub async fn run_batch(&self, submissions: Vec<Submission>) -> Result<BatchReport> {
        let config = &self.deps.config;
        let mut report = BatchReport::new(Uuid::new_v4(), config.cost_per_fresh_analysis);
        let run_id = report.run_id;

        // FETCHED
        let fetched = submissions.len() as u32;
        report.fetched = fetched;
        record_stage(&mut report, BatchStage::Fetched, fetched, 0, false);

        // FILTERED
        let (kept, degraded) = self.filter(submissions).await;
        let filtered_out = fetched.saturating_sub(kept.len() as u32);
        report.filtered_out = filtered_out;
        record_stage(&mut report, BatchStage::Filtered, kept.len() as u32, filtered_out, degraded);

        // CONCEPT_RESOLVED
        let ids: Vec<String> = kept.iter().map(|s| s.id.clone()).collect();
        let (concepts, degraded) = self.resolve_concepts(&ids).await;
        let resolved = concepts.len() as u32;
        report.concepts_resolved = resolved;
        record_stage(&mut report, BatchStage::ConceptResolved, resolved, 0, degraded);

        // ENRICHED
        let enriched = self.enrich_all(kept, &concepts).await;
        for item in &enriched {
            for kind in AnalysisKind::ALL {
                if item.is_fresh(kind) {
                    report.analyzed.increment(kind);
                } else if item.is_copied(kind) {
                    report.copied.increment(kind);
                } else if item.is_failed(kind) {
                    report.enrichment_failed.increment(kind);
                }
            }
        }
        let produced = report.analyzed.total() + report.copied.total();
        let enrichment_failed = report.enrichment_failed.total();
        record_stage(&mut report, BatchStage::Enriched, produced, enrichment_failed, false);

        // TRUST_MERGED
        let (opportunities, degraded) = self.merge_trust(enriched).await;
        let merged = opportunities.len() as u32;
        record_stage(&mut report, BatchStage::TrustMerged, merged, 0, degraded);

        // STORED
        if let Err(e) = self.deps.results.ensure_available().await {
            error!(%run_id, error = %e, "Result store unavailable, aborting batch");
            return Err(EnrichError::StoreUnavailable(e.to_string()));
        }
        let stored = self.store_all(opportunities).await;
        let stored_count = stored.len() as u32;
        report.stored = stored_count;
        report.failed = merged.saturating_sub(stored_count);
        let store_failed = report.failed;
        record_stage(&mut report, BatchStage::Stored, stored_count, store_failed, false);

        // METADATA_UPDATED
        let outcome = self.metadata.apply(&stored).await;
        report.metadata_updated = outcome.updated;
        report.metadata_failed = outcome.failed;
        record_stage(
            &mut report,
            BatchStage::MetadataUpdated,
            outcome.updated,
            outcome.failed,
            false,
        );

        // REPORTED
        report.finish();
        record_stage(&mut report, BatchStage::Reported, 1, 0, false);
        info!("{report}");
        if let Err(e) = self.deps.results.record_run(&report).await {
            warn!(%run_id, error = %e, "Failed to persist batch report");
        }

        Ok(report)
    }

    async fn filter(&self, submissions: Vec<Submission>) -> (Vec<Submission>, bool) {
        if submissions.is_empty() {
            return (submissions, false);
        }
        match self.deps.filter.filter(submissions.clone()).await {
            Ok(kept) => (kept, false),
            Err(e) => {
                warn!(
                    error = %e,
                    count = submissions.len(),
                    "Pre-filter failed, keeping all submissions"
                );
                (submissions, true)
            }
        }
    }

    async fn resolve_concepts(&self, ids: &[String]) -> (HashMap<String, ConceptMatch>, bool) {
        if ids.is_empty() {
            return (HashMap::new(), false);
        }
        match self.deps.concepts.concepts_for(ids).await {
            Ok(concepts) => (concepts, false),
            Err(e) => {
                warn!(
                    error = %e,
                    count = ids.len(),
                    "Concept lookup failed, analyzing every submission fresh"
                );
                (HashMap::new(), true)
            }
        }
    }

    async fn enrich_all(
        &self,
        submissions: Vec<Submission>,
        concepts: &HashMap<String, ConceptMatch>,
    ) -> Vec<EnrichedSubmission> {
        let enricher = &self.enricher;
        stream::iter(submissions.into_iter().map(|submission| {
            let concept = concepts.get(&submission.id).cloned();
            enricher.enrich(submission, concept)
        }))
        .buffer_unordered(self.deps.config.enrich_concurrency.max(1))
        .collect()
        .await
    }

    async fn merge_trust(&self, enriched: Vec<EnrichedSubmission>) -> (Vec<Opportunity>, bool) {
        let ids: Vec<String> = enriched.iter().map(|e| e.submission.id.clone()).collect();
        let (snapshots, degraded) = if ids.is_empty() {
            (HashMap::new(), false)
        } else {
            match self.deps.trust_snapshots.trust_snapshots(&ids).await {
                Ok(snapshots) => (snapshots, false),
                Err(e) => {
                    warn!(
                        error = %e,
                        count = ids.len(),
                        "Trust snapshot read failed, merging against empty snapshots"
                    );
                    (HashMap::new(), true)
                }
            }
        };

        let analyzed_at = Utc::now();
        let opportunities = enriched
            .into_iter()
            .map(|e| {
                let empty = TrustFields::default();
                let snapshot = snapshots.get(&e.submission.id).unwrap_or(&empty);
                Opportunity {
                    concept_id: e.concept.as_ref().map(|c| c.concept.id),
                    trust: trust::merge(&e.fresh_trust, snapshot),
                    submission_id: e.submission.id,
                    profile: e.profile,
                    monetization: e.monetization,
                    analyzed_at,
                }
            })
            .collect();
        (opportunities, degraded)
    }

    /// Store every opportunity; returns the ones that were persisted.
    async fn store_all(&self, opportunities: Vec<Opportunity>) -> Vec<Opportunity> {
        let results = &self.deps.results;
        let outcomes: Vec<Option<Opportunity>> =
            stream::iter(opportunities.into_iter().map(|opp| async move {
                match results.store(&opp).await {
                    Ok(()) => Some(opp),
                    Err(e) => {
                        warn!(
                            submission_id = opp.submission_id.as_str(),
                            error = %e,
                            "Failed to store opportunity"
                        );
                        None
                    }
                }
            }))
            .buffer_unordered(self.deps.config.store_concurrency.max(1))
            .collect()
            .await;
        outcomes.into_iter().flatten().collect()
    }
}

fn record_stage(
    report: &mut BatchReport,
    stage: BatchStage,
    succeeded: u32,
    failed: u32,
    degraded: bool,
) {
    info!(
        run_id = %report.run_id,
        stage = %stage,
        succeeded,
        failed,
        degraded,
        "Batch stage complete"
    );
    report.stages.push(StageOutcome {
        stage,
        succeeded,
        failed,
        degraded,
    });
}
