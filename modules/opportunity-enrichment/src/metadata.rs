//! Concept metadata updates after a successful store.
//!
//! Only fresh, non-empty outputs touch a concept. Updates are grouped by
//! concept: within a group they run one after another, across groups they run
//! concurrently. The ConceptWriter applies each update atomically, so two
//! batches racing on one concept still lose no increments.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use opportunity_common::{AnalysisKind, AnalysisOutput, Opportunity};

use crate::traits::ConceptWriter;

/// One fresh analysis to fold into its concept.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshAnalysis {
    pub concept_id: Uuid,
    pub submission_id: String,
    pub kind: AnalysisKind,
    pub score: Option<f64>,
}

/// Fresh, non-empty analyses of stored opportunities that belong to a concept.
pub fn fresh_analyses(stored: &[Opportunity]) -> Vec<FreshAnalysis> {
    let mut updates = Vec::new();
    for opp in stored {
        let Some(concept_id) = opp.concept_id else {
            continue;
        };
        if let Some(output) = opp.monetization.fresh_output().filter(|o| !o.is_empty()) {
            updates.push(FreshAnalysis {
                concept_id,
                submission_id: opp.submission_id.clone(),
                kind: AnalysisKind::Monetization,
                score: output.aggregate_score(),
            });
        }
        if let Some(output) = opp.profile.fresh_output().filter(|o| !o.is_empty()) {
            updates.push(FreshAnalysis {
                concept_id,
                submission_id: opp.submission_id.clone(),
                kind: AnalysisKind::Profiling,
                score: output.aggregate_score(),
            });
        }
    }
    updates
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataOutcome {
    pub updated: u32,
    pub failed: u32,
    pub concepts_touched: u32,
}

pub struct ConceptMetadataUpdater {
    writer: Arc<dyn ConceptWriter>,
    concurrency: usize,
}

impl ConceptMetadataUpdater {
    pub fn new(writer: Arc<dyn ConceptWriter>, concurrency: usize) -> Self {
        Self {
            writer,
            concurrency: concurrency.max(1),
        }
    }

    /// Best-effort: every failure is logged and counted, none propagates.
    pub async fn apply(&self, stored: &[Opportunity]) -> MetadataOutcome {
        let mut by_concept: BTreeMap<Uuid, Vec<FreshAnalysis>> = BTreeMap::new();
        for update in fresh_analyses(stored) {
            by_concept.entry(update.concept_id).or_default().push(update);
        }

        let concepts_touched = by_concept.len() as u32;
        let writer = &self.writer;

        let results: Vec<(u32, u32)> = stream::iter(
            by_concept
                .into_values()
                .map(|group| async move { apply_group(writer.as_ref(), &group).await }),
        )
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        let (updated, failed) = results
            .into_iter()
            .fold((0, 0), |(u, f), (gu, gf)| (u + gu, f + gf));

        MetadataOutcome {
            updated,
            failed,
            concepts_touched,
        }
    }
}

/// Apply one concept's updates in order. Returns (updated, failed).
async fn apply_group(writer: &dyn ConceptWriter, group: &[FreshAnalysis]) -> (u32, u32) {
    let mut updated = 0;
    let mut failed = 0;
    for update in group {
        match writer.record_fresh_analysis(update).await {
            Ok(()) => {
                debug!(
                    concept_id = %update.concept_id,
                    submission_id = update.submission_id.as_str(),
                    kind = %update.kind,
                    "Concept metadata updated"
                );
                updated += 1;
            }
            Err(e) => {
                warn!(
                    concept_id = %update.concept_id,
                    submission_id = update.submission_id.as_str(),
                    kind = %update.kind,
                    error = %e,
                    "Concept metadata update failed, continuing"
                );
                failed += 1;
            }
        }
    }
    (updated, failed)
}
