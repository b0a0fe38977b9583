use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use opportunity_common::AnalysisKind;

use crate::orchestrator::BatchStage;

/// Per-kind counter pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub monetization: u32,
    pub profiling: u32,
}

impl KindCounts {
    pub fn get(&self, kind: AnalysisKind) -> u32 {
        match kind {
            AnalysisKind::Monetization => self.monetization,
            AnalysisKind::Profiling => self.profiling,
        }
    }

    pub fn increment(&mut self, kind: AnalysisKind) {
        match kind {
            AnalysisKind::Monetization => self.monetization += 1,
            AnalysisKind::Profiling => self.profiling += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.monetization + self.profiling
    }
}

/// Typed outcome of one orchestrator stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: BatchStage,
    pub succeeded: u32,
    pub failed: u32,
    /// The stage's collaborator failed and the stage fell back to a default.
    pub degraded: bool,
}

/// Report emitted when a batch reaches REPORTED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: u32,
    pub filtered_out: u32,
    pub concepts_resolved: u32,
    /// Fresh successful analyses.
    pub analyzed: KindCounts,
    /// Outputs copied from a concept primary.
    pub copied: KindCounts,
    /// Fresh analyses that errored, timed out, or came back empty.
    pub enrichment_failed: KindCounts,
    pub stored: u32,
    pub failed: u32,
    pub metadata_updated: u32,
    pub metadata_failed: u32,
    pub cost_per_fresh_analysis: f64,
    pub dedup_rate: f64,
    pub cost_saved: f64,
    pub stages: Vec<StageOutcome>,
}

impl BatchReport {
    pub fn new(run_id: Uuid, cost_per_fresh_analysis: f64) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            fetched: 0,
            filtered_out: 0,
            concepts_resolved: 0,
            analyzed: KindCounts::default(),
            copied: KindCounts::default(),
            enrichment_failed: KindCounts::default(),
            stored: 0,
            failed: 0,
            metadata_updated: 0,
            metadata_failed: 0,
            cost_per_fresh_analysis,
            dedup_rate: 0.0,
            cost_saved: 0.0,
            stages: Vec::new(),
        }
    }

    /// Stamp the finish time and derive dedup rate and cost saved.
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.dedup_rate = dedup_rate(self.copied.total(), self.analyzed.total());
        self.cost_saved = cost_saved(self.copied.total(), self.cost_per_fresh_analysis);
    }

    pub fn stage(&self, stage: BatchStage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// `copied / (copied + analyzed)`, or 0 when nothing was analyzed or copied.
pub fn dedup_rate(copied: u32, analyzed: u32) -> f64 {
    let total = copied + analyzed;
    if total == 0 {
        return 0.0;
    }
    copied as f64 / total as f64
}

pub fn cost_saved(copied: u32, cost_per_fresh_analysis: f64) -> f64 {
    copied as f64 * cost_per_fresh_analysis
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Enrichment Batch Complete ===")?;
        writeln!(f, "Run:                {}", self.run_id)?;
        writeln!(f, "Fetched:            {}", self.fetched)?;
        writeln!(f, "Filtered out:       {}", self.filtered_out)?;
        writeln!(f, "Concepts resolved:  {}", self.concepts_resolved)?;
        writeln!(f, "\nBy kind:             fresh  copied  failed")?;
        for kind in AnalysisKind::ALL {
            writeln!(
                f,
                "  {:<17} {:>5}  {:>6}  {:>6}",
                kind.as_str(),
                self.analyzed.get(kind),
                self.copied.get(kind),
                self.enrichment_failed.get(kind)
            )?;
        }
        writeln!(f, "\nStored:             {}", self.stored)?;
        writeln!(f, "Store failures:     {}", self.failed)?;
        writeln!(f, "Metadata updated:   {}", self.metadata_updated)?;
        writeln!(f, "Metadata failures:  {}", self.metadata_failed)?;
        writeln!(f, "\nDedup rate:         {:.1}%", self.dedup_rate * 100.0)?;
        writeln!(f, "Cost saved:         ${:.2}", self.cost_saved)?;
        let degraded: Vec<String> = self
            .stages
            .iter()
            .filter(|s| s.degraded)
            .map(|s| s.stage.to_string())
            .collect();
        if !degraded.is_empty() {
            writeln!(f, "\nDegraded stages:    {}", degraded.join(", "))?;
        }
        Ok(())
    }
}
