//! End-to-end batch scenarios against the in-memory store and scripted
//! analyzers. No network, no database.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use opportunity_common::{
    AnalysisKind, Config, EnrichError, KindOutcome, MonetizationOutput, Opportunity,
    PipelineConfig, ProfileOutput, TrustFields,
};
use opportunity_enrichment::bootstrap::run_next_batch;
use opportunity_enrichment::metadata::FreshAnalysis;
use opportunity_enrichment::testing::*;
use opportunity_enrichment::traits::{ConceptWriter, QualityFilter, ResultStore, TrustValidator};
use opportunity_enrichment::{BatchStage, EnrichmentDeps, Orchestrator};

struct Harness {
    store: Arc<MemoryStore>,
    log: CallLog,
    monetization: Arc<ScriptedMonetization>,
    profiler: Arc<ScriptedProfiler>,
    trust: Option<Arc<dyn TrustValidator>>,
    filter: Option<Arc<dyn QualityFilter>>,
    config: PipelineConfig,
}

impl Harness {
    fn new() -> Self {
        let log = CallLog::new();
        Self {
            store: Arc::new(MemoryStore::new()),
            monetization: Arc::new(ScriptedMonetization::new(log.clone())),
            profiler: Arc::new(ScriptedProfiler::new(log.clone())),
            log,
            trust: None,
            filter: None,
            config: PipelineConfig::default(),
        }
    }

    fn with_monetization(
        mut self,
        build: impl FnOnce(ScriptedMonetization) -> ScriptedMonetization,
    ) -> Self {
        self.monetization = Arc::new(build(ScriptedMonetization::new(self.log.clone())));
        self
    }

    fn with_trust(mut self, validator: FixedTrustValidator) -> Self {
        self.trust = Some(Arc::new(validator));
        self
    }

    fn with_filter(mut self, filter: ScriptedFilter) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    fn orchestrator(&self) -> Orchestrator {
        let filter: Arc<dyn QualityFilter> = match &self.filter {
            Some(filter) => filter.clone(),
            None => Arc::new(opportunity_enrichment::traits::AcceptAll),
        };
        Orchestrator::new(
            EnrichmentDeps::builder()
                .concepts(self.store.clone())
                .trust_snapshots(self.store.clone())
                .results(self.store.clone())
                .concept_writer(self.store.clone())
                .filter(filter)
                .monetization(self.monetization.clone())
                .profiler(self.profiler.clone())
                .trust_validator(self.trust.clone())
                .config(self.config.clone())
                .build(),
        )
    }

    /// Store `primary_id` with the given outputs and register it as the
    /// concept's primary for each kind it carries.
    async fn seed_primary(
        &self,
        concept_id: Uuid,
        primary_id: &str,
        monetization: Option<MonetizationOutput>,
        profile: Option<ProfileOutput>,
    ) {
        self.store.link(primary_id, concept_id);
        let opp = Opportunity {
            submission_id: primary_id.to_string(),
            concept_id: Some(concept_id),
            monetization: monetization
                .clone()
                .map_or(KindOutcome::Disabled, |output| KindOutcome::Fresh { output }),
            profile: profile
                .clone()
                .map_or(KindOutcome::Disabled, |output| KindOutcome::Fresh { output }),
            trust: TrustFields::default(),
            analyzed_at: Utc::now(),
        };
        self.store.store(&opp).await.unwrap();
        if let Some(output) = monetization {
            self.store
                .record_fresh_analysis(&FreshAnalysis {
                    concept_id,
                    submission_id: primary_id.to_string(),
                    kind: AnalysisKind::Monetization,
                    score: Some(output.wtp_score),
                })
                .await
                .unwrap();
        }
        if let Some(output) = profile {
            self.store
                .record_fresh_analysis(&FreshAnalysis {
                    concept_id,
                    submission_id: primary_id.to_string(),
                    kind: AnalysisKind::Profiling,
                    score: Some(output.opportunity_score),
                })
                .await
                .unwrap();
        }
    }
}

fn batch(ids: &[&str]) -> Vec<opportunity_common::Submission> {
    ids.iter().map(|id| submission(id)).collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_concept_runs_both_kinds_fresh() {
    let h = Harness::new();

    let report = h.orchestrator().run_batch(batch(&["t3_a"])).await.unwrap();

    assert_eq!(report.analyzed.monetization, 1);
    assert_eq!(report.analyzed.profiling, 1);
    assert_eq!(report.copied.total(), 0);
    assert_eq!(h.monetization.calls(), 1);
    assert_eq!(h.profiler.calls(), 1);

    let row = h.store.stored("t3_a").unwrap();
    assert!(!row.monetization_copied);
    assert!(!row.profile_copied);
    assert_eq!(row.concept_id, None);
}

#[tokio::test]
async fn known_concept_copies_monetization_and_feeds_fresh_profiling() {
    let h = Harness::new();
    let concept = h.store.add_concept("meal-planner-for-shift-workers");
    h.seed_primary(concept, "t3_first", Some(MonetizationOutput::with_score(72.0)), None)
        .await;
    h.store.link("t3_b", concept);

    let report = h.orchestrator().run_batch(batch(&["t3_b"])).await.unwrap();

    assert_eq!(h.monetization.calls(), 0);
    assert_eq!(report.copied.monetization, 1);
    assert_eq!(report.analyzed.profiling, 1);
    assert_eq!(
        h.profiler.evidence_for("t3_b"),
        Some(Some(MonetizationOutput::with_score(72.0).evidence()))
    );

    let row = h.store.stored("t3_b").unwrap();
    assert_eq!(row.monetization, Some(MonetizationOutput::with_score(72.0)));
    assert!(row.monetization_copied);
    assert!(!row.profile_copied);

    let c = h.store.concept(concept).unwrap();
    // Copies never touch the aggregate.
    assert_eq!(c.monetization.analysis_count, 1);
    assert!(c.has_profile_analysis);
    assert_eq!(c.primary_profile.as_deref(), Some("t3_b"));
    assert_eq!(c.primary_monetization.as_deref(), Some("t3_first"));
}

#[tokio::test]
async fn fresh_trust_merges_over_snapshot() {
    let h = Harness::new().with_trust(FixedTrustValidator::new().on(
        "t3_c",
        TrustFields {
            trust_score: Some(90.0),
            ..Default::default()
        },
    ));
    h.store.set_trust(
        "t3_c",
        TrustFields {
            trust_score: Some(85.5),
            badges: vec!["verified".into()],
            ..Default::default()
        },
    );

    h.orchestrator().run_batch(batch(&["t3_c"])).await.unwrap();

    let trust = h.store.stored("t3_c").unwrap().trust;
    assert_eq!(trust.trust_score, Some(90.0));
    assert_eq!(trust.badges, vec!["verified".to_string()]);
}

#[tokio::test]
async fn store_failure_skips_metadata_for_that_submission_only() {
    let h = Harness::new();
    let concept = h.store.add_concept("invoice-chaser");
    let ids = ["t3_1", "t3_2", "t3_x", "t3_4", "t3_5"];
    for id in ids {
        h.store.link(id, concept);
    }
    h.store.fail_store_for("t3_x");

    let report = h.orchestrator().run_batch(batch(&ids)).await.unwrap();

    assert_eq!(report.stored, 4);
    assert_eq!(report.failed, 1);
    let stored_stage = report.stage(BatchStage::Stored).unwrap();
    assert_eq!((stored_stage.succeeded, stored_stage.failed), (4, 1));

    let metadata: Vec<StoreEvent> = h
        .store
        .events()
        .into_iter()
        .filter(|e| matches!(e, StoreEvent::Metadata { .. }))
        .collect();
    assert_eq!(metadata.len(), 8);
    assert!(!metadata.iter().any(
        |e| matches!(e, StoreEvent::Metadata { submission_id, .. } if submission_id == "t3_x")
    ));
    assert_eq!(report.metadata_updated, 8);

    let c = h.store.concept(concept).unwrap();
    assert_eq!(c.monetization.analysis_count, 4);
    assert_eq!(c.profile.analysis_count, 4);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn copy_is_idempotent_across_runs() {
    let h = Harness::new();
    let concept = h.store.add_concept("receipt-scanner");
    h.seed_primary(concept, "t3_first", Some(MonetizationOutput::with_score(72.0)), None)
        .await;
    h.store.link("t3_b", concept);
    let orchestrator = h.orchestrator();

    orchestrator.run_batch(batch(&["t3_b"])).await.unwrap();
    let first = h.store.stored("t3_b").unwrap();
    orchestrator.run_batch(batch(&["t3_b"])).await.unwrap();
    let second = h.store.stored("t3_b").unwrap();

    assert_eq!(first.monetization, second.monetization);
    assert!(first.monetization_copied);
    assert!(second.monetization_copied);
    assert_eq!(h.monetization.calls(), 0);
}

#[tokio::test]
async fn batch_lookups_issue_one_query_each() {
    for (n, expected) in [(0usize, 0usize), (1, 1), (50, 1)] {
        let h = Harness::new();
        let ids: Vec<String> = (0..n).map(|i| format!("t3_{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let report = h.orchestrator().run_batch(batch(&refs)).await.unwrap();

        assert_eq!(report.fetched as usize, n);
        assert_eq!(h.store.concept_queries(), expected, "concept queries for N={n}");
        assert_eq!(h.store.trust_queries(), expected, "trust queries for N={n}");
    }
}

#[tokio::test]
async fn monetization_finishes_before_profiling_starts() {
    let h = Harness::new();
    let ids: Vec<String> = (0..10).map(|i| format!("t3_{i}")).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    h.orchestrator().run_batch(batch(&refs)).await.unwrap();

    let expected = monetization_output(50.0).evidence();
    for id in &refs {
        assert!(h.log.finished_before(
            &CallEvent::finished(AnalysisKind::Monetization, id),
            &CallEvent::started(AnalysisKind::Profiling, id),
        ));
        assert_eq!(h.profiler.evidence_for(id), Some(Some(expected.clone())));
    }
}

#[tokio::test]
async fn report_accounts_for_copies_and_cost() {
    let h = Harness::new().with_config(
        PipelineConfig::builder()
            .cost_per_fresh_analysis(0.5)
            .build(),
    );
    let concept = h.store.add_concept("dog-walking-scheduler");
    h.seed_primary(
        concept,
        "t3_first",
        Some(monetization_output(70.0)),
        Some(profile_output(80.0)),
    )
    .await;
    for id in ["t3_b", "t3_c", "t3_d"] {
        h.store.link(id, concept);
    }

    let report = h
        .orchestrator()
        .run_batch(batch(&["t3_b", "t3_c", "t3_d", "t3_new"]))
        .await
        .unwrap();

    assert_eq!(report.copied.total(), 6);
    assert_eq!(report.analyzed.total(), 2);
    assert_eq!(report.dedup_rate, 0.75);
    assert_eq!(report.cost_saved, 3.0);
    assert_eq!(h.store.runs().len(), 1);
    assert_eq!(h.store.runs()[0].run_id, report.run_id);
}

#[tokio::test]
async fn unavailable_store_fails_the_batch() {
    let h = Harness::new();
    let concept = h.store.add_concept("budget-app");
    h.store.link("t3_a", concept);
    h.store.set_unavailable();

    let result = h.orchestrator().run_batch(batch(&["t3_a"])).await;

    assert!(matches!(result, Err(EnrichError::StoreUnavailable(_))));
    assert!(h.store.runs().is_empty());
    assert!(!h.store.concept(concept).unwrap().has_monetization_analysis);
}

// ---------------------------------------------------------------------------
// Degraded paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concept_lookup_failure_runs_everything_fresh() {
    let h = Harness::new();
    let concept = h.store.add_concept("plant-care");
    h.seed_primary(concept, "t3_first", Some(MonetizationOutput::with_score(72.0)), None)
        .await;
    h.store.link("t3_b", concept);
    h.store.fail_concept_lookup();

    let report = h.orchestrator().run_batch(batch(&["t3_b"])).await.unwrap();

    assert_eq!(report.copied.total(), 0);
    assert_eq!(h.monetization.calls(), 1);
    assert!(report.stage(BatchStage::ConceptResolved).unwrap().degraded);
    assert_eq!(report.stored, 1);
    assert_eq!(h.store.stored("t3_b").unwrap().concept_id, None);
}

#[tokio::test]
async fn trust_read_failure_keeps_stored_trust() {
    let h = Harness::new();
    let snapshot = TrustFields {
        trust_score: Some(85.5),
        trust_level: Some("high".into()),
        activity_score: Some(12.0),
        badges: vec!["verified".into()],
    };
    h.store.set_trust("t3_a", snapshot.clone());
    h.store.fail_trust_lookup();

    let report = h.orchestrator().run_batch(batch(&["t3_a"])).await.unwrap();

    assert!(report.stage(BatchStage::TrustMerged).unwrap().degraded);
    assert_eq!(h.store.stored("t3_a").unwrap().trust, snapshot);
}

#[tokio::test]
async fn prefilter_failure_fails_open() {
    let h = Harness::new().with_filter(ScriptedFilter::failing());

    let report = h
        .orchestrator()
        .run_batch(batch(&["t3_a", "t3_b"]))
        .await
        .unwrap();

    assert_eq!(report.filtered_out, 0);
    assert_eq!(report.stored, 2);
    assert!(report.stage(BatchStage::Filtered).unwrap().degraded);
}

#[tokio::test]
async fn prefilter_rejections_are_counted() {
    let h = Harness::new().with_filter(ScriptedFilter::rejecting(&["t3_spam"]));

    let report = h
        .orchestrator()
        .run_batch(batch(&["t3_a", "t3_spam"]))
        .await
        .unwrap();

    assert_eq!(report.filtered_out, 1);
    assert_eq!(report.stored, 1);
    assert!(h.store.stored("t3_spam").is_none());
}

#[tokio::test]
async fn deleted_primary_falls_back_to_fresh_and_is_replaced() {
    let h = Harness::new();
    let concept = h.store.add_concept("gym-buddy-finder");
    h.seed_primary(concept, "t3_first", Some(MonetizationOutput::with_score(72.0)), None)
        .await;
    h.store.delete("t3_first");
    h.store.link("t3_b", concept);

    let report = h.orchestrator().run_batch(batch(&["t3_b"])).await.unwrap();

    assert_eq!(report.analyzed.monetization, 1);
    assert_eq!(h.monetization.calls(), 1);
    let c = h.store.concept(concept).unwrap();
    assert_eq!(c.primary_monetization.as_deref(), Some("t3_b"));
    assert_eq!(c.monetization.analysis_count, 2);
}

#[tokio::test]
async fn failed_monetization_is_never_promoted_to_primary() {
    let h = Harness::new().with_monetization(|m| m.failing("t3_a", "rate limited"));
    let concept = h.store.add_concept("tenant-rights-helper");
    h.store.link("t3_a", concept);

    let report = h.orchestrator().run_batch(batch(&["t3_a"])).await.unwrap();

    assert_eq!(report.enrichment_failed.monetization, 1);
    assert_eq!(h.profiler.evidence_for("t3_a"), Some(None));

    let row = h.store.stored("t3_a").unwrap();
    assert_eq!(row.monetization, None);
    assert!(row.profile.is_some());

    let c = h.store.concept(concept).unwrap();
    assert!(!c.has_monetization_analysis);
    assert_eq!(c.primary_monetization, None);
    assert_eq!(c.primary_profile.as_deref(), Some("t3_a"));
}

#[tokio::test]
async fn disabled_kinds_are_neither_run_nor_counted() {
    let h = Harness::new().with_config(PipelineConfig::builder().enable_profiling(false).build());

    let report = h.orchestrator().run_batch(batch(&["t3_a"])).await.unwrap();

    assert_eq!(h.profiler.calls(), 0);
    assert_eq!(report.analyzed.profiling, 0);
    assert_eq!(report.enrichment_failed.profiling, 0);
    assert_eq!(report.analyzed.monetization, 1);
}

#[tokio::test]
async fn run_fetches_from_source_up_to_limit() {
    let h = Harness::new();
    let source = VecSource::new(batch(&["t3_a", "t3_b", "t3_c"]));

    let report = h.orchestrator().run(&source, 2).await.unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.stored, 2);
    assert_eq!(
        report.stages.last().map(|s| s.stage),
        Some(BatchStage::Reported)
    );
}

#[tokio::test]
async fn configured_batch_size_bounds_each_run() {
    let h = Harness::new();
    let source = VecSource::new(batch(&["t3_a", "t3_b", "t3_c", "t3_d", "t3_e"]));
    let config = Config {
        database_url: "postgres://localhost/unused".into(),
        batch_size: 3,
        pipeline: PipelineConfig::default(),
    };

    let report = run_next_batch(&h.orchestrator(), &source, &config).await.unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.stored, 3);
    assert_eq!(h.monetization.calls(), 3);
}
