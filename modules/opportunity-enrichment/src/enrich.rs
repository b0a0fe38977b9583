//! Per-submission enrichment in two explicit phases.
//!
//! Phase 1 resolves Monetization (copy or fresh). Phase 2 resolves Profiling,
//! handing it phase 1's evidence whenever phase 1 produced output. Trust
//! validation runs alongside both phases; it has no ordering constraint.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::warn;

use opportunity_common::{
    AnalysisKind, ConceptMatch, KindOutcome, MonetizationEvidence, MonetizationOutput,
    PipelineConfig, ProfileOutput, Submission, TrustFields,
};

use crate::skip::{MONETIZATION, PROFILING};
use crate::traits::{MonetizationAnalyzer, Profiler, TrustValidator};

/// Everything the enrichment stage learned about one submission.
#[derive(Debug, Clone)]
pub struct EnrichedSubmission {
    pub submission: Submission,
    pub concept: Option<ConceptMatch>,
    pub monetization: KindOutcome<MonetizationOutput>,
    pub profile: KindOutcome<ProfileOutput>,
    /// Freshly validated trust fields; empty when no validator is configured
    /// or validation failed.
    pub fresh_trust: TrustFields,
}

impl EnrichedSubmission {
    pub fn is_copied(&self, kind: AnalysisKind) -> bool {
        match kind {
            AnalysisKind::Monetization => self.monetization.copied_from_primary(),
            AnalysisKind::Profiling => self.profile.copied_from_primary(),
        }
    }

    pub fn is_fresh(&self, kind: AnalysisKind) -> bool {
        match kind {
            AnalysisKind::Monetization => self.monetization.is_fresh(),
            AnalysisKind::Profiling => self.profile.is_fresh(),
        }
    }

    pub fn is_failed(&self, kind: AnalysisKind) -> bool {
        match kind {
            AnalysisKind::Monetization => self.monetization.is_failed(),
            AnalysisKind::Profiling => self.profile.is_failed(),
        }
    }
}

pub struct Enricher {
    monetization: Arc<dyn MonetizationAnalyzer>,
    profiler: Arc<dyn Profiler>,
    trust_validator: Option<Arc<dyn TrustValidator>>,
    config: PipelineConfig,
}

impl Enricher {
    pub fn new(
        monetization: Arc<dyn MonetizationAnalyzer>,
        profiler: Arc<dyn Profiler>,
        trust_validator: Option<Arc<dyn TrustValidator>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            monetization,
            profiler,
            trust_validator,
            config,
        }
    }

    pub async fn enrich(
        &self,
        submission: Submission,
        concept: Option<ConceptMatch>,
    ) -> EnrichedSubmission {
        let ((monetization, profile), fresh_trust) = tokio::join!(
            self.analyze(&submission, concept.as_ref()),
            self.validate_trust(&submission),
        );

        EnrichedSubmission {
            submission,
            concept,
            monetization,
            profile,
            fresh_trust,
        }
    }

    async fn analyze(
        &self,
        submission: &Submission,
        concept: Option<&ConceptMatch>,
    ) -> (KindOutcome<MonetizationOutput>, KindOutcome<ProfileOutput>) {
        let timeout = self.config.analysis_timeout();
        let id = submission.id.as_str();

        // Phase 1
        let monetization = if self.config.is_enabled(AnalysisKind::Monetization) {
            MONETIZATION
                .resolve(id, concept, || {
                    with_timeout(timeout, self.monetization.analyze(submission))
                })
                .await
        } else {
            KindOutcome::Disabled
        };

        // Phase 2
        let evidence: Option<MonetizationEvidence> =
            monetization.output().map(MonetizationOutput::evidence);
        let profile = if self.config.is_enabled(AnalysisKind::Profiling) {
            PROFILING
                .resolve(id, concept, || {
                    with_timeout(timeout, self.profiler.analyze(submission, evidence.as_ref()))
                })
                .await
        } else {
            KindOutcome::Disabled
        };

        (monetization, profile)
    }

    async fn validate_trust(&self, submission: &Submission) -> TrustFields {
        let Some(validator) = &self.trust_validator else {
            return TrustFields::default();
        };
        match with_timeout(self.config.analysis_timeout(), validator.validate(submission)).await {
            Ok(fields) => fields,
            Err(e) => {
                warn!(
                    submission_id = submission.id.as_str(),
                    error = %e,
                    "Trust validation failed, keeping stored trust"
                );
                TrustFields::default()
            }
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| anyhow!("timed out after {}ms", limit.as_millis()))?
}

#[cfg(test)]
mod chain_tests {
    //! MOCK → ENRICH → OUTCOME: evidence flow between the two phases.

    use std::sync::Arc;

    use super::*;
    use crate::testing::*;

    fn enricher(
        monetization: Arc<ScriptedMonetization>,
        profiler: Arc<ScriptedProfiler>,
        config: PipelineConfig,
    ) -> Enricher {
        Enricher::new(monetization, profiler, None, config)
    }

    #[tokio::test]
    async fn fresh_profiling_receives_fresh_monetization_evidence() {
        let log = CallLog::new();
        let monetization = Arc::new(
            ScriptedMonetization::new(log.clone()).on("t3_a", monetization_output(64.0)),
        );
        let profiler = Arc::new(ScriptedProfiler::new(log.clone()));
        let enricher = enricher(monetization.clone(), profiler.clone(), PipelineConfig::default());

        let enriched = enricher.enrich(submission("t3_a"), None).await;

        assert!(enriched.monetization.is_fresh());
        assert!(enriched.profile.is_fresh());
        let expected = monetization_output(64.0).evidence();
        assert_eq!(profiler.evidence_for("t3_a"), Some(Some(expected)));
        assert!(log.finished_before(
            &CallEvent::finished(AnalysisKind::Monetization, "t3_a"),
            &CallEvent::started(AnalysisKind::Profiling, "t3_a"),
        ));
    }

    #[tokio::test]
    async fn copied_monetization_still_feeds_fresh_profiling() {
        let log = CallLog::new();
        let monetization = Arc::new(ScriptedMonetization::new(log.clone()));
        let profiler = Arc::new(ScriptedProfiler::new(log.clone()));
        let enricher = enricher(monetization.clone(), profiler.clone(), PipelineConfig::default());

        let concept = concept_with_monetization_primary("t3_first", 72.0);
        let enriched = enricher.enrich(submission("t3_b"), Some(concept)).await;

        assert!(enriched.monetization.copied_from_primary());
        assert_eq!(monetization.calls(), 0);
        assert!(enriched.profile.is_fresh());
        assert_eq!(
            profiler.evidence_for("t3_b"),
            Some(Some(MonetizationOutput::with_score(72.0).evidence()))
        );
    }

    #[tokio::test]
    async fn copied_profiling_makes_no_profiler_call() {
        let log = CallLog::new();
        let monetization = Arc::new(ScriptedMonetization::new(log.clone()));
        let profiler = Arc::new(ScriptedProfiler::new(log.clone()));
        let enricher = enricher(monetization.clone(), profiler.clone(), PipelineConfig::default());

        let concept = concept_with_both_primaries("t3_first", 72.0, 81.0);
        let enriched = enricher.enrich(submission("t3_c"), Some(concept)).await;

        assert!(enriched.monetization.copied_from_primary());
        assert!(enriched.profile.copied_from_primary());
        assert_eq!(monetization.calls(), 0);
        assert_eq!(profiler.calls(), 0);
    }

    #[tokio::test]
    async fn failed_monetization_gives_profiler_no_evidence() {
        let log = CallLog::new();
        let monetization =
            Arc::new(ScriptedMonetization::new(log.clone()).failing("t3_d", "rate limited"));
        let profiler = Arc::new(ScriptedProfiler::new(log.clone()));
        let enricher = enricher(monetization.clone(), profiler.clone(), PipelineConfig::default());

        let enriched = enricher.enrich(submission("t3_d"), None).await;

        assert!(enriched.monetization.is_failed());
        assert!(enriched.profile.is_fresh());
        assert_eq!(profiler.evidence_for("t3_d"), Some(None));
    }

    #[tokio::test]
    async fn disabled_monetization_is_not_called() {
        let log = CallLog::new();
        let monetization = Arc::new(ScriptedMonetization::new(log.clone()));
        let profiler = Arc::new(ScriptedProfiler::new(log.clone()));
        let config = PipelineConfig::builder().enable_monetization(false).build();
        let enricher = enricher(monetization.clone(), profiler.clone(), config);

        let enriched = enricher.enrich(submission("t3_e"), None).await;

        assert_eq!(enriched.monetization, KindOutcome::Disabled);
        assert_eq!(monetization.calls(), 0);
        assert_eq!(profiler.evidence_for("t3_e"), Some(None));
    }

    #[tokio::test]
    async fn slow_analysis_times_out_as_failure() {
        let log = CallLog::new();
        let monetization = Arc::new(
            ScriptedMonetization::new(log.clone()).with_delay(Duration::from_millis(200)),
        );
        let profiler = Arc::new(ScriptedProfiler::new(log.clone()));
        let config = PipelineConfig::builder().analysis_timeout_ms(20).build();
        let enricher = enricher(monetization, profiler, config);

        let enriched = enricher.enrich(submission("t3_f"), None).await;

        match &enriched.monetization {
            KindOutcome::Failed { reason } => {
                assert!(reason.contains("timed out after 20ms"), "{reason}")
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn trust_validator_failure_yields_empty_fresh_trust() {
        let log = CallLog::new();
        let enricher = Enricher::new(
            Arc::new(ScriptedMonetization::new(log.clone())),
            Arc::new(ScriptedProfiler::new(log)),
            Some(Arc::new(FixedTrustValidator::new().failing("t3_g"))),
            PipelineConfig::default(),
        );

        let enriched = enricher.enrich(submission("t3_g"), None).await;

        assert!(enriched.fresh_trust.is_empty());
    }
}
