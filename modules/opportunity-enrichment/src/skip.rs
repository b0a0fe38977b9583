//! Skip logic: per analysis kind, copy the concept's primary output or run
//! the enrichment service fresh.

use std::future::Future;
use std::marker::PhantomData;

use tracing::{debug, warn};

use opportunity_common::{
    AnalysisKind, AnalysisOutput, ConceptMatch, KindOutcome, MonetizationOutput, ProfileOutput,
};

/// Why a unit chose to run fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshReason {
    /// The submission has no resolvable concept (or the lookup failed).
    NoConcept,
    /// The concept has never had a fresh analysis of this kind.
    FlagUnset,
    /// The flag is set but no primary opportunity is declared.
    NoPrimary,
    /// The declared primary has no stored output.
    PrimaryMissing,
    /// The declared primary's output is empty.
    PrimaryEmpty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    RunFresh(FreshReason),
    Copy { primary: String },
}

/// Skip-logic unit for one analysis kind, selected by its output type.
pub struct SkipUnit<T> {
    _output: PhantomData<fn() -> T>,
}

pub const MONETIZATION: SkipUnit<MonetizationOutput> = SkipUnit::new();
pub const PROFILING: SkipUnit<ProfileOutput> = SkipUnit::new();

impl<T> SkipUnit<T> {
    pub const fn new() -> Self {
        Self {
            _output: PhantomData,
        }
    }
}

impl<T: AnalysisOutput> SkipUnit<T> {
    pub fn kind(&self) -> AnalysisKind {
        T::KIND
    }

    /// COPY iff the concept resolved, its flag for this kind is set, a
    /// primary is declared, and that primary's output exists and is non-empty.
    pub fn decide(&self, concept: Option<&ConceptMatch>) -> SkipDecision {
        let Some(matched) = concept else {
            return SkipDecision::RunFresh(FreshReason::NoConcept);
        };
        if !matched.concept.has_analysis(T::KIND) {
            return SkipDecision::RunFresh(FreshReason::FlagUnset);
        }
        let Some(primary) = matched.concept.primary(T::KIND) else {
            return SkipDecision::RunFresh(FreshReason::NoPrimary);
        };
        match T::primary_of(matched) {
            None => SkipDecision::RunFresh(FreshReason::PrimaryMissing),
            Some(output) if output.is_empty() => SkipDecision::RunFresh(FreshReason::PrimaryEmpty),
            Some(_) => SkipDecision::Copy {
                primary: primary.to_string(),
            },
        }
    }

    /// Deep copy of the concept's primary output. The clone owns all of its
    /// nested data, so editing it never touches the concept's copy.
    pub fn clone_primary(&self, concept: &ConceptMatch) -> Option<T> {
        T::primary_of(concept).cloned()
    }

    /// Decide, then either clone the primary or await `run_fresh`.
    ///
    /// A fresh run that errors or returns an empty payload becomes
    /// `KindOutcome::Failed`, which is never stored as output and so can
    /// never become a primary.
    pub async fn resolve<F, Fut>(
        &self,
        submission_id: &str,
        concept: Option<&ConceptMatch>,
        run_fresh: F,
    ) -> KindOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let kind = self.kind();
        let decision = self.decide(concept);

        if let (SkipDecision::Copy { primary }, Some(matched)) = (&decision, concept) {
            if let Some(output) = self.clone_primary(matched) {
                debug!(
                    submission_id,
                    kind = %kind,
                    primary = primary.as_str(),
                    "Copied primary output"
                );
                return KindOutcome::Copied {
                    primary: primary.clone(),
                    output,
                };
            }
        }

        match decision {
            SkipDecision::RunFresh(
                reason @ (FreshReason::PrimaryMissing | FreshReason::PrimaryEmpty),
            ) => {
                warn!(
                    submission_id,
                    kind = %kind,
                    ?reason,
                    "Declared primary unusable, running fresh"
                );
            }
            SkipDecision::RunFresh(reason) => {
                debug!(submission_id, kind = %kind, ?reason, "Running fresh analysis");
            }
            SkipDecision::Copy { .. } => {}
        }

        match run_fresh().await {
            Ok(output) if output.is_empty() => {
                warn!(submission_id, kind = %kind, "Analysis returned empty output");
                KindOutcome::Failed {
                    reason: "empty output".to_string(),
                }
            }
            Ok(output) => KindOutcome::Fresh { output },
            Err(e) => {
                warn!(submission_id, kind = %kind, error = %e, "Analysis failed");
                KindOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
