use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Submission ---

/// One collected text item. Written by the collector; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub title: String,
    pub body: String,
    /// Source grouping label (the community or board the item was posted to).
    pub community: String,
    pub score: i64,
    pub num_comments: i64,
    pub created_at: DateTime<Utc>,
}

// --- Analysis kinds ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Monetization,
    Profiling,
}

impl AnalysisKind {
    /// Execution order within one submission. Profiling consumes Monetization
    /// evidence, so Monetization always comes first.
    pub const ALL: [AnalysisKind; 2] = [AnalysisKind::Monetization, AnalysisKind::Profiling];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Monetization => "monetization",
            AnalysisKind::Profiling => "profiling",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared behavior of per-kind analysis payloads.
pub trait AnalysisOutput: Clone + fmt::Debug + JsonSchema + Send + Sync + 'static {
    const KIND: AnalysisKind;

    /// JSON schema an enrichment service is asked to answer in.
    fn output_schema() -> serde_json::Value {
        let mut value = serde_json::to_value(schema_for!(Self)).unwrap_or_default();
        if let serde_json::Value::Object(map) = &mut value {
            map.remove("$schema");
        }
        value
    }

    /// True when the payload carries nothing worth storing or copying.
    fn is_empty(&self) -> bool;

    /// Value folded into the concept's running aggregate for this kind.
    fn aggregate_score(&self) -> Option<f64>;

    /// The concept's stored primary output of this kind, if any.
    fn primary_of(concept: &ConceptMatch) -> Option<&Self>;
}

/// Problem/audience profile of a submission.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProfileOutput {
    /// One or two sentence statement of the underlying problem.
    pub problem_summary: String,
    /// Who experiences the problem.
    pub target_audience: String,
    /// Core functions a product addressing the problem would need.
    #[serde(default)]
    pub core_functions: Vec<String>,
    /// Overall opportunity score, 0-100.
    pub opportunity_score: f64,
    /// Per-dimension breakdown (e.g. "market_demand", "pain_intensity").
    #[serde(default)]
    pub dimension_scores: BTreeMap<String, f64>,
}

impl AnalysisOutput for ProfileOutput {
    const KIND: AnalysisKind = AnalysisKind::Profiling;

    fn is_empty(&self) -> bool {
        self.problem_summary.trim().is_empty() && self.core_functions.is_empty()
    }

    fn aggregate_score(&self) -> Option<f64> {
        self.opportunity_score
            .is_finite()
            .then_some(self.opportunity_score)
    }

    fn primary_of(concept: &ConceptMatch) -> Option<&Self> {
        concept.primary_profile_output.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PricePoint {
    pub label: String,
    pub amount: f64,
    pub currency: String,
    /// Billing period ("month", "year", "one_time").
    pub period: Option<String>,
}

/// Willingness-to-pay and revenue analysis of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonetizationOutput {
    /// Willingness-to-pay score, 0-100.
    pub wtp_score: f64,
    pub revenue_model: Option<String>,
    #[serde(default)]
    pub price_points: Vec<PricePoint>,
    #[serde(default)]
    pub customer_segments: Vec<String>,
    /// Verbatim phrases that indicate payment intent.
    #[serde(default)]
    pub signals: Vec<String>,
}

impl MonetizationOutput {
    /// A bare output carrying only a WTP score.
    pub fn with_score(wtp_score: f64) -> Self {
        Self {
            wtp_score,
            revenue_model: None,
            price_points: Vec::new(),
            customer_segments: Vec::new(),
            signals: Vec::new(),
        }
    }

    /// The structured evidence the profiler consumes.
    pub fn evidence(&self) -> MonetizationEvidence {
        MonetizationEvidence {
            wtp_score: self.wtp_score,
            revenue_model: self.revenue_model.clone(),
            customer_segments: self.customer_segments.clone(),
            signals: self.signals.clone(),
        }
    }
}

impl AnalysisOutput for MonetizationOutput {
    const KIND: AnalysisKind = AnalysisKind::Monetization;

    fn is_empty(&self) -> bool {
        !self.wtp_score.is_finite()
            && self.revenue_model.as_deref().map_or(true, |m| m.trim().is_empty())
            && self.price_points.is_empty()
            && self.signals.is_empty()
    }

    fn aggregate_score(&self) -> Option<f64> {
        self.wtp_score.is_finite().then_some(self.wtp_score)
    }

    fn primary_of(concept: &ConceptMatch) -> Option<&Self> {
        concept.primary_monetization_output.as_ref()
    }
}

/// Monetization findings handed to the profiler for the same submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonetizationEvidence {
    pub wtp_score: f64,
    pub revenue_model: Option<String>,
    pub customer_segments: Vec<String>,
    pub signals: Vec<String>,
}

/// Per-kind result of one enrichment pass for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KindOutcome<T> {
    /// The kind is switched off for this run.
    Disabled,
    /// Computed by the enrichment service during this run.
    Fresh { output: T },
    /// Cloned from the concept's primary opportunity.
    Copied { primary: String, output: T },
    /// The enrichment service errored or returned an empty payload.
    Failed { reason: String },
}

impl<T> KindOutcome<T> {
    pub fn output(&self) -> Option<&T> {
        match self {
            KindOutcome::Fresh { output } | KindOutcome::Copied { output, .. } => Some(output),
            KindOutcome::Disabled | KindOutcome::Failed { .. } => None,
        }
    }

    pub fn copied_from_primary(&self) -> bool {
        matches!(self, KindOutcome::Copied { .. })
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, KindOutcome::Fresh { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, KindOutcome::Failed { .. })
    }

    /// The freshly computed output, if this run computed one.
    pub fn fresh_output(&self) -> Option<&T> {
        match self {
            KindOutcome::Fresh { output } => Some(output),
            _ => None,
        }
    }
}

// --- Business concepts ---

/// Running aggregate for one analysis kind on a concept.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KindStats {
    /// Every fresh analysis, scored or not.
    pub analysis_count: i64,
    /// Fresh analyses that produced a finite score; the weight of `score_avg`.
    pub scored_count: i64,
    pub score_avg: Option<f64>,
}

impl KindStats {
    /// Fold one fresh analysis in. Only finite scores move the mean.
    pub fn record(&mut self, score: Option<f64>) {
        if let Some(score) = score.filter(|s| s.is_finite()) {
            let n = self.scored_count as f64;
            let avg = self.score_avg.unwrap_or(0.0);
            self.score_avg = Some((avg * n + score) / (n + 1.0));
            self.scored_count += 1;
        }
        self.analysis_count += 1;
    }
}

/// Canonical idea cluster shared by many submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessConcept {
    pub id: Uuid,
    pub fingerprint: String,
    pub first_seen_at: DateTime<Utc>,
    pub submission_count: i64,
    pub has_profile_analysis: bool,
    pub has_monetization_analysis: bool,
    pub profile: KindStats,
    pub monetization: KindStats,
    /// Submission id of the opportunity whose profile is authoritative.
    pub primary_profile: Option<String>,
    /// Submission id of the opportunity whose monetization is authoritative.
    pub primary_monetization: Option<String>,
}

impl BusinessConcept {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint: fingerprint.into(),
            first_seen_at: Utc::now(),
            submission_count: 0,
            has_profile_analysis: false,
            has_monetization_analysis: false,
            profile: KindStats::default(),
            monetization: KindStats::default(),
            primary_profile: None,
            primary_monetization: None,
        }
    }

    pub fn has_analysis(&self, kind: AnalysisKind) -> bool {
        match kind {
            AnalysisKind::Profiling => self.has_profile_analysis,
            AnalysisKind::Monetization => self.has_monetization_analysis,
        }
    }

    pub fn primary(&self, kind: AnalysisKind) -> Option<&str> {
        match kind {
            AnalysisKind::Profiling => self.primary_profile.as_deref(),
            AnalysisKind::Monetization => self.primary_monetization.as_deref(),
        }
    }
}

/// A submission's resolved concept plus the concept's primary outputs as
/// currently stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptMatch {
    pub concept: BusinessConcept,
    pub primary_profile_output: Option<ProfileOutput>,
    pub primary_monetization_output: Option<MonetizationOutput>,
}

// --- Trust ---

/// Independently computed credibility indicators attached to an opportunity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrustFields {
    pub trust_score: Option<f64>,
    /// Tier label ("high", "medium", "low", ...).
    pub trust_level: Option<String>,
    pub activity_score: Option<f64>,
    #[serde(default)]
    pub badges: Vec<String>,
}

impl TrustFields {
    pub fn has_trust_score(&self) -> bool {
        self.trust_score.is_some_and(f64::is_finite)
    }

    pub fn has_trust_level(&self) -> bool {
        self.trust_level.as_deref().is_some_and(|l| !l.trim().is_empty())
    }

    pub fn has_activity_score(&self) -> bool {
        self.activity_score.is_some_and(f64::is_finite)
    }

    pub fn has_badges(&self) -> bool {
        self.badges.iter().any(|b| !b.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        !self.has_trust_score()
            && !self.has_trust_level()
            && !self.has_activity_score()
            && !self.has_badges()
    }
}

// --- Opportunities ---

/// The persisted result of enriching one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    pub submission_id: String,
    pub concept_id: Option<Uuid>,
    pub profile: KindOutcome<ProfileOutput>,
    pub monetization: KindOutcome<MonetizationOutput>,
    pub trust: TrustFields,
    pub analyzed_at: DateTime<Utc>,
}
