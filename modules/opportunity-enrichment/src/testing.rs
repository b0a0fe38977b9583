//! Test doubles for the enrichment pipeline.
//!
//! `MemoryStore` implements every persistence trait against in-process state
//! and mirrors the Postgres semantics the orchestrator relies on: the
//! non-destructive opportunity upsert and the atomic concept update with
//! primary repair. The scripted analyzers record call order into a shared
//! `CallLog` so tests can assert evidence sequencing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use opportunity_common::{
    AnalysisKind, BusinessConcept, ConceptMatch, KindStats, MonetizationEvidence,
    MonetizationOutput, Opportunity, PricePoint, ProfileOutput, Submission, TrustFields,
};

use crate::metadata::FreshAnalysis;
use crate::report::BatchReport;
use crate::traits::{
    ConceptReader, ConceptWriter, MonetizationAnalyzer, Profiler, QualityFilter, ResultStore,
    SubmissionSource, TrustReader, TrustValidator,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn submission(id: &str) -> Submission {
    Submission {
        id: id.to_string(),
        title: format!("Is there an app that does {id}?"),
        body: "I keep tracking this in a spreadsheet and would happily pay for something better."
            .to_string(),
        community: "SomebodyMakeThis".to_string(),
        score: 42,
        num_comments: 7,
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_else(Utc::now),
    }
}

pub fn monetization_output(wtp_score: f64) -> MonetizationOutput {
    MonetizationOutput {
        wtp_score,
        revenue_model: Some("subscription".to_string()),
        price_points: vec![PricePoint {
            label: "pro".to_string(),
            amount: 9.0,
            currency: "USD".to_string(),
            period: Some("month".to_string()),
        }],
        customer_segments: vec!["freelancers".to_string()],
        signals: vec!["would happily pay".to_string()],
    }
}

pub fn profile_output(opportunity_score: f64) -> ProfileOutput {
    ProfileOutput {
        problem_summary: "Manual spreadsheet tracking is slow and error-prone.".to_string(),
        target_audience: "freelancers".to_string(),
        core_functions: vec!["import".to_string(), "reminders".to_string()],
        opportunity_score,
        dimension_scores: [("pain_intensity".to_string(), opportunity_score)]
            .into_iter()
            .collect(),
    }
}

/// A concept whose monetization primary is `primary_id` with a bare WTP score.
/// Profiling has never run on it.
pub fn concept_with_monetization_primary(primary_id: &str, wtp_score: f64) -> ConceptMatch {
    let mut concept = BusinessConcept::new(format!("concept-{primary_id}"));
    concept.submission_count = 1;
    concept.has_monetization_analysis = true;
    let scored = wtp_score.is_finite();
    concept.monetization = KindStats {
        analysis_count: 1,
        scored_count: i64::from(scored),
        score_avg: scored.then_some(wtp_score),
    };
    concept.primary_monetization = Some(primary_id.to_string());
    ConceptMatch {
        concept,
        primary_profile_output: None,
        primary_monetization_output: Some(MonetizationOutput::with_score(wtp_score)),
    }
}

/// A concept with both kinds analyzed, both primaries pointing at `primary_id`.
pub fn concept_with_both_primaries(
    primary_id: &str,
    wtp_score: f64,
    opportunity_score: f64,
) -> ConceptMatch {
    let mut matched = concept_with_monetization_primary(primary_id, wtp_score);
    matched.concept.has_profile_analysis = true;
    matched.concept.profile = KindStats {
        analysis_count: 1,
        scored_count: 1,
        score_avg: Some(opportunity_score),
    };
    matched.concept.primary_profile = Some(primary_id.to_string());
    matched.primary_profile_output = Some(profile_output(opportunity_score));
    matched
}

// ---------------------------------------------------------------------------
// Call log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Started { kind: AnalysisKind, submission_id: String },
    Finished { kind: AnalysisKind, submission_id: String },
}

impl CallEvent {
    pub fn started(kind: AnalysisKind, submission_id: &str) -> Self {
        CallEvent::Started {
            kind,
            submission_id: submission_id.to_string(),
        }
    }

    pub fn finished(kind: AnalysisKind, submission_id: &str) -> Self {
        CallEvent::Finished {
            kind,
            submission_id: submission_id.to_string(),
        }
    }
}

/// Ordered record of analyzer calls, shared between scripted analyzers.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    events: Arc<Mutex<Vec<CallEvent>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: CallEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// True when both events were logged and `first` precedes `second`.
    pub fn finished_before(&self, first: &CallEvent, second: &CallEvent) -> bool {
        let events = self.events.lock().unwrap();
        let a = events.iter().position(|e| e == first);
        let b = events.iter().position(|e| e == second);
        matches!((a, b), (Some(a), Some(b)) if a < b)
    }
}

// ---------------------------------------------------------------------------
// Scripted analyzers
// ---------------------------------------------------------------------------

/// Monetization analyzer with per-submission scripted results. Unscripted
/// submissions get `monetization_output(50.0)`.
pub struct ScriptedMonetization {
    log: CallLog,
    outputs: HashMap<String, MonetizationOutput>,
    failures: HashMap<String, String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedMonetization {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            outputs: HashMap::new(),
            failures: HashMap::new(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, submission_id: &str, output: MonetizationOutput) -> Self {
        self.outputs.insert(submission_id.to_string(), output);
        self
    }

    pub fn failing(mut self, submission_id: &str, reason: &str) -> Self {
        self.failures
            .insert(submission_id.to_string(), reason.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MonetizationAnalyzer for ScriptedMonetization {
    async fn analyze(&self, submission: &Submission) -> Result<MonetizationOutput> {
        let id = submission.id.as_str();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .push(CallEvent::started(AnalysisKind::Monetization, id));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = match self.failures.get(id) {
            Some(reason) => Err(anyhow!("{reason}")),
            None => Ok(self
                .outputs
                .get(id)
                .cloned()
                .unwrap_or_else(|| monetization_output(50.0))),
        };
        self.log
            .push(CallEvent::finished(AnalysisKind::Monetization, id));
        result
    }
}

/// Profiler that records the evidence it was handed per submission.
/// Unscripted submissions get `profile_output(60.0)`.
pub struct ScriptedProfiler {
    log: CallLog,
    outputs: HashMap<String, ProfileOutput>,
    failures: HashMap<String, String>,
    calls: AtomicUsize,
    evidence: Mutex<HashMap<String, Option<MonetizationEvidence>>>,
}

impl ScriptedProfiler {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            outputs: HashMap::new(),
            failures: HashMap::new(),
            calls: AtomicUsize::new(0),
            evidence: Mutex::new(HashMap::new()),
        }
    }

    pub fn on(mut self, submission_id: &str, output: ProfileOutput) -> Self {
        self.outputs.insert(submission_id.to_string(), output);
        self
    }

    pub fn failing(mut self, submission_id: &str, reason: &str) -> Self {
        self.failures
            .insert(submission_id.to_string(), reason.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `None` if the profiler never ran for `submission_id`, otherwise the
    /// evidence it received.
    pub fn evidence_for(&self, submission_id: &str) -> Option<Option<MonetizationEvidence>> {
        self.evidence.lock().unwrap().get(submission_id).cloned()
    }
}

#[async_trait]
impl Profiler for ScriptedProfiler {
    async fn analyze(
        &self,
        submission: &Submission,
        evidence: Option<&MonetizationEvidence>,
    ) -> Result<ProfileOutput> {
        let id = submission.id.as_str();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.push(CallEvent::started(AnalysisKind::Profiling, id));
        self.evidence
            .lock()
            .unwrap()
            .insert(id.to_string(), evidence.cloned());
        let result = match self.failures.get(id) {
            Some(reason) => Err(anyhow!("{reason}")),
            None => Ok(self
                .outputs
                .get(id)
                .cloned()
                .unwrap_or_else(|| profile_output(60.0))),
        };
        self.log
            .push(CallEvent::finished(AnalysisKind::Profiling, id));
        result
    }
}

/// Trust validator returning fixed fields per submission; empty by default.
#[derive(Default)]
pub struct FixedTrustValidator {
    fields: HashMap<String, TrustFields>,
    failures: HashSet<String>,
}

impl FixedTrustValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, submission_id: &str, fields: TrustFields) -> Self {
        self.fields.insert(submission_id.to_string(), fields);
        self
    }

    pub fn failing(mut self, submission_id: &str) -> Self {
        self.failures.insert(submission_id.to_string());
        self
    }
}

#[async_trait]
impl TrustValidator for FixedTrustValidator {
    async fn validate(&self, submission: &Submission) -> Result<TrustFields> {
        if self.failures.contains(&submission.id) {
            bail!("trust validator unavailable");
        }
        Ok(self.fields.get(&submission.id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Collection doubles
// ---------------------------------------------------------------------------

/// Pre-filter that drops the listed ids, or fails outright.
#[derive(Default)]
pub struct ScriptedFilter {
    reject: HashSet<String>,
    fail: bool,
}

impl ScriptedFilter {
    pub fn rejecting(ids: &[&str]) -> Self {
        Self {
            reject: ids.iter().map(|id| id.to_string()).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            reject: HashSet::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl QualityFilter for ScriptedFilter {
    async fn filter(&self, submissions: Vec<Submission>) -> Result<Vec<Submission>> {
        if self.fail {
            bail!("quality model unavailable");
        }
        Ok(submissions
            .into_iter()
            .filter(|s| !self.reject.contains(&s.id))
            .collect())
    }
}

/// Fixed batch source.
pub struct VecSource {
    submissions: Vec<Submission>,
}

impl VecSource {
    pub fn new(submissions: Vec<Submission>) -> Self {
        Self { submissions }
    }
}

#[async_trait]
impl SubmissionSource for VecSource {
    async fn fetch_batch(&self, limit: usize) -> Result<Vec<Submission>> {
        Ok(self.submissions.iter().take(limit).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// One stored opportunity row, as the Postgres table would hold it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredRow {
    pub concept_id: Option<Uuid>,
    pub profile: Option<ProfileOutput>,
    pub profile_copied: bool,
    pub monetization: Option<MonetizationOutput>,
    pub monetization_copied: bool,
    pub trust: TrustFields,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Stored(String),
    Metadata { submission_id: String, kind: AnalysisKind },
}

#[derive(Default)]
struct MemoryState {
    concepts: HashMap<Uuid, BusinessConcept>,
    links: HashMap<String, Uuid>,
    rows: HashMap<String, StoredRow>,
    events: Vec<StoreEvent>,
    runs: Vec<BatchReport>,
    fail_concepts: bool,
    fail_trust: bool,
    unavailable: bool,
    failing_stores: HashSet<String>,
    failing_metadata: HashSet<Uuid>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    concept_queries: AtomicUsize,
    trust_queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_concept(&self, fingerprint: &str) -> Uuid {
        let concept = BusinessConcept::new(fingerprint);
        let id = concept.id;
        self.state.lock().unwrap().concepts.insert(id, concept);
        id
    }

    /// Associate a submission with a concept, as the upstream clusterer does.
    pub fn link(&self, submission_id: &str, concept_id: Uuid) {
        let mut state = self.state.lock().unwrap();
        state.links.insert(submission_id.to_string(), concept_id);
        if let Some(concept) = state.concepts.get_mut(&concept_id) {
            concept.submission_count += 1;
        }
    }

    pub fn concept(&self, id: Uuid) -> Option<BusinessConcept> {
        self.state.lock().unwrap().concepts.get(&id).cloned()
    }

    pub fn stored(&self, submission_id: &str) -> Option<StoredRow> {
        self.state.lock().unwrap().rows.get(submission_id).cloned()
    }

    /// Seed persisted trust fields, creating the row if needed.
    pub fn set_trust(&self, submission_id: &str, trust: TrustFields) {
        let mut state = self.state.lock().unwrap();
        state.rows.entry(submission_id.to_string()).or_default().trust = trust;
    }

    /// Remove a stored row, e.g. to simulate a deleted primary.
    pub fn delete(&self, submission_id: &str) {
        self.state.lock().unwrap().rows.remove(submission_id);
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn runs(&self) -> Vec<BatchReport> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn concept_queries(&self) -> usize {
        self.concept_queries.load(Ordering::SeqCst)
    }

    pub fn trust_queries(&self) -> usize {
        self.trust_queries.load(Ordering::SeqCst)
    }

    pub fn fail_concept_lookup(&self) {
        self.state.lock().unwrap().fail_concepts = true;
    }

    pub fn fail_trust_lookup(&self) {
        self.state.lock().unwrap().fail_trust = true;
    }

    pub fn set_unavailable(&self) {
        self.state.lock().unwrap().unavailable = true;
    }

    pub fn fail_store_for(&self, submission_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_stores
            .insert(submission_id.to_string());
    }

    pub fn fail_metadata_for(&self, concept_id: Uuid) {
        self.state
            .lock()
            .unwrap()
            .failing_metadata
            .insert(concept_id);
    }
}

fn upsert_row(row: &mut StoredRow, opp: &Opportunity) {
    if opp.concept_id.is_some() {
        row.concept_id = opp.concept_id;
    }
    if let Some(output) = opp.profile.output() {
        row.profile = Some(output.clone());
        row.profile_copied = opp.profile.copied_from_primary();
    }
    if let Some(output) = opp.monetization.output() {
        row.monetization = Some(output.clone());
        row.monetization_copied = opp.monetization.copied_from_primary();
    }

    let trust = &opp.trust;
    if trust.has_trust_score() {
        row.trust.trust_score = trust.trust_score;
    }
    if trust.has_trust_level() {
        row.trust.trust_level = trust.trust_level.as_deref().map(|l| l.trim().to_string());
    }
    if trust.has_activity_score() {
        row.trust.activity_score = trust.activity_score;
    }
    if trust.has_badges() {
        row.trust.badges = trust
            .badges
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();
    }
}

fn has_output(row: Option<&StoredRow>, kind: AnalysisKind) -> bool {
    row.is_some_and(|r| match kind {
        AnalysisKind::Monetization => r.monetization.is_some(),
        AnalysisKind::Profiling => r.profile.is_some(),
    })
}

#[async_trait]
impl ConceptReader for MemoryStore {
    async fn concepts_for(
        &self,
        submission_ids: &[String],
    ) -> Result<HashMap<String, ConceptMatch>> {
        self.concept_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.fail_concepts {
            bail!("concept table unavailable");
        }
        let mut out = HashMap::new();
        for id in submission_ids {
            let Some(concept) = state.links.get(id).and_then(|c| state.concepts.get(c)) else {
                continue;
            };
            let matched = ConceptMatch {
                primary_profile_output: concept
                    .primary_profile
                    .as_ref()
                    .and_then(|p| state.rows.get(p))
                    .and_then(|r| r.profile.clone()),
                primary_monetization_output: concept
                    .primary_monetization
                    .as_ref()
                    .and_then(|p| state.rows.get(p))
                    .and_then(|r| r.monetization.clone()),
                concept: concept.clone(),
            };
            out.insert(id.clone(), matched);
        }
        Ok(out)
    }
}

#[async_trait]
impl TrustReader for MemoryStore {
    async fn trust_snapshots(
        &self,
        submission_ids: &[String],
    ) -> Result<HashMap<String, TrustFields>> {
        self.trust_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.fail_trust {
            bail!("trust read timed out");
        }
        Ok(submission_ids
            .iter()
            .map(|id| {
                let trust = state.rows.get(id).map(|r| r.trust.clone()).unwrap_or_default();
                (id.clone(), trust)
            })
            .collect())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn ensure_available(&self) -> Result<()> {
        if self.state.lock().unwrap().unavailable {
            bail!("connection refused");
        }
        Ok(())
    }

    async fn store(&self, opportunity: &Opportunity) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            bail!("connection refused");
        }
        if state.failing_stores.contains(&opportunity.submission_id) {
            bail!("write rejected for {}", opportunity.submission_id);
        }
        let row = state
            .rows
            .entry(opportunity.submission_id.clone())
            .or_default();
        upsert_row(row, opportunity);
        state
            .events
            .push(StoreEvent::Stored(opportunity.submission_id.clone()));
        Ok(())
    }

    async fn record_run(&self, report: &BatchReport) -> Result<()> {
        self.state.lock().unwrap().runs.push(report.clone());
        Ok(())
    }
}

#[async_trait]
impl ConceptWriter for MemoryStore {
    async fn record_fresh_analysis(&self, update: &FreshAnalysis) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if state.failing_metadata.contains(&update.concept_id) {
            bail!("concept {} locked", update.concept_id);
        }
        let current_has_output = state
            .concepts
            .get(&update.concept_id)
            .and_then(|c| c.primary(update.kind))
            .map(|p| has_output(state.rows.get(p), update.kind));
        let Some(concept) = state.concepts.get_mut(&update.concept_id) else {
            bail!("concept {} not found", update.concept_id);
        };
        let claim = !matches!(current_has_output, Some(true));
        let score = update.score.filter(|s| s.is_finite());
        match update.kind {
            AnalysisKind::Monetization => {
                concept.has_monetization_analysis = true;
                concept.monetization.record(score);
                if claim {
                    concept.primary_monetization = Some(update.submission_id.clone());
                }
            }
            AnalysisKind::Profiling => {
                concept.has_profile_analysis = true;
                concept.profile.record(score);
                if claim {
                    concept.primary_profile = Some(update.submission_id.clone());
                }
            }
        }
        state.events.push(StoreEvent::Metadata {
            submission_id: update.submission_id.clone(),
            kind: update.kind,
        });
        Ok(())
    }
}
