//! Row shapes returned by the store's queries and their domain conversions.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::warn;
use uuid::Uuid;

use opportunity_common::{
    BusinessConcept, ConceptMatch, KindStats, MonetizationOutput, ProfileOutput, Submission,
    TrustFields,
};

/// One row of the batch concept lookup: association + concept + primary outputs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ConceptRow {
    pub submission_id: String,
    pub concept_id: Uuid,
    pub fingerprint: String,
    pub first_seen_at: DateTime<Utc>,
    pub submission_count: i64,
    pub has_profile_analysis: bool,
    pub has_monetization_analysis: bool,
    pub profile_analysis_count: i64,
    pub profile_scored_count: i64,
    pub profile_score_avg: Option<f64>,
    pub monetization_analysis_count: i64,
    pub monetization_scored_count: i64,
    pub wtp_score_avg: Option<f64>,
    pub primary_profile_submission_id: Option<String>,
    pub primary_monetization_submission_id: Option<String>,
    pub primary_profile_output: Option<serde_json::Value>,
    pub primary_monetization_output: Option<serde_json::Value>,
}

impl ConceptRow {
    pub(crate) fn into_match(self) -> (String, ConceptMatch) {
        let primary_profile_output =
            decode_output::<ProfileOutput>(self.primary_profile_output, &self.concept_id);
        let primary_monetization_output = decode_output::<MonetizationOutput>(
            self.primary_monetization_output,
            &self.concept_id,
        );

        let concept = BusinessConcept {
            id: self.concept_id,
            fingerprint: self.fingerprint,
            first_seen_at: self.first_seen_at,
            submission_count: self.submission_count,
            has_profile_analysis: self.has_profile_analysis,
            has_monetization_analysis: self.has_monetization_analysis,
            profile: KindStats {
                analysis_count: self.profile_analysis_count,
                scored_count: self.profile_scored_count,
                score_avg: self.profile_score_avg,
            },
            monetization: KindStats {
                analysis_count: self.monetization_analysis_count,
                scored_count: self.monetization_scored_count,
                score_avg: self.wtp_score_avg,
            },
            primary_profile: self.primary_profile_submission_id,
            primary_monetization: self.primary_monetization_submission_id,
        };

        (
            self.submission_id,
            ConceptMatch {
                concept,
                primary_profile_output,
                primary_monetization_output,
            },
        )
    }
}

/// A primary output that no longer decodes is treated as absent, so callers
/// run a fresh analysis instead of copying garbage.
fn decode_output<T: DeserializeOwned>(
    value: Option<serde_json::Value>,
    concept_id: &Uuid,
) -> Option<T> {
    let value = value?;
    match serde_json::from_value(value) {
        Ok(output) => Some(output),
        Err(e) => {
            warn!(concept_id = %concept_id, error = %e, "Undecodable primary output, ignoring");
            None
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TrustRow {
    pub submission_id: String,
    pub trust_score: Option<f64>,
    pub trust_level: Option<String>,
    pub activity_score: Option<f64>,
    pub trust_badges: Vec<String>,
}

impl TrustRow {
    pub(crate) fn into_fields(self) -> (String, TrustFields) {
        (
            self.submission_id,
            TrustFields {
                trust_score: self.trust_score,
                trust_level: self.trust_level,
                activity_score: self.activity_score,
                badges: self.trust_badges,
            },
        )
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct SubmissionRow {
    pub id: String,
    pub title: String,
    pub body: String,
    pub community: String,
    pub score: i64,
    pub num_comments: i64,
    pub created_at: DateTime<Utc>,
}

impl From<SubmissionRow> for Submission {
    fn from(row: SubmissionRow) -> Self {
        Submission {
            id: row.id,
            title: row.title,
            body: row.body,
            community: row.community,
            score: row.score,
            num_comments: row.num_comments,
            created_at: row.created_at,
        }
    }
}

/// A row from the opportunities table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredOpportunity {
    pub submission_id: String,
    pub concept_id: Option<Uuid>,
    pub profile_output: Option<serde_json::Value>,
    pub profile_copied: bool,
    pub monetization_output: Option<serde_json::Value>,
    pub monetization_copied: bool,
    pub trust_score: Option<f64>,
    pub trust_level: Option<String>,
    pub activity_score: Option<f64>,
    pub trust_badges: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl StoredOpportunity {
    pub fn profile(&self) -> Option<ProfileOutput> {
        self.profile_output
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn monetization(&self) -> Option<MonetizationOutput> {
        self.monetization_output
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn trust(&self) -> TrustFields {
        TrustFields {
            trust_score: self.trust_score,
            trust_level: self.trust_level.clone(),
            activity_score: self.activity_score,
            badges: self.trust_badges.clone(),
        }
    }
}
