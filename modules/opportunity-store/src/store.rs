//! OpportunityStore — concept lookups, trust snapshots, and opportunity writes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use opportunity_common::{AnalysisKind, ConceptMatch, Opportunity, Submission, TrustFields};

use crate::error::{Result, StoreError};
use crate::rows::{ConceptRow, StoredOpportunity, SubmissionRow, TrustRow};

// ---------------------------------------------------------------------------
// OpportunityStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct OpportunityStore {
    pool: PgPool,
}

impl OpportunityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Cheap liveness check.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // --- Batch reads ---

    /// Resolve every submission in `submission_ids` to its concept, with the
    /// concept's primary outputs joined in. One query for any non-empty input,
    /// none for an empty one. Unresolvable submissions are absent from the map.
    pub async fn concepts_for(
        &self,
        submission_ids: &[String],
    ) -> Result<HashMap<String, ConceptMatch>> {
        if submission_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, ConceptRow>(
            r#"
            SELECT sc.submission_id,
                   c.id AS concept_id,
                   c.fingerprint,
                   c.first_seen_at,
                   c.submission_count,
                   c.has_profile_analysis,
                   c.has_monetization_analysis,
                   c.profile_analysis_count,
                   c.profile_scored_count,
                   c.profile_score_avg,
                   c.monetization_analysis_count,
                   c.monetization_scored_count,
                   c.wtp_score_avg,
                   c.primary_profile_submission_id,
                   c.primary_monetization_submission_id,
                   pp.profile_output       AS primary_profile_output,
                   pm.monetization_output  AS primary_monetization_output
            FROM submission_concepts sc
            JOIN business_concepts c ON c.id = sc.concept_id
            LEFT JOIN opportunities pp ON pp.submission_id = c.primary_profile_submission_id
            LEFT JOIN opportunities pm ON pm.submission_id = c.primary_monetization_submission_id
            WHERE sc.submission_id = ANY($1)
            "#,
        )
        .bind(submission_ids)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            requested = submission_ids.len(),
            resolved = rows.len(),
            "Batch concept lookup"
        );

        Ok(rows.into_iter().map(ConceptRow::into_match).collect())
    }

    /// Currently persisted trust fields for each submission. Submissions with
    /// no stored opportunity map to an empty record. One query.
    pub async fn trust_snapshots(
        &self,
        submission_ids: &[String],
    ) -> Result<HashMap<String, TrustFields>> {
        if submission_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, TrustRow>(
            r#"
            SELECT submission_id, trust_score, trust_level, activity_score, trust_badges
            FROM opportunities
            WHERE submission_id = ANY($1)
            "#,
        )
        .bind(submission_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots: HashMap<String, TrustFields> =
            rows.into_iter().map(TrustRow::into_fields).collect();
        for id in submission_ids {
            snapshots.entry(id.clone()).or_default();
        }
        Ok(snapshots)
    }

    /// Oldest submissions that have no opportunity yet.
    pub async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<Submission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(
            r#"
            SELECT s.id, s.title, s.body, s.community, s.score, s.num_comments, s.created_at
            FROM submissions s
            LEFT JOIN opportunities o ON o.submission_id = s.id
            WHERE o.submission_id IS NULL
            ORDER BY s.created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Submission::from).collect())
    }

    pub async fn opportunity(&self, submission_id: &str) -> Result<Option<StoredOpportunity>> {
        let row = sqlx::query_as::<_, StoredOpportunity>(
            r#"
            SELECT submission_id, concept_id, profile_output, profile_copied,
                   monetization_output, monetization_copied,
                   trust_score, trust_level, activity_score, trust_badges, analyzed_at
            FROM opportunities
            WHERE submission_id = $1
            "#,
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // --- Writes ---

    /// Upsert one opportunity keyed by submission id.
    ///
    /// Never destructive: a kind without output keeps whatever output (and
    /// copy flag) is already stored, and empty trust columns keep their
    /// stored values.
    pub async fn upsert_opportunity(&self, opp: &Opportunity) -> Result<()> {
        let profile_output = opp
            .profile
            .output()
            .map(serde_json::to_value)
            .transpose()?;
        let monetization_output = opp
            .monetization
            .output()
            .map(serde_json::to_value)
            .transpose()?;

        let trust = &opp.trust;
        let trust_score = trust.trust_score.filter(|s| s.is_finite());
        let trust_level = trust
            .trust_level
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty());
        let activity_score = trust.activity_score.filter(|s| s.is_finite());
        let badges: Vec<String> = trust
            .badges
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();

        sqlx::query(
            r#"
            INSERT INTO opportunities
                (submission_id, concept_id, profile_output, profile_copied,
                 monetization_output, monetization_copied,
                 trust_score, trust_level, activity_score, trust_badges, analyzed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (submission_id) DO UPDATE SET
                concept_id          = COALESCE(EXCLUDED.concept_id, opportunities.concept_id),
                profile_output      = COALESCE(EXCLUDED.profile_output, opportunities.profile_output),
                profile_copied      = CASE WHEN EXCLUDED.profile_output IS NULL
                                           THEN opportunities.profile_copied
                                           ELSE EXCLUDED.profile_copied END,
                monetization_output = COALESCE(EXCLUDED.monetization_output, opportunities.monetization_output),
                monetization_copied = CASE WHEN EXCLUDED.monetization_output IS NULL
                                           THEN opportunities.monetization_copied
                                           ELSE EXCLUDED.monetization_copied END,
                trust_score         = COALESCE(EXCLUDED.trust_score, opportunities.trust_score),
                trust_level         = COALESCE(EXCLUDED.trust_level, opportunities.trust_level),
                activity_score      = COALESCE(EXCLUDED.activity_score, opportunities.activity_score),
                trust_badges        = CASE WHEN cardinality(EXCLUDED.trust_badges) > 0
                                           THEN EXCLUDED.trust_badges
                                           ELSE opportunities.trust_badges END,
                analyzed_at         = EXCLUDED.analyzed_at,
                updated_at          = now()
            "#,
        )
        .bind(&opp.submission_id)
        .bind(opp.concept_id)
        .bind(profile_output)
        .bind(opp.profile.copied_from_primary())
        .bind(monetization_output)
        .bind(opp.monetization.copied_from_primary())
        .bind(trust_score)
        .bind(trust_level)
        .bind(activity_score)
        .bind(badges)
        .bind(opp.analyzed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fold one fresh analysis into a concept in a single atomic statement:
    /// set the kind's flag, update the running mean, and claim the primary
    /// slot when it is unset or points at an opportunity with no output.
    /// The mean is weighted by scored analyses only; a `None` score bumps
    /// `analysis_count` and leaves the mean alone.
    pub async fn record_fresh_analysis(
        &self,
        concept_id: Uuid,
        submission_id: &str,
        kind: AnalysisKind,
        score: Option<f64>,
    ) -> Result<()> {
        let cols = KindColumns::of(kind);
        let sql = format!(
            r#"
            UPDATE business_concepts c SET
                {flag} = true,
                {avg} = CASE WHEN $3::float8 IS NULL THEN c.{avg}
                             ELSE (COALESCE(c.{avg}, 0) * c.{scored} + $3::float8)
                                  / (c.{scored} + 1)
                        END,
                {scored} = c.{scored} + CASE WHEN $3::float8 IS NULL THEN 0 ELSE 1 END,
                {count} = c.{count} + 1,
                {primary} = CASE
                    WHEN c.{primary} IS NULL THEN $2
                    WHEN NOT EXISTS (
                        SELECT 1 FROM opportunities o
                        WHERE o.submission_id = c.{primary} AND o.{output} IS NOT NULL
                    ) THEN $2
                    ELSE c.{primary}
                END,
                updated_at = now()
            WHERE c.id = $1
            "#,
            flag = cols.flag,
            avg = cols.avg,
            count = cols.count,
            scored = cols.scored,
            primary = cols.primary,
            output = cols.output,
        );

        let result = sqlx::query(&sql)
            .bind(concept_id)
            .bind(submission_id)
            .bind(score.filter(|s| s.is_finite()))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ConceptNotFound(concept_id));
        }
        Ok(())
    }

    /// Persist a finished batch report.
    pub async fn record_run(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        report: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO enrichment_runs (run_id, started_at, finished_at, report)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (run_id) DO UPDATE SET finished_at = EXCLUDED.finished_at, report = EXCLUDED.report
            "#,
        )
        .bind(run_id)
        .bind(started_at)
        .bind(finished_at)
        .bind(report)
        .execute(&self.pool)
        .await?;

        info!(run_id = %run_id, "Recorded enrichment run");
        Ok(())
    }
}

/// Column names backing one analysis kind on `business_concepts` / `opportunities`.
struct KindColumns {
    flag: &'static str,
    avg: &'static str,
    count: &'static str,
    scored: &'static str,
    primary: &'static str,
    output: &'static str,
}

impl KindColumns {
    fn of(kind: AnalysisKind) -> Self {
        match kind {
            AnalysisKind::Profiling => KindColumns {
                flag: "has_profile_analysis",
                avg: "profile_score_avg",
                count: "profile_analysis_count",
                scored: "profile_scored_count",
                primary: "primary_profile_submission_id",
                output: "profile_output",
            },
            AnalysisKind::Monetization => KindColumns {
                flag: "has_monetization_analysis",
                avg: "wtp_score_avg",
                count: "monetization_analysis_count",
                scored: "monetization_scored_count",
                primary: "primary_monetization_submission_id",
                output: "monetization_output",
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Test utilities
// ---------------------------------------------------------------------------

#[cfg(feature = "test-utils")]
impl OpportunityStore {
    /// Insert a concept row (the resolver's job in production).
    pub async fn insert_concept(
        &self,
        concept: &opportunity_common::BusinessConcept,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO business_concepts
                (id, fingerprint, first_seen_at, submission_count,
                 has_profile_analysis, has_monetization_analysis,
                 profile_analysis_count, profile_scored_count, profile_score_avg,
                 monetization_analysis_count, monetization_scored_count, wtp_score_avg,
                 primary_profile_submission_id, primary_monetization_submission_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(concept.id)
        .bind(&concept.fingerprint)
        .bind(concept.first_seen_at)
        .bind(concept.submission_count)
        .bind(concept.has_profile_analysis)
        .bind(concept.has_monetization_analysis)
        .bind(concept.profile.analysis_count)
        .bind(concept.profile.scored_count)
        .bind(concept.profile.score_avg)
        .bind(concept.monetization.analysis_count)
        .bind(concept.monetization.scored_count)
        .bind(concept.monetization.score_avg)
        .bind(&concept.primary_profile)
        .bind(&concept.primary_monetization)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Associate a submission with a concept.
    pub async fn link_submission(&self, submission_id: &str, concept_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO submission_concepts (submission_id, concept_id) VALUES ($1, $2)
             ON CONFLICT (submission_id) DO UPDATE SET concept_id = EXCLUDED.concept_id",
        )
        .bind(submission_id)
        .bind(concept_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_submission(&self, s: &Submission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO submissions (id, title, body, community, score, num_comments, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&s.id)
        .bind(&s.title)
        .bind(&s.body)
        .bind(&s.community)
        .bind(s.score)
        .bind(s.num_comments)
        .bind(s.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Wipe every table. Tests only.
    pub async fn truncate_all(&self) -> Result<()> {
        sqlx::query(
            "TRUNCATE enrichment_runs, opportunities, submission_concepts, business_concepts, submissions CASCADE",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
