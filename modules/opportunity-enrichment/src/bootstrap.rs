//! Wiring for a Postgres-backed deployment.

use std::sync::Arc;

use tracing::info;

use opportunity_common::{Config, EnrichError, PipelineConfig, Result};
use opportunity_store::OpportunityStore;

use crate::orchestrator::{EnrichmentDeps, Orchestrator};
use crate::report::BatchReport;
use crate::traits::{MonetizationAnalyzer, Profiler, SubmissionSource};

/// Connect to `config.database_url`, run migrations, and log the effective
/// configuration.
pub async fn connect_store(config: &Config) -> Result<Arc<OpportunityStore>> {
    config.log_redacted();
    let max_connections = config.pipeline.store_concurrency.clamp(2, 64) as u32;
    let store = OpportunityStore::connect(&config.database_url, max_connections)
        .await
        .map_err(|e| EnrichError::StoreUnavailable(e.to_string()))?;
    store
        .migrate()
        .await
        .map_err(|e| EnrichError::StoreUnavailable(e.to_string()))?;
    info!(max_connections, "Opportunity store ready");
    Ok(Arc::new(store))
}

/// Deps with every persistence seam backed by `store`. The quality filter
/// defaults to accepting everything and no trust validator is attached.
pub fn postgres_deps(
    store: Arc<OpportunityStore>,
    monetization: Arc<dyn MonetizationAnalyzer>,
    profiler: Arc<dyn Profiler>,
    config: PipelineConfig,
) -> EnrichmentDeps {
    EnrichmentDeps::builder()
        .concepts(store.clone())
        .trust_snapshots(store.clone())
        .results(store.clone())
        .concept_writer(store)
        .monetization(monetization)
        .profiler(profiler)
        .config(config)
        .build()
}

/// Enrich the next `config.batch_size` submissions from `source`.
pub async fn run_next_batch(
    orchestrator: &Orchestrator,
    source: &dyn SubmissionSource,
    config: &Config,
) -> Result<BatchReport> {
    info!(batch_size = config.batch_size, "Starting enrichment batch");
    orchestrator.run(source, config.batch_size).await
}
