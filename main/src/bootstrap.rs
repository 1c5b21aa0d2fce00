use std::{sync::Arc, time::Duration};

use api_router::api_state::ApiState;
use common::{
    devices::{DevicePlan, DeviceRegistry, NullTelemetry},
    index::store::IndexStore,
    storage::db::SurrealDbClient,
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
    },
};
use ingestion_pipeline::{enrichment::Enricher, IngestionPipeline};
use retrieval_pipeline::{RerankerPool, SearchPipeline};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Everything a binary needs, wired once at startup.
pub struct AppContext {
    pub config: AppConfig,
    pub db: Arc<SurrealDbClient>,
    pub pipeline: Arc<IngestionPipeline>,
    pub api_state: ApiState,
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub async fn build_context() -> Result<AppContext, Box<dyn std::error::Error>> {
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.database_url,
            config.database_username.as_deref(),
            config.database_password.as_deref(),
            &config.database_namespace,
            &config.database_name,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let index_store = IndexStore::new(&config.index_dir)?;
    // Trust the disk over stale rows; quarantine anything unreadable.
    index_store.reconcile(&db).await?;

    let embedder = Arc::new(EmbeddingProvider::from_config(&config)?);
    info!(
        backend = embedder.backend_label(),
        dimension = embedder.dimension(),
        "embedding provider initialized"
    );

    let enricher = Enricher::maybe_from_config(&config)?;
    if let Some(enricher) = &enricher {
        info!(workers = enricher.worker_limit(), "enrichment pool initialized");
    }

    let reranker = RerankerPool::maybe_from_config(&config)?;
    if let Some(reranker) = &reranker {
        reranker.spawn_idle_unloader(Duration::from_secs(config.rerank_idle_unload));
    }

    let devices = Arc::new(DeviceRegistry::new(
        DevicePlan::new(config.gpu_count),
        Arc::new(NullTelemetry),
    ));

    let pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        config.clone(),
        Arc::clone(&embedder),
        enricher,
        reranker.clone(),
        index_store.clone(),
        Arc::clone(&devices),
    ));

    let search = Arc::new(SearchPipeline::new(
        Arc::clone(&db),
        Arc::clone(&embedder),
        index_store.clone(),
        reranker,
        Arc::clone(&devices),
        &config,
    ));

    let api_state = ApiState {
        db: Arc::clone(&db),
        config: config.clone(),
        pipeline: Arc::clone(&pipeline),
        search,
        index_store,
        devices,
    };

    Ok(AppContext {
        config,
        db,
        pipeline,
        api_state,
    })
}
