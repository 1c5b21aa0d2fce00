use std::sync::Arc;

use common::{
    devices::DeviceRegistry, index::store::IndexStore, storage::db::SurrealDbClient,
    utils::config::AppConfig,
};
use ingestion_pipeline::IngestionPipeline;
use retrieval_pipeline::SearchPipeline;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub pipeline: Arc<IngestionPipeline>,
    pub search: Arc<SearchPipeline>,
    pub index_store: IndexStore,
    pub devices: Arc<DeviceRegistry>,
}
