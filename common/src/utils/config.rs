use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    /// SurrealDB connect address; any engine the `any` connector understands.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_database_namespace")]
    pub database_namespace: String,
    #[serde(default = "default_database_name")]
    pub database_name: String,
    pub database_username: Option<String>,
    pub database_password: Option<String>,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_index_dir")]
    pub index_dir: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_embedding_version")]
    pub embedding_version: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_embed_timeout")]
    pub embed_timeout: u64,

    #[serde(default)]
    pub enrich_enabled: bool,
    /// Upper bound on in-flight enrichment calls; defaults to the number of
    /// configured endpoints.
    pub enrich_workers: Option<usize>,
    /// Comma-separated list of OpenAI-compatible base URLs.
    #[serde(default)]
    pub enrich_model_endpoints: String,
    #[serde(default = "default_enrich_model")]
    pub enrich_model: String,
    #[serde(default = "default_enrich_timeout")]
    pub enrich_timeout: u64,

    #[serde(default)]
    pub rerank_enabled: bool,
    #[serde(default = "default_rerank_timeout")]
    pub rerank_timeout: u64,
    #[serde(default = "default_rerank_pool_size")]
    pub rerank_pool_size: usize,
    #[serde(default = "default_rerank_idle_unload")]
    pub rerank_idle_unload: u64,

    #[serde(default = "default_dense_weight")]
    pub hybrid_dense_weight: f32,
    #[serde(default = "default_sparse_weight")]
    pub hybrid_sparse_weight: f32,

    /// Overall deadline for one ingest job, in seconds.
    #[serde(default = "default_ingest_timeout")]
    pub ingest_timeout: u64,
    /// Overall deadline for one search request, in seconds.
    #[serde(default = "default_search_timeout")]
    pub search_timeout: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_stale_job_after")]
    pub stale_job_after: u64,
    #[serde(default = "default_max_job_attempts")]
    pub max_job_attempts: u32,

    /// Number of accelerator devices available to this deployment.
    #[serde(default)]
    pub gpu_count: u32,

    pub fastembed_cache_dir: Option<String>,
    pub fastembed_show_download_progress: Option<bool>,
}

impl AppConfig {
    /// Parsed `ENRICH_MODEL_ENDPOINTS`; empty entries are dropped.
    pub fn enrich_endpoints(&self) -> Vec<String> {
        self.enrich_model_endpoints
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }
}

fn default_database_url() -> String {
    "surrealkv://data/quarry.db".to_owned()
}

fn default_database_namespace() -> String {
    "quarry".to_owned()
}

fn default_database_name() -> String {
    "quarry".to_owned()
}

fn default_data_dir() -> String {
    "./data".to_owned()
}

fn default_index_dir() -> String {
    "./data/indices".to_owned()
}

fn default_http_port() -> u16 {
    3000
}

fn default_embedding_version() -> String {
    "v1".to_owned()
}

fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_owned()
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_embed_timeout() -> u64 {
    30
}

fn default_enrich_model() -> String {
    "context-writer".to_owned()
}

fn default_enrich_timeout() -> u64 {
    60
}

fn default_rerank_timeout() -> u64 {
    5
}

fn default_rerank_pool_size() -> usize {
    1
}

fn default_rerank_idle_unload() -> u64 {
    300
}

fn default_dense_weight() -> f32 {
    0.7
}

fn default_sparse_weight() -> f32 {
    0.3
}

fn default_ingest_timeout() -> u64 {
    2 * 60 * 60
}

fn default_search_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    2
}

fn default_stale_job_after() -> u64 {
    10 * 60
}

fn default_max_job_attempts() -> u32 {
    3
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
