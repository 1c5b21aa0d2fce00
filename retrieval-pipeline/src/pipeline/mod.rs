use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    devices::{DeviceRegistry, TaskKind},
    error::AppError,
    index::store::IndexStore,
    partition::Partition,
    storage::{db::SurrealDbClient, types::chunk::Chunk, types::index_meta::IndexMeta},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use tracing::{debug, instrument, warn};

use crate::{
    fusion::{reciprocal_rank_fusion, FusedCandidate, FusionWeights},
    reranking::RerankerPool,
    sparse::SparseCache,
};

/// Floor for the dense/sparse candidate pools.
const MIN_CANDIDATES: usize = 50;
/// Hard cap on `top_k`.
pub const MAX_TOP_K: usize = 50;
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub tenant_id: String,
    pub namespace: String,
    pub query: String,
    pub document_type: Option<String>,
    pub top_k: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// Hybrid retrieval: dense inner-product search plus per-partition BM25,
/// fused with RRF, optionally reranked by a cross-encoder, hydrated from the
/// metadata store which also filters soft-deleted rows.
pub struct SearchPipeline {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    index_store: IndexStore,
    sparse: SparseCache,
    reranker: Option<Arc<RerankerPool>>,
    devices: Arc<DeviceRegistry>,
    weights: FusionWeights,
    embedding_version: String,
    search_timeout: Duration,
    rerank_timeout: Duration,
}

impl SearchPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        index_store: IndexStore,
        reranker: Option<Arc<RerankerPool>>,
        devices: Arc<DeviceRegistry>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            index_store,
            sparse: SparseCache::new(),
            reranker,
            devices,
            weights: FusionWeights {
                dense: config.hybrid_dense_weight,
                sparse: config.hybrid_sparse_weight,
            },
            embedding_version: config.embedding_version.clone(),
            search_timeout: Duration::from_secs(config.search_timeout),
            rerank_timeout: Duration::from_secs(config.rerank_timeout),
        }
    }

    #[instrument(skip_all, fields(tenant_id = %request.tenant_id, namespace = %request.namespace))]
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, AppError> {
        let deadline = Instant::now() + self.search_timeout;
        let top_k = request.top_k.clamp(1, MAX_TOP_K);
        let partition = Partition::new(
            request.tenant_id.clone(),
            request.namespace.clone(),
            request.document_type.as_deref(),
            self.embedding_version.clone(),
        );

        let meta = IndexMeta::get(&self.db, &partition)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no index for partition {partition}")))?;

        let index = match self.index_store.open(&partition) {
            Ok(Some(index)) => index,
            Ok(None) if meta.ntotal == 0 => {
                // Partition exists but holds no vectors yet.
                return Ok(Vec::new());
            }
            Ok(None) => {
                self.index_store.quarantine(&self.db, &partition).await?;
                return Err(AppError::IndexCorrupt(format!(
                    "index file missing for partition {partition}"
                )));
            }
            Err(AppError::IndexCorrupt(reason)) => {
                warn!(partition = %partition, %reason, "corrupt index hit by search");
                self.index_store.quarantine(&self.db, &partition).await?;
                return Err(AppError::IndexCorrupt(reason));
            }
            Err(err) => return Err(err),
        };

        // Query embedding, once.
        let query_vector = {
            let _lease = self.devices.acquire(TaskKind::Embed, 0).await;
            self.embedder.embed(&request.query).await?
        };

        let pool_size = (top_k * 4).max(MIN_CANDIDATES);

        // Dense candidates by index row, resolved to live chunks.
        let dense_rows = index.search(&query_vector, pool_size);
        let faiss_ids: Vec<i64> = dense_rows.iter().map(|(id, _)| *id).collect();
        let dense_chunks = Chunk::live_by_faiss_ids(&self.db, &partition, faiss_ids).await?;
        let by_faiss: HashMap<i64, &Chunk> = dense_chunks
            .iter()
            .filter_map(|chunk| chunk.faiss_id.map(|id| (id, chunk)))
            .collect();
        let dense_ranked: Vec<(String, f32)> = dense_rows
            .iter()
            .filter_map(|(faiss_id, score)| {
                by_faiss.get(faiss_id).map(|chunk| (chunk.id.clone(), *score))
            })
            .collect();

        // Sparse candidates, rebuilt lazily when the partition mutated.
        let sparse_state = self
            .sparse
            .get_or_build(&self.db, &partition, meta.mutation_counter)
            .await?;
        let sparse_ranked_raw = sparse_state.search(&request.query, pool_size);
        let sparse_ids: Vec<String> = sparse_ranked_raw.iter().map(|(id, _)| id.clone()).collect();
        let sparse_chunks = Chunk::live_by_ids(&self.db, sparse_ids).await?;
        let sparse_live: HashMap<&str, &Chunk> = sparse_chunks
            .iter()
            .map(|chunk| (chunk.id.as_str(), chunk))
            .collect();
        let sparse_ranked: Vec<(String, f32)> = sparse_ranked_raw
            .iter()
            .filter(|(id, _)| sparse_live.contains_key(id.as_str()))
            .cloned()
            .collect();

        let mut candidates = reciprocal_rank_fusion(&dense_ranked, &sparse_ranked, self.weights);
        debug!(
            dense = dense_ranked.len(),
            sparse = sparse_ranked.len(),
            fused = candidates.len(),
            "hybrid candidate pools"
        );

        // Chunk texts for rerank and hydration.
        let mut chunk_map: HashMap<String, Chunk> = HashMap::new();
        for chunk in dense_chunks.into_iter().chain(sparse_chunks.into_iter()) {
            chunk_map.entry(chunk.id.clone()).or_insert(chunk);
        }

        self.maybe_rerank(&request.query, &mut candidates, &chunk_map, top_k, deadline)
            .await;

        Ok(candidates
            .into_iter()
            .take(top_k)
            .filter_map(|candidate| {
                chunk_map.get(&candidate.chunk_id).map(|chunk| SearchHit {
                    doc_id: chunk.doc_id.clone(),
                    chunk_id: chunk.id.clone(),
                    text: chunk.raw_text.clone(),
                    score: candidate.score,
                    metadata: chunk.metadata.clone(),
                })
            })
            .collect())
    }

    /// Cross-encoder pass over the fused head. Skipped outright when the
    /// remaining time budget would not fit the rerank timeout; failures keep
    /// the fused order.
    async fn maybe_rerank(
        &self,
        query: &str,
        candidates: &mut Vec<FusedCandidate>,
        chunk_map: &HashMap<String, Chunk>,
        top_k: usize,
        deadline: Instant,
    ) {
        let Some(pool) = &self.reranker else {
            return;
        };
        if candidates.is_empty() {
            return;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining <= self.rerank_timeout {
            debug!("skipping rerank, search budget nearly exhausted");
            return;
        }

        let rerank_k = (top_k * 4).min(MIN_CANDIDATES).min(candidates.len());
        candidates.truncate(rerank_k);

        let documents: Vec<String> = candidates
            .iter()
            .filter_map(|candidate| {
                chunk_map
                    .get(&candidate.chunk_id)
                    .map(|chunk| chunk.raw_text.clone())
            })
            .collect();
        if documents.len() != candidates.len() {
            return;
        }

        let lease = match pool.checkout().await {
            Ok(lease) => lease,
            Err(err) => {
                warn!(error = %err, "reranker checkout failed, keeping fused order");
                return;
            }
        };

        {
            let device_lease = self.devices.acquire(TaskKind::Rerank, 0).await;
            if device_lease.task_switched {
                // Shared device: the embedder's weights must leave first.
                self.embedder.unload();
            }

            match lease.rerank(query, documents).await {
                Ok(results) => {
                    for result in results {
                        if let Some(candidate) = candidates.get_mut(result.index) {
                            candidate.score = result.score;
                        }
                    }
                    candidates.sort_by(|a, b| {
                        b.score
                            .partial_cmp(&a.score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
                    });
                }
                Err(err) => {
                    warn!(error = %err, "rerank failed, keeping fused order");
                }
            }
        }
    }
}
