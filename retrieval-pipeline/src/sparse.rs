use std::collections::HashMap;
use std::sync::Arc;

use bm25::{Embedder, EmbedderBuilder, Scorer, Tokenizer};
use common::{
    error::AppError,
    partition::Partition,
    storage::{db::SurrealDbClient, types::chunk::Chunk},
};
use tokio::sync::RwLock;
use tracing::debug;

/// Tokenizer for the sparse index: lowercase, split on Unicode word
/// boundaries, drop tokens shorter than two characters.
#[derive(Default, Clone)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, input_text: &str) -> Vec<String> {
        input_text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| token.chars().count() >= 2)
            .map(ToOwned::to_owned)
            .collect()
    }
}

/// Immutable BM25 state over the live chunks of one partition.
///
/// Built lazily on first search after a mutation and replaced wholesale when
/// the partition's mutation counter moves; concurrent searches share one
/// snapshot through an `Arc`.
pub struct SparseIndexState {
    embedder: Embedder<u32, WordTokenizer>,
    scorer: Scorer<String, u32>,
    epoch: u64,
    len: usize,
}

impl SparseIndexState {
    pub fn build(entries: &[(String, String)], epoch: u64) -> Self {
        let tokenizer = WordTokenizer;
        let total_tokens: usize = entries
            .iter()
            .map(|(_, text)| tokenizer.tokenize(text).len())
            .sum();
        let avgdl = if entries.is_empty() {
            1.0
        } else {
            (total_tokens as f32 / entries.len() as f32).max(1.0)
        };

        let embedder = EmbedderBuilder::<u32, WordTokenizer>::with_avgdl(avgdl).build();
        let mut scorer = Scorer::new();
        for (chunk_id, text) in entries {
            scorer.upsert(chunk_id, embedder.embed(text));
        }

        Self {
            embedder,
            scorer,
            epoch,
            len: entries.len(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// BM25 top-k as `(chunk_id, score)`, score-descending with chunk id as
    /// the deterministic tie-break.
    pub fn search(&self, query: &str, k: usize) -> Vec<(String, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let query_embedding = self.embedder.embed(query);
        let mut matches: Vec<(String, f32)> = self
            .scorer
            .matches(&query_embedding)
            .into_iter()
            .map(|doc| (doc.id, doc.score))
            .collect();

        matches.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        matches.truncate(k);
        matches
    }
}

/// Per-partition cache of sparse states, guarded by a read-write lock.
///
/// Reads take the read lock; a stale or missing entry is rebuilt from the
/// store outside the lock and swapped in under the write lock.
#[derive(Default)]
pub struct SparseCache {
    inner: RwLock<HashMap<String, Arc<SparseIndexState>>>,
}

impl SparseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sparse state whose epoch matches the partition's current mutation
    /// counter, rebuilding from live chunks when needed.
    pub async fn get_or_build(
        &self,
        db: &SurrealDbClient,
        partition: &Partition,
        current_epoch: u64,
    ) -> Result<Arc<SparseIndexState>, AppError> {
        let slug = partition.slug();

        {
            let cache = self.inner.read().await;
            if let Some(state) = cache.get(&slug) {
                if state.epoch() == current_epoch {
                    return Ok(Arc::clone(state));
                }
            }
        }

        let chunks = Chunk::live_for_partition(db, partition).await?;
        let entries: Vec<(String, String)> = chunks
            .into_iter()
            .map(|chunk| (chunk.id, chunk.raw_text))
            .collect();
        debug!(
            partition = %partition,
            chunks = entries.len(),
            epoch = current_epoch,
            "rebuilding sparse index state"
        );
        let state = Arc::new(SparseIndexState::build(&entries, current_epoch));

        let mut cache = self.inner.write().await;
        cache.insert(slug, Arc::clone(&state));
        Ok(state)
    }

    /// Drop a partition's cached state outright; next search rebuilds.
    pub async fn invalidate(&self, partition: &Partition) {
        self.inner.write().await.remove(&partition.slug());
    }
}
