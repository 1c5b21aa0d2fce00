use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{error::AppError, utils::config::AppConfig};

/// Dimension of the default fastembed text model (AllMiniLML6V2).
const FASTEMBED_DIMENSION: usize = 384;

/// Produces L2-normalized embedding vectors for chunk and query texts.
///
/// Two backends exist: the fastembed ONNX model used in production, and a
/// deterministic feature-hashing backend for tests so no model download or
/// accelerator is needed. The model handle is lazy: nothing is loaded until
/// the first embed call, and `unload` releases it again.
pub struct EmbeddingProvider {
    backend: Backend,
    dimension: usize,
    batch_size: usize,
    batch_timeout: Duration,
    label: String,
}

enum Backend {
    FastEmbed {
        model: Arc<Mutex<Option<TextEmbedding>>>,
        options: TextInitOptions,
    },
    Hashed,
}

impl EmbeddingProvider {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let mut options = TextInitOptions::new(EmbeddingModel::AllMiniLML6V2);

        let cache_dir = config
            .fastembed_cache_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Path::new(&config.data_dir).join("fastembed").join("text"));
        std::fs::create_dir_all(&cache_dir)?;
        options.cache_dir = cache_dir;
        options.show_download_progress = config.fastembed_show_download_progress.unwrap_or(true);

        Ok(Self {
            backend: Backend::FastEmbed {
                model: Arc::new(Mutex::new(None)),
                options,
            },
            dimension: FASTEMBED_DIMENSION,
            batch_size: config.embed_batch_size.max(1),
            batch_timeout: Duration::from_secs(config.embed_timeout),
            label: config.embedding_model.clone(),
        })
    }

    /// Deterministic token-hashing backend for tests.
    pub fn new_hashed(dimension: usize) -> Result<Self, AppError> {
        if dimension == 0 {
            return Err(AppError::Validation(
                "embedding dimension must be greater than zero".to_owned(),
            ));
        }
        Ok(Self {
            backend: Backend::Hashed,
            dimension,
            batch_size: 32,
            batch_timeout: Duration::from_secs(30),
            label: format!("hashed-{dimension}"),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn backend_label(&self) -> &str {
        &self.label
    }

    /// Embed a batch of texts, preserving input order.
    ///
    /// Inputs are processed in sub-batches of the configured size. A failing
    /// sub-batch is retried once at half size; if the halves fail too, the
    /// items are embedded one by one as the conservative fallback path.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match &self.backend {
            Backend::Hashed => Ok(texts
                .iter()
                .map(|t| hashed_embedding(t, self.dimension))
                .collect()),
            Backend::FastEmbed { model, options } => {
                let mut out = Vec::with_capacity(texts.len());
                for batch in texts.chunks(self.batch_size) {
                    let vectors = self
                        .embed_with_degradation(model, options, batch.to_vec())
                        .await?;
                    out.extend(vectors);
                }
                Ok(out)
            }
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.embed_batch(vec![text.to_owned()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Embedding("no embedding produced".to_owned()))
    }

    /// Drop the loaded model handle, releasing accelerator memory. The next
    /// embed call reloads it.
    pub fn unload(&self) {
        if let Backend::FastEmbed { model, .. } = &self.backend {
            if let Ok(mut guard) = model.lock() {
                if guard.take().is_some() {
                    debug!("embedding model unloaded");
                }
            }
        }
    }

    async fn embed_with_degradation(
        &self,
        model: &Arc<Mutex<Option<TextEmbedding>>>,
        options: &TextInitOptions,
        batch: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        match self.embed_once(model, options, batch.clone()).await {
            Ok(vectors) => Ok(vectors),
            Err(err) => {
                warn!(error = %err, batch = batch.len(), "embed batch failed, retrying halved");
                let mut out = Vec::with_capacity(batch.len());
                let mid = batch.len().div_ceil(2);
                for half in [&batch[..mid], &batch[mid..]] {
                    if half.is_empty() {
                        continue;
                    }
                    match self.embed_once(model, options, half.to_vec()).await {
                        Ok(vectors) => out.extend(vectors),
                        Err(err) => {
                            warn!(error = %err, "halved batch failed, falling back to per-item");
                            for item in half {
                                let vectors =
                                    self.embed_once(model, options, vec![item.clone()]).await?;
                                out.extend(vectors);
                            }
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    async fn embed_once(
        &self,
        model: &Arc<Mutex<Option<TextEmbedding>>>,
        options: &TextInitOptions,
        batch: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let model = Arc::clone(model);
        let options = options.clone();
        let batch_len = batch.len();

        let task = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>, AppError> {
            let mut guard = model
                .lock()
                .map_err(|_| AppError::Embedding("embedding model lock poisoned".to_owned()))?;
            if guard.is_none() {
                debug!("loading embedding model");
                let loaded = TextEmbedding::try_new(options)
                    .map_err(|e| AppError::Embedding(e.to_string()))?;
                *guard = Some(loaded);
            }
            let engine = guard
                .as_mut()
                .ok_or_else(|| AppError::Embedding("embedding model unavailable".to_owned()))?;
            engine
                .embed(batch, None)
                .map_err(|e| AppError::Embedding(e.to_string()))
        });

        let mut vectors = timeout(self.batch_timeout, task)
            .await
            .map_err(|_| AppError::Embedding("embed batch timed out".to_owned()))???;

        if vectors.len() != batch_len {
            return Err(AppError::Embedding(format!(
                "embedding count mismatch: expected {batch_len}, got {}",
                vectors.len()
            )));
        }
        for vector in &mut vectors {
            l2_normalize(vector);
        }
        Ok(vectors)
    }
}

/// Normalize in place so inner product equals cosine similarity.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// FNV-1a based token hashing into a fixed-dimension unit vector.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100_0000_01b3);
        }
        let bucket = (hash % dimension as u64) as usize;
        // Alternate sign from a second hash bit to spread mass around zero.
        let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
    l2_normalize(&mut vector);
    vector
}
