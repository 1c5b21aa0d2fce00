use std::{
    env,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use common::{error::AppError, utils::config::AppConfig};
use fastembed::{RerankInitOptions, RerankResult, TextRerank};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Batch size for cross-encoder scoring.
const RERANK_BATCH_SIZE: usize = 32;

/// Pool of cross-encoder engines with bounded concurrency.
///
/// Engines load lazily on first use and can be unloaded to release
/// accelerator memory; an idle watcher drops them automatically. A checkout
/// hands back a lease; dropping the lease frees the slot.
pub struct RerankerPool {
    engines: Vec<Arc<Mutex<Option<TextRerank>>>>,
    semaphore: Arc<Semaphore>,
    next_engine: AtomicUsize,
    init_options: RerankInitOptions,
    call_timeout: Duration,
    last_used: Mutex<Instant>,
}

impl RerankerPool {
    pub fn new(pool_size: usize, call_timeout: Duration) -> Result<Arc<Self>, AppError> {
        Self::new_with_options(pool_size, RerankInitOptions::default(), call_timeout)
    }

    fn new_with_options(
        pool_size: usize,
        init_options: RerankInitOptions,
        call_timeout: Duration,
    ) -> Result<Arc<Self>, AppError> {
        if pool_size == 0 {
            return Err(AppError::Validation(
                "RERANK_POOL_SIZE must be greater than zero".to_owned(),
            ));
        }

        std::fs::create_dir_all(&init_options.cache_dir)?;

        let engines = (0..pool_size)
            .map(|_| Arc::new(Mutex::new(None)))
            .collect();

        Ok(Arc::new(Self {
            engines,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            next_engine: AtomicUsize::new(0),
            init_options,
            call_timeout,
            last_used: Mutex::new(Instant::now()),
        }))
    }

    /// Initialize a pool using application configuration; `None` when
    /// reranking is disabled.
    pub fn maybe_from_config(config: &AppConfig) -> Result<Option<Arc<Self>>, AppError> {
        if !config.rerank_enabled {
            return Ok(None);
        }

        let init_options = build_rerank_init_options(config)?;
        Self::new_with_options(
            config.rerank_pool_size.max(1),
            init_options,
            Duration::from_secs(config.rerank_timeout),
        )
        .map(Some)
    }

    /// Check out capacity and pick an engine round-robin. Blocks when all
    /// slots are busy, which is the backpressure.
    pub async fn checkout(self: &Arc<Self>) -> Result<RerankerLease, AppError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AppError::InternalError("reranker pool closed".to_owned()))?;

        let n = self.next_engine.fetch_add(1, Ordering::Relaxed);
        let engine = Arc::clone(&self.engines[n % self.engines.len()]);

        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = Instant::now();
        }

        Ok(RerankerLease {
            _permit: permit,
            engine,
            init_options: self.init_options.clone(),
            call_timeout: self.call_timeout,
        })
    }

    /// Drop every loaded engine. The next checkout reloads lazily.
    pub fn unload(&self) {
        for engine in &self.engines {
            if let Ok(mut guard) = engine.lock() {
                if guard.take().is_some() {
                    debug!("reranker engine unloaded");
                }
            }
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .map(|instant| instant.elapsed())
            .unwrap_or_default()
    }

    /// Background task that unloads engines after `idle` without checkouts.
    pub fn spawn_idle_unloader(self: &Arc<Self>, idle: Duration) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let tick = idle.max(Duration::from_secs(1)) / 2;
            loop {
                tokio::time::sleep(tick).await;
                if pool.idle_for() >= idle {
                    pool.unload();
                }
            }
        });
    }
}

fn build_rerank_init_options(config: &AppConfig) -> Result<RerankInitOptions, AppError> {
    let mut options = RerankInitOptions::default();

    let cache_dir = config
        .fastembed_cache_dir
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| env::var("FASTEMBED_CACHE_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| {
            Path::new(&config.data_dir)
                .join("fastembed")
                .join("reranker")
        });
    std::fs::create_dir_all(&cache_dir)?;
    options.cache_dir = cache_dir;
    options.show_download_progress = config.fastembed_show_download_progress.unwrap_or(true);

    Ok(options)
}

/// Active lease on a single cross-encoder engine.
pub struct RerankerLease {
    // When this drops the semaphore permit is released.
    _permit: OwnedSemaphorePermit,
    engine: Arc<Mutex<Option<TextRerank>>>,
    init_options: RerankInitOptions,
    call_timeout: Duration,
}

impl RerankerLease {
    /// Score `(query, document)` pairs. The engine loads on first use; the
    /// whole call is bounded by the pool's timeout so a wedged model cannot
    /// stall a search.
    pub async fn rerank(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<RerankResult>, AppError> {
        let engine = Arc::clone(&self.engine);
        let init_options = self.init_options.clone();
        let query = query.to_owned();

        let task = tokio::task::spawn_blocking(move || -> Result<Vec<RerankResult>, AppError> {
            let mut guard = engine
                .lock()
                .map_err(|_| AppError::InternalError("reranker lock poisoned".to_owned()))?;
            if guard.is_none() {
                debug!("loading reranker engine");
                let loaded = TextRerank::try_new(init_options)
                    .map_err(|e| AppError::InternalError(e.to_string()))?;
                *guard = Some(loaded);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| AppError::InternalError("reranker unavailable".to_owned()))?;
            model
                .rerank(query, documents, false, Some(RERANK_BATCH_SIZE))
                .map_err(|e| AppError::InternalError(e.to_string()))
        });

        tokio::time::timeout(self.call_timeout, task)
            .await
            .map_err(|_| AppError::Processing("rerank call timed out".to_owned()))??
            .map_err(|e| AppError::InternalError(e.to_string()))
    }
}
