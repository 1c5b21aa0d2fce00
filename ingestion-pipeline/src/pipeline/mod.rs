use std::{collections::HashMap, sync::Arc, time::Duration};

use common::{
    devices::{DeviceRegistry, TaskKind},
    error::AppError,
    index::{dense::DenseIndex, store::IndexStore},
    partition::Partition,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::Chunk,
            document::{Document, IndexRowUpdate},
            index_meta::IndexMeta,
            ingest::IngestDoc,
            job::{Job, JobKind, JobPayload},
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider, hash::content_hash},
};
use futures::{stream, StreamExt};
use retrieval_pipeline::reranking::RerankerPool;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{
    chunking::{chunk_document, DocumentHints},
    enrichment::{build_enriched, Enricher, EnrichmentScope},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub doc_id: String,
    pub document_type: String,
    pub chunks_added: usize,
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: bool,
    pub chunks_deleted: usize,
    pub job_id: Option<String>,
}

/// Best-effort job progress updates; a no-op for synchronous API calls.
#[derive(Clone)]
pub struct ProgressReporter {
    db: Option<Arc<SurrealDbClient>>,
    job_id: String,
}

impl ProgressReporter {
    pub fn for_job(db: Arc<SurrealDbClient>, job_id: String) -> Self {
        Self {
            db: Some(db),
            job_id,
        }
    }

    pub fn noop() -> Self {
        Self {
            db: None,
            job_id: String::new(),
        }
    }

    pub async fn report(&self, progress: u8, stage: &str) {
        if let Some(db) = &self.db {
            if let Err(err) = Job::update_progress(db, &self.job_id, progress, stage).await {
                warn!(job_id = %self.job_id, error = %err, "progress update failed");
            }
        }
    }
}

/// Drives documents from text to persisted chunks, vectors and indices, and
/// executes the queue's ingest, rebuild and delete jobs.
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    config: AppConfig,
    embedder: Arc<EmbeddingProvider>,
    enricher: Option<Arc<Enricher>>,
    reranker: Option<Arc<RerankerPool>>,
    index_store: IndexStore,
    devices: Arc<DeviceRegistry>,
    // Advisory per-partition locks; jobs within one partition serialize,
    // jobs across partitions run concurrently.
    partition_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        embedder: Arc<EmbeddingProvider>,
        enricher: Option<Arc<Enricher>>,
        reranker: Option<Arc<RerankerPool>>,
        index_store: IndexStore,
        devices: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            db,
            config,
            embedder,
            enricher,
            reranker,
            index_store,
            devices,
            partition_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_partition(&self, partition: &Partition) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.partition_locks.lock().await;
            Arc::clone(
                locks
                    .entry(partition.slug())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        mutex.lock_owned().await
    }

    /// The synchronous upsert path of the store: idempotent on content hash,
    /// atomic from the caller's view, dense index swapped before the
    /// metadata commit.
    #[instrument(skip_all, fields(tenant_id = %doc.tenant_id, namespace = %doc.project_id, filename = %doc.filename))]
    pub async fn upsert_document(
        &self,
        doc: &IngestDoc,
        progress: &ProgressReporter,
    ) -> Result<UpsertOutcome, AppError> {
        doc.validate()?;

        let partition = Partition::new(
            doc.tenant_id.clone(),
            doc.project_id.clone(),
            doc.document_type.as_deref(),
            self.config.embedding_version.clone(),
        );
        let _guard = self.lock_partition(&partition).await;

        let doc_id = doc.resolved_doc_id();
        let doc_hash = content_hash(&doc.text);

        let prior = Document::find_live(&self.db, &doc.tenant_id, &doc.project_id, &doc_id).await?;
        if let Some(prior) = &prior {
            if prior.doc_hash == doc_hash {
                debug!(%doc_id, "unchanged content, upsert skipped");
                return Ok(UpsertOutcome {
                    doc_id,
                    document_type: prior.document_type.clone(),
                    chunks_added: 0,
                    skipped: true,
                });
            }
        }

        progress.report(5, "chunking").await;

        let source = doc
            .metadata
            .as_ref()
            .and_then(|m| m.get("source"))
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned);
        let hints = DocumentHints {
            filename: &doc.filename,
            mime_type: doc.mime_type.as_deref(),
            document_type: doc.document_type.as_deref(),
            source: source.as_deref(),
        };
        let chunked = chunk_document(
            &doc.text,
            &hints,
            doc.chunk_strategy.as_deref(),
            doc.chunk_overlap,
        )?;

        let document = Document::new(
            &partition,
            doc_id.clone(),
            doc.filename.clone(),
            doc.mime_type.clone(),
            doc_hash,
            chunked.strategy.to_owned(),
        );

        // Partition-wide dedup on chunk hash; the generation being replaced
        // does not count against its successor.
        let existing_hashes = Chunk::live_hashes(
            &self.db,
            &doc.tenant_id,
            &doc.project_id,
            prior.as_ref().map(|p| p.id.as_str()),
        )
        .await?;
        let mut seen = existing_hashes;
        let mut kept: Vec<(String, String)> = Vec::with_capacity(chunked.chunks.len());
        for raw in chunked.chunks {
            let hash = content_hash(&raw);
            if seen.insert(hash.clone()) {
                kept.push((raw, hash));
            } else {
                debug!(%doc_id, "skipping duplicate chunk");
            }
        }

        let meta = IndexMeta::get(&self.db, &partition).await?;
        let dirty_after = prior.is_some() || meta.as_ref().is_some_and(|m| m.dirty);

        if kept.is_empty() {
            // Nothing to index: record the document generation only.
            let (dimension, ntotal, file_path) = match &meta {
                Some(meta) => (meta.dimension, meta.ntotal, meta.file_path.clone()),
                None => (
                    self.embedder.dimension() as u32,
                    0,
                    self.index_store
                        .path_for(&partition)
                        .to_string_lossy()
                        .into_owned(),
                ),
            };
            Document::commit_upsert(
                &self.db,
                prior.map(|p| p.id),
                document,
                Vec::new(),
                IndexRowUpdate {
                    partition,
                    dimension,
                    ntotal,
                    dirty: dirty_after,
                    file_path,
                },
            )
            .await?;
            return Ok(UpsertOutcome {
                doc_id,
                document_type: doc
                    .document_type
                    .clone()
                    .unwrap_or_else(|| "default".to_owned()),
                chunks_added: 0,
                skipped: false,
            });
        }

        let (embed_texts, vectors) = self.enrich_and_embed(&document, &kept, progress).await?;

        let mut index = match self.index_store.open(&partition)? {
            Some(index) => index,
            None => DenseIndex::new(self.embedder.dimension()),
        };
        if index.dimension() != self.embedder.dimension() {
            return Err(AppError::Validation(format!(
                "index dimension {} does not match embedder dimension {}",
                index.dimension(),
                self.embedder.dimension()
            )));
        }

        let mut chunks = Vec::with_capacity(kept.len());
        for (ordinal, ((raw, _hash), embed_text)) in
            kept.into_iter().zip(embed_texts.into_iter()).enumerate()
        {
            let mut chunk = Chunk::new(
                &document,
                ordinal as u32,
                raw,
                embed_text,
                doc.metadata.clone(),
            );
            chunk.faiss_id = Some(index.append(&vectors[ordinal])?);
            chunks.push(chunk);
        }
        let chunks_added = chunks.len();

        progress.report(90, "storing").await;

        // File first, then the transactional metadata commit. Dying in
        // between leaves extra dense rows that retrieval filters out and the
        // startup reconcile resolves.
        let file_path = self.index_store.write(&partition, &index)?;

        Document::commit_upsert(
            &self.db,
            prior.map(|p| p.id),
            document.clone(),
            chunks,
            IndexRowUpdate {
                partition,
                dimension: index.dimension() as u32,
                ntotal: index.ntotal(),
                dirty: dirty_after,
                file_path: file_path.to_string_lossy().into_owned(),
            },
        )
        .await?;

        info!(%doc_id, chunks_added, strategy = chunked.strategy, "document upserted");

        Ok(UpsertOutcome {
            doc_id,
            document_type: document.document_type,
            chunks_added,
            skipped: false,
        })
    }

    /// Enrichment fan-out feeding the embedder in batches. Enrichment runs
    /// as spawned tasks bounded by the pool size, so at most
    /// `W + B_embed` enriched chunks exist ahead of the embedder while a
    /// batch embeds.
    async fn enrich_and_embed(
        &self,
        document: &Document,
        kept: &[(String, String)],
        progress: &ProgressReporter,
    ) -> Result<(Vec<String>, Vec<Vec<f32>>), AppError> {
        let total = kept.len();
        let batch_size = self.config.embed_batch_size.max(1);

        let embed_text_stream: futures::stream::BoxStream<'static, String> =
            match &self.enricher {
                Some(enricher) => {
                    let enricher = Arc::clone(enricher);
                    let worker_limit = enricher.worker_limit().max(1);
                    let filename = document.filename.clone();
                    let document_type = document.document_type.clone();
                    let items: Vec<(String, String)> = kept.to_vec();

                    stream::iter(items)
                        .map(move |(raw, hash)| {
                            let enricher = Arc::clone(&enricher);
                            let filename = filename.clone();
                            let document_type = document_type.clone();
                            tokio::spawn(async move {
                                let scope = EnrichmentScope {
                                    filename: &filename,
                                    document_type: &document_type,
                                };
                                let enriched = enricher.enrich(scope, &raw, &hash).await;
                                (raw, enriched)
                            })
                        })
                        .buffered(worker_limit)
                        .map(move |joined| match joined {
                            Ok((_raw, enriched)) => enriched,
                            Err(err) => {
                                warn!(error = %err, "enrichment task failed");
                                String::new()
                            }
                        })
                        .boxed()
                }
                None => stream::iter(
                    kept.iter()
                        .map(|(raw, _)| raw.clone())
                        .collect::<Vec<String>>(),
                )
                .boxed(),
            };

        // Re-derive the fallback header for the rare join failure above.
        let fallback_scope_filename = document.filename.clone();
        let fallback_scope_type = document.document_type.clone();
        let raws: Vec<String> = kept.iter().map(|(raw, _)| raw.clone()).collect();

        let mut embed_texts: Vec<String> = Vec::with_capacity(total);
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(total);
        let mut batches = embed_text_stream.chunks(batch_size);

        while let Some(batch) = batches.next().await {
            let offset = embed_texts.len();
            let batch: Vec<String> = batch
                .into_iter()
                .enumerate()
                .map(|(i, text)| {
                    if text.is_empty() {
                        build_enriched(
                            EnrichmentScope {
                                filename: &fallback_scope_filename,
                                document_type: &fallback_scope_type,
                            },
                            None,
                            &raws[offset + i],
                        )
                    } else {
                        text
                    }
                })
                .collect();

            if self.enricher.is_some() {
                progress
                    .report(
                        (10 + 50 * (offset + batch.len()) / total.max(1)) as u8,
                        &format!("enriching {}/{total}", offset + batch.len()),
                    )
                    .await;
            }

            let lease = self.devices.acquire(TaskKind::Embed, 0).await;
            if lease.task_switched {
                if let Some(reranker) = &self.reranker {
                    reranker.unload();
                }
            }
            let batch_vectors = self.embedder.embed_batch(batch.clone()).await?;
            drop(lease);

            embed_texts.extend(batch);
            vectors.extend(batch_vectors);
            progress
                .report(
                    (60 + 30 * embed_texts.len() / total.max(1)) as u8,
                    "embedding",
                )
                .await;
        }

        Ok((embed_texts, vectors))
    }

    /// Soft-delete a document; search stops returning it immediately, the
    /// dense rows disappear once the enqueued rebuild lands.
    #[instrument(skip_all, fields(tenant_id, namespace, doc_id))]
    pub async fn delete_document(
        &self,
        tenant_id: &str,
        namespace: &str,
        doc_id: &str,
    ) -> Result<DeleteOutcome, AppError> {
        let Some(document) = Document::find_live(&self.db, tenant_id, namespace, doc_id).await?
        else {
            return Ok(DeleteOutcome {
                deleted: false,
                chunks_deleted: 0,
                job_id: None,
            });
        };

        let partition = document.partition();
        let _guard = self.lock_partition(&partition).await;

        let chunks_deleted = Document::soft_delete_with_chunks(&self.db, &document).await?;

        let job = Job::enqueue(
            &self.db,
            JobKind::Rebuild,
            JobPayload::Rebuild {
                tenant_id: tenant_id.to_owned(),
                namespace: namespace.to_owned(),
                document_type: Some(document.document_type.clone()),
                reembed: false,
            },
        )
        .await?;

        info!(doc_id, chunks_deleted, "document soft-deleted, rebuild enqueued");

        Ok(DeleteOutcome {
            deleted: true,
            chunks_deleted,
            job_id: Some(job.id),
        })
    }

    /// Rebuild one partition's dense index from live chunks. Vectors are
    /// reused from the prior index file unless `reembed` is set or the row
    /// is unusable; searches keep hitting the old file until the swap.
    #[instrument(skip_all, fields(partition = %partition))]
    pub async fn rebuild_partition(
        &self,
        partition: &Partition,
        reembed: bool,
        progress: &ProgressReporter,
    ) -> Result<(), AppError> {
        let _guard = self.lock_partition(partition).await;

        let chunks = Chunk::live_for_partition(&self.db, partition).await?;
        let old_index = match self.index_store.open(partition) {
            Ok(index) => index,
            Err(AppError::IndexCorrupt(reason)) => {
                warn!(%reason, "prior index unreadable, re-embedding everything");
                None
            }
            Err(err) => return Err(err),
        };

        let dimension = self.embedder.dimension();
        let mut fresh = DenseIndex::new(dimension);
        let mut assignments: Vec<(String, i64)> = Vec::with_capacity(chunks.len());

        // Chunks whose vector cannot be copied from the old file.
        let mut pending_embed: Vec<usize> = Vec::new();
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];

        for (i, chunk) in chunks.iter().enumerate() {
            if reembed {
                pending_embed.push(i);
                continue;
            }
            let reused = old_index.as_ref().and_then(|old| {
                chunk
                    .faiss_id
                    .and_then(|faiss_id| old.row(faiss_id))
                    .filter(|row| row.len() == dimension)
                    .map(<[f32]>::to_vec)
            });
            match reused {
                Some(vector) => vectors[i] = Some(vector),
                None => pending_embed.push(i),
            }
        }

        if !pending_embed.is_empty() {
            let batch_size = self.config.embed_batch_size.max(1);
            for (done, batch) in pending_embed.chunks(batch_size).enumerate() {
                let texts: Vec<String> = batch
                    .iter()
                    .map(|&i| chunks[i].embed_text.clone())
                    .collect();

                let lease = self.devices.acquire(TaskKind::Embed, 0).await;
                if lease.task_switched {
                    if let Some(reranker) = &self.reranker {
                        reranker.unload();
                    }
                }
                let batch_vectors = self.embedder.embed_batch(texts).await?;
                drop(lease);

                for (&i, vector) in batch.iter().zip(batch_vectors) {
                    vectors[i] = Some(vector);
                }
                progress
                    .report(
                        (10 + 70 * (done + 1) * batch_size / pending_embed.len().max(1))
                            .min(80) as u8,
                        "embedding",
                    )
                    .await;
            }
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let vector = vectors[i]
                .take()
                .ok_or_else(|| AppError::Processing(format!("no vector for chunk {}", chunk.id)))?;
            let faiss_id = fresh.append(&vector)?;
            assignments.push((chunk.id.clone(), faiss_id));
        }

        progress.report(90, "storing").await;

        let file_path = self.index_store.write(partition, &fresh)?;
        IndexMeta::commit_rebuild(
            &self.db,
            partition,
            &assignments,
            dimension as u32,
            fresh.ntotal(),
            &file_path.to_string_lossy(),
        )
        .await?;

        info!(ntotal = fresh.ntotal(), reembed, "partition index rebuilt");
        Ok(())
    }

    /// Rebuild every partition of a `(tenant, namespace)` pair, optionally
    /// narrowed to one document type.
    async fn rebuild_matching(
        &self,
        tenant_id: &str,
        namespace: &str,
        document_type: Option<&str>,
        reembed: bool,
        progress: &ProgressReporter,
    ) -> Result<(), AppError> {
        let rows: Vec<IndexMeta> = self.db.get_all_stored_items().await?;
        let targets: Vec<Partition> = rows
            .into_iter()
            .filter(|row| {
                row.tenant_id == tenant_id
                    && row.namespace == namespace
                    && document_type.is_none_or(|dt| row.document_type == dt)
            })
            .map(|row| row.partition())
            .collect();

        if targets.is_empty() {
            return Err(AppError::NotFound(format!(
                "no index for {tenant_id}/{namespace}"
            )));
        }

        for partition in targets {
            self.rebuild_partition(&partition, reembed, progress).await?;
        }
        Ok(())
    }

    /// Execute one claimed job to a terminal state. Every failure mode ends
    /// in `failed` with a structured error string; nothing propagates to the
    /// queue itself.
    #[instrument(skip_all, fields(job_id = %job.id, kind = job.kind.as_str(), attempt = job.attempts))]
    pub async fn process_job(&self, job: Job) -> Result<(), AppError> {
        let progress = ProgressReporter::for_job(Arc::clone(&self.db), job.id.clone());

        let result = match &job.payload {
            JobPayload::Ingest { docs } => {
                let deadline = Duration::from_secs(self.config.ingest_timeout);
                match tokio::time::timeout(deadline, self.ingest_batch(docs, &progress)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Processing(
                        "ingest deadline exceeded".to_owned(),
                    )),
                }
            }
            JobPayload::Rebuild {
                tenant_id,
                namespace,
                document_type,
                reembed,
            } => {
                self.rebuild_matching(
                    tenant_id,
                    namespace,
                    document_type.as_deref(),
                    *reembed,
                    &progress,
                )
                .await
            }
            JobPayload::Delete {
                tenant_id,
                namespace,
                doc_id,
            } => self
                .delete_document(tenant_id, namespace, doc_id)
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => {
                Job::mark_completed(&self.db, &job.id).await?;
                info!("job completed");
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                Job::mark_failed(&self.db, &job.id, &reason).await?;
                warn!(error = %reason, "job failed");
                Err(AppError::Processing(reason))
            }
        }
    }

    async fn ingest_batch(
        &self,
        docs: &[IngestDoc],
        progress: &ProgressReporter,
    ) -> Result<(), AppError> {
        let total = docs.len().max(1);
        for (i, doc) in docs.iter().enumerate() {
            progress
                .report(
                    (100 * i / total) as u8,
                    &format!("chunking {}/{total}", i + 1),
                )
                .await;
            self.upsert_document(doc, progress).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
