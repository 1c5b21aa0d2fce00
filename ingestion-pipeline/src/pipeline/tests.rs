use super::*;
use common::devices::{DevicePlan, NullTelemetry};
use common::storage::types::job::JobStatus;
use uuid::Uuid;

struct Fixture {
    pipeline: IngestionPipeline,
    db: Arc<SurrealDbClient>,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let db = Arc::new(
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("memory db"),
    );
    db.ensure_initialized().await.expect("init schema");

    let dir = tempfile::tempdir().expect("tempdir");
    let index_store = IndexStore::new(dir.path()).expect("index store");
    let embedder = Arc::new(EmbeddingProvider::new_hashed(64).expect("embedder"));
    let config: AppConfig = serde_json::from_value(serde_json::json!({})).expect("config");
    let devices = Arc::new(DeviceRegistry::new(
        DevicePlan::new(0),
        Arc::new(NullTelemetry),
    ));

    let pipeline = IngestionPipeline::new(
        Arc::clone(&db),
        config,
        embedder,
        None,
        None,
        index_store,
        devices,
    );

    Fixture {
        pipeline,
        db,
        _dir: dir,
    }
}

fn ingest_doc(doc_id: &str, text: &str) -> IngestDoc {
    IngestDoc {
        tenant_id: "acme".to_owned(),
        project_id: "p1".to_owned(),
        filename: format!("{doc_id}.txt"),
        text: text.to_owned(),
        doc_id: Some(doc_id.to_owned()),
        user_id: None,
        mime_type: None,
        document_type: None,
        chunk_strategy: None,
        chunk_overlap: None,
        metadata: None,
    }
}

fn partition() -> Partition {
    Partition::new("acme", "p1", None, "v1")
}

#[tokio::test]
async fn upsert_persists_chunks_vectors_and_index_row() {
    let fixture = fixture().await;

    let outcome = fixture
        .pipeline
        .upsert_document(
            &ingest_doc(
                "d1",
                "The quick brown fox jumps over the lazy dog. It was a bright cold day in April.",
            ),
            &ProgressReporter::noop(),
        )
        .await
        .expect("upsert");

    assert!(!outcome.skipped);
    assert!(outcome.chunks_added >= 1);
    assert_eq!(outcome.doc_id, "d1");
    assert_eq!(outcome.document_type, "default");

    let chunks = Chunk::live_for_partition(&fixture.db, &partition())
        .await
        .expect("chunks");
    assert_eq!(chunks.len(), outcome.chunks_added);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.ordinal as usize, i, "ordinals contiguous from zero");
        assert_eq!(chunk.faiss_id, Some(i as i64));
        assert_eq!(chunk.embed_text, chunk.raw_text, "no enricher configured");
    }

    let meta = IndexMeta::get(&fixture.db, &partition())
        .await
        .expect("meta")
        .expect("row");
    assert_eq!(meta.ntotal as usize, outcome.chunks_added);
    assert!(!meta.dirty);
    assert_eq!(meta.mutation_counter, 1);

    let index = fixture
        .pipeline
        .index_store
        .open(&partition())
        .expect("open")
        .expect("index");
    assert_eq!(index.ntotal() as usize, outcome.chunks_added);
}

#[tokio::test]
async fn reupsert_with_identical_text_is_idempotent() {
    let fixture = fixture().await;
    let doc = ingest_doc("d1", "Same text every time.");

    let first = fixture
        .pipeline
        .upsert_document(&doc, &ProgressReporter::noop())
        .await
        .expect("first upsert");
    assert_eq!(first.chunks_added, 1);

    let second = fixture
        .pipeline
        .upsert_document(&doc, &ProgressReporter::noop())
        .await
        .expect("second upsert");
    assert_eq!(second.chunks_added, 0);
    assert!(second.skipped);

    // Exactly one live document and one live chunk.
    let live = Document::find_live(&fixture.db, "acme", "p1", "d1")
        .await
        .expect("query");
    assert!(live.is_some());
    let chunks = Chunk::live_for_partition(&fixture.db, &partition())
        .await
        .expect("chunks");
    assert_eq!(chunks.len(), 1);

    let meta = IndexMeta::get(&fixture.db, &partition())
        .await
        .expect("meta")
        .expect("row");
    assert_eq!(meta.mutation_counter, 1, "skip must not mutate the partition");
}

#[tokio::test]
async fn content_change_replaces_the_prior_generation() {
    let fixture = fixture().await;

    fixture
        .pipeline
        .upsert_document(&ingest_doc("d1", "old content here"), &ProgressReporter::noop())
        .await
        .expect("first upsert");
    let outcome = fixture
        .pipeline
        .upsert_document(&ingest_doc("d1", "entirely new content"), &ProgressReporter::noop())
        .await
        .expect("second upsert");
    assert_eq!(outcome.chunks_added, 1);

    let chunks = Chunk::live_for_partition(&fixture.db, &partition())
        .await
        .expect("chunks");
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].raw_text.contains("entirely new"));

    let meta = IndexMeta::get(&fixture.db, &partition())
        .await
        .expect("meta")
        .expect("row");
    assert!(meta.dirty, "replaced rows remain in the dense file until rebuild");
    assert_eq!(meta.mutation_counter, 2);
}

#[tokio::test]
async fn empty_text_adds_zero_chunks_without_error() {
    let fixture = fixture().await;
    let outcome = fixture
        .pipeline
        .upsert_document(&ingest_doc("d1", "   \n\t  "), &ProgressReporter::noop())
        .await
        .expect("upsert");
    assert_eq!(outcome.chunks_added, 0);
    assert!(!outcome.skipped);

    let live = Document::find_live(&fixture.db, "acme", "p1", "d1")
        .await
        .expect("query");
    assert!(live.is_some(), "document row still records the generation");
}

#[tokio::test]
async fn duplicate_chunks_within_the_partition_are_skipped() {
    let fixture = fixture().await;

    fixture
        .pipeline
        .upsert_document(&ingest_doc("d1", "identical paragraph"), &ProgressReporter::noop())
        .await
        .expect("first upsert");
    let outcome = fixture
        .pipeline
        .upsert_document(&ingest_doc("d2", "identical paragraph"), &ProgressReporter::noop())
        .await
        .expect("second upsert");

    assert_eq!(outcome.chunks_added, 0, "same chunk hash in the partition");
    let chunks = Chunk::live_for_partition(&fixture.db, &partition())
        .await
        .expect("chunks");
    assert_eq!(chunks.len(), 1);
}

#[tokio::test]
async fn validation_failures_never_reach_the_store() {
    let fixture = fixture().await;
    let mut doc = ingest_doc("d1", "text");
    doc.tenant_id = String::new();

    let result = fixture
        .pipeline
        .upsert_document(&doc, &ProgressReporter::noop())
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let docs: Vec<Document> = fixture.db.get_all_stored_items().await.expect("docs");
    assert!(docs.is_empty());
}

#[tokio::test]
async fn delete_soft_deletes_and_enqueues_rebuild() {
    let fixture = fixture().await;

    fixture
        .pipeline
        .upsert_document(
            &ingest_doc("d2", "pineapple pizza is divisive"),
            &ProgressReporter::noop(),
        )
        .await
        .expect("upsert");

    let outcome = fixture
        .pipeline
        .delete_document("acme", "p1", "d2")
        .await
        .expect("delete");
    assert!(outcome.deleted);
    assert_eq!(outcome.chunks_deleted, 1);
    let job_id = outcome.job_id.expect("rebuild job id");

    let job: Job = fixture.db.get_item(&job_id).await.expect("get").expect("job");
    assert_eq!(job.kind, JobKind::Rebuild);
    assert_eq!(job.status, JobStatus::Pending);

    let chunks = Chunk::live_for_partition(&fixture.db, &partition())
        .await
        .expect("chunks");
    assert!(chunks.is_empty(), "deleted chunks invisible before rebuild");

    let meta = IndexMeta::get(&fixture.db, &partition())
        .await
        .expect("meta")
        .expect("row");
    assert!(meta.dirty);

    // Deleting again is a no-op.
    let outcome = fixture
        .pipeline
        .delete_document("acme", "p1", "d2")
        .await
        .expect("delete again");
    assert!(!outcome.deleted);
    assert!(outcome.job_id.is_none());
}

#[tokio::test]
async fn rebuild_compacts_the_dense_index() {
    let fixture = fixture().await;

    fixture
        .pipeline
        .upsert_document(&ingest_doc("keep", "this document stays"), &ProgressReporter::noop())
        .await
        .expect("upsert keep");
    fixture
        .pipeline
        .upsert_document(&ingest_doc("drop", "this document goes"), &ProgressReporter::noop())
        .await
        .expect("upsert drop");
    fixture
        .pipeline
        .delete_document("acme", "p1", "drop")
        .await
        .expect("delete");

    fixture
        .pipeline
        .rebuild_partition(&partition(), false, &ProgressReporter::noop())
        .await
        .expect("rebuild");

    let index = fixture
        .pipeline
        .index_store
        .open(&partition())
        .expect("open")
        .expect("index");
    assert_eq!(index.ntotal(), 1, "only the live chunk survives");

    let meta = IndexMeta::get(&fixture.db, &partition())
        .await
        .expect("meta")
        .expect("row");
    assert!(!meta.dirty);
    assert_eq!(meta.ntotal, 1);

    let chunks = Chunk::live_for_partition(&fixture.db, &partition())
        .await
        .expect("chunks");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].faiss_id, Some(0), "row ids compacted from zero");
}

#[tokio::test]
async fn process_job_runs_an_ingest_batch_to_completion() {
    let fixture = fixture().await;

    let job = Job::enqueue(
        &fixture.db,
        JobKind::Ingest,
        JobPayload::Ingest {
            docs: vec![
                ingest_doc("a", "first document body"),
                ingest_doc("b", "second document body"),
            ],
        },
    )
    .await
    .expect("enqueue");

    let claimed = Job::claim_next_pending(&fixture.db, "test-worker")
        .await
        .expect("claim")
        .expect("job");
    fixture
        .pipeline
        .process_job(claimed)
        .await
        .expect("process");

    let row: Job = fixture.db.get_item(&job.id).await.expect("get").expect("row");
    assert_eq!(row.status, JobStatus::Completed);
    assert_eq!(row.progress, 100);

    let chunks = Chunk::live_for_partition(&fixture.db, &partition())
        .await
        .expect("chunks");
    assert_eq!(chunks.len(), 2);
}

#[tokio::test]
async fn failing_job_lands_in_failed_with_a_reason() {
    let fixture = fixture().await;

    let mut bad = ingest_doc("bad", "text");
    bad.tenant_id = String::new();
    let job = Job::enqueue(
        &fixture.db,
        JobKind::Ingest,
        JobPayload::Ingest { docs: vec![bad] },
    )
    .await
    .expect("enqueue");

    let claimed = Job::claim_next_pending(&fixture.db, "test-worker")
        .await
        .expect("claim")
        .expect("job");
    let result = fixture.pipeline.process_job(claimed).await;
    assert!(result.is_err());

    let row: Job = fixture.db.get_item(&job.id).await.expect("get").expect("row");
    assert_eq!(row.status, JobStatus::Failed);
    assert!(row.error.expect("error recorded").contains("tenant_id"));
}

#[tokio::test]
async fn rebuild_for_unknown_partition_is_not_found() {
    let fixture = fixture().await;
    let result = fixture
        .pipeline
        .rebuild_matching("ghost", "ns", None, false, &ProgressReporter::noop())
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
