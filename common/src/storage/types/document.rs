use uuid::Uuid;

use crate::{
    error::AppError, partition::Partition, storage::db::SurrealDbClient, stored_object,
};

use super::chunk::Chunk;

stored_object!(Document, "docs", {
    tenant_id: String,
    namespace: String,
    doc_id: String,
    filename: String,
    mime_type: Option<String>,
    document_type: String,
    doc_hash: String,
    embedding_version: String,
    chunk_strategy: String,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<DateTime<Utc>>
});

/// Everything the upsert transaction needs to refresh the `indices` row.
#[derive(Debug, Clone)]
pub struct IndexRowUpdate {
    pub partition: Partition,
    pub dimension: u32,
    pub ntotal: u64,
    pub dirty: bool,
    pub file_path: String,
}

impl Document {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        partition: &Partition,
        doc_id: String,
        filename: String,
        mime_type: Option<String>,
        doc_hash: String,
        chunk_strategy: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id: partition.tenant_id.clone(),
            namespace: partition.namespace.clone(),
            doc_id,
            filename,
            mime_type,
            document_type: partition.document_type.clone(),
            doc_hash,
            embedding_version: partition.embedding_version.clone(),
            chunk_strategy,
            deleted_at: None,
        }
    }

    pub fn partition(&self) -> Partition {
        Partition::new(
            self.tenant_id.clone(),
            self.namespace.clone(),
            Some(&self.document_type),
            self.embedding_version.clone(),
        )
    }

    /// The live document for a logical `(tenant, namespace, doc_id)` key.
    pub async fn find_live(
        db: &SurrealDbClient,
        tenant_id: &str,
        namespace: &str,
        doc_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM docs \
                 WHERE tenant_id = $tenant_id \
                   AND namespace = $namespace \
                   AND doc_id = $doc_id \
                   AND deleted_at = NONE \
                 LIMIT 1",
            )
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("namespace", namespace.to_owned()))
            .bind(("doc_id", doc_id.to_owned()))
            .await?;

        let docs: Vec<Self> = response.take(0)?;
        Ok(docs.into_iter().next())
    }

    /// Commit one upsert atomically: soft-delete the prior document and its
    /// chunks (when present), insert the new document and chunk rows, and
    /// refresh the partition's `indices` row. The dense index file has
    /// already been swapped on disk at this point; on crash before commit the
    /// extra file rows are transient dirt that retrieval filters out.
    pub async fn commit_upsert(
        db: &SurrealDbClient,
        prior_document_uid: Option<String>,
        document: Document,
        chunks: Vec<Chunk>,
        index: IndexRowUpdate,
    ) -> Result<(), AppError> {
        let slug = index.partition.slug();
        let document_id = document.id.clone();
        let has_chunks = !chunks.is_empty();

        let mut query = db.client.query("BEGIN TRANSACTION;");

        if prior_document_uid.is_some() {
            query = query
                .query(
                    "UPDATE type::thing('docs', $prior_uid) \
                     SET deleted_at = time::now(), updated_at = time::now();",
                )
                .query(
                    "UPDATE chunks SET deleted_at = time::now(), updated_at = time::now() \
                     WHERE document_uid = $prior_uid AND deleted_at = NONE;",
                );
        }

        query = query.query("CREATE type::thing('docs', $document_id) CONTENT $document;");
        if has_chunks {
            query = query.query("INSERT INTO chunks $chunks;");
        }
        query = query
            .query(
                "UPSERT type::thing('indices', $slug) SET \
                 tenant_id = $tenant_id, \
                 namespace = $namespace, \
                 document_type = $document_type, \
                 embedding_version = $embedding_version, \
                 dimension = $dimension, \
                 ntotal = $ntotal, \
                 dirty = $dirty, \
                 file_path = $file_path, \
                 mutation_counter = (mutation_counter ?? 0) + 1, \
                 created_at = created_at ?? time::now(), \
                 updated_at = time::now();",
            )
            .query("COMMIT TRANSACTION;")
            .bind(("document_id", document_id))
            .bind(("document", document))
            .bind(("slug", slug))
            .bind(("tenant_id", index.partition.tenant_id.clone()))
            .bind(("namespace", index.partition.namespace.clone()))
            .bind(("document_type", index.partition.document_type.clone()))
            .bind(("embedding_version", index.partition.embedding_version.clone()))
            .bind(("dimension", index.dimension))
            .bind(("ntotal", index.ntotal))
            .bind(("dirty", index.dirty))
            .bind(("file_path", index.file_path));

        if let Some(prior_uid) = prior_document_uid {
            query = query.bind(("prior_uid", prior_uid));
        }
        if has_chunks {
            query = query.bind(("chunks", chunks));
        }

        let response = query.await.map_err(AppError::Database)?;
        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Soft-delete a document and all its chunks and mark the partition's
    /// index dirty, in one transaction. Returns the number of chunks that
    /// were live before the delete.
    pub async fn soft_delete_with_chunks(
        db: &SurrealDbClient,
        document: &Document,
    ) -> Result<usize, AppError> {
        let chunks_deleted =
            Chunk::count_live_for_document(db, &document.id).await?;

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(
                "UPDATE type::thing('docs', $uid) \
                 SET deleted_at = time::now(), updated_at = time::now();",
            )
            .query(
                "UPDATE chunks SET deleted_at = time::now(), updated_at = time::now() \
                 WHERE document_uid = $uid AND deleted_at = NONE;",
            )
            .query(
                "UPDATE type::thing('indices', $slug) SET \
                 dirty = true, \
                 mutation_counter = (mutation_counter ?? 0) + 1, \
                 updated_at = time::now();",
            )
            .query("COMMIT TRANSACTION;")
            .bind(("uid", document.id.clone()))
            .bind(("slug", document.partition().slug()))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(chunks_deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> Partition {
        Partition::new("acme", "p1", None, "v1")
    }

    fn sample_document(doc_id: &str) -> Document {
        Document::new(
            &partition(),
            doc_id.to_owned(),
            "notes.txt".to_owned(),
            Some("text/plain".to_owned()),
            "hash-1".to_owned(),
            "default".to_owned(),
        )
    }

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("init schema");
        db
    }

    #[tokio::test]
    async fn find_live_ignores_deleted_documents() {
        let db = memory_db().await;

        let mut deleted = sample_document("d1");
        deleted.deleted_at = Some(Utc::now());
        db.store_item(deleted).await.expect("store deleted");

        let found = Document::find_live(&db, "acme", "p1", "d1")
            .await
            .expect("query");
        assert!(found.is_none());

        let live = sample_document("d1");
        db.store_item(live.clone()).await.expect("store live");

        let found = Document::find_live(&db, "acme", "p1", "d1")
            .await
            .expect("query");
        assert_eq!(found.map(|d| d.id), Some(live.id));
    }

    #[tokio::test]
    async fn commit_upsert_soft_deletes_prior_generation() {
        let db = memory_db().await;

        let old = sample_document("d1");
        let old_uid = old.id.clone();
        db.store_item(old.clone()).await.expect("store old doc");
        let old_chunk = Chunk::new(&old, 0, "old text".into(), "old text".into(), None);
        db.store_item(old_chunk.clone()).await.expect("store chunk");

        let mut new = sample_document("d1");
        new.doc_hash = "hash-2".to_owned();
        let new_chunk = Chunk::new(&new, 0, "new text".into(), "new text".into(), None);

        Document::commit_upsert(
            &db,
            Some(old_uid.clone()),
            new.clone(),
            vec![new_chunk.clone()],
            IndexRowUpdate {
                partition: partition(),
                dimension: 3,
                ntotal: 2,
                dirty: true,
                file_path: "indices/test.idx".to_owned(),
            },
        )
        .await
        .expect("commit upsert");

        let live = Document::find_live(&db, "acme", "p1", "d1")
            .await
            .expect("query")
            .expect("live doc");
        assert_eq!(live.id, new.id);

        let old_doc: Option<Document> = db.get_item(&old_uid).await.expect("get old");
        assert!(old_doc.expect("old row").deleted_at.is_some());

        let old_chunk_row: Option<Chunk> = db.get_item(&old_chunk.id).await.expect("get chunk");
        assert!(old_chunk_row.expect("chunk row").deleted_at.is_some());

        let new_chunk_row: Option<Chunk> = db.get_item(&new_chunk.id).await.expect("get chunk");
        assert!(new_chunk_row.expect("chunk row").deleted_at.is_none());
    }

    #[tokio::test]
    async fn soft_delete_reports_chunk_count() {
        let db = memory_db().await;

        let doc = sample_document("d1");
        db.store_item(doc.clone()).await.expect("store doc");
        for ordinal in 0..3 {
            let chunk = Chunk::new(&doc, ordinal, format!("text {ordinal}"), String::new(), None);
            db.store_item(chunk).await.expect("store chunk");
        }

        let deleted = Document::soft_delete_with_chunks(&db, &doc)
            .await
            .expect("soft delete");
        assert_eq!(deleted, 3);

        let found = Document::find_live(&db, "acme", "p1", "d1")
            .await
            .expect("query");
        assert!(found.is_none());

        // Second delete finds nothing live.
        let deleted = Document::soft_delete_with_chunks(&db, &doc)
            .await
            .expect("soft delete again");
        assert_eq!(deleted, 0);
    }
}
