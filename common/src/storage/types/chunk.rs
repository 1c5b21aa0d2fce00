use std::collections::HashSet;

use crate::{
    error::AppError, partition::Partition, storage::db::SurrealDbClient, stored_object,
    utils::hash::content_hash,
};

use super::document::Document;

stored_object!(Chunk, "chunks", {
    document_uid: String,
    doc_id: String,
    tenant_id: String,
    namespace: String,
    document_type: String,
    embedding_version: String,
    raw_text: String,
    embed_text: String,
    chunk_hash: String,
    faiss_id: Option<i64>,
    ordinal: u32,
    metadata: serde_json::Value,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<DateTime<Utc>>
});

impl Chunk {
    /// Chunk ids are shaped `{document_uid}#c{NNNN}`. Each upsert creates a
    /// fresh document row, so ids never collide with soft-deleted
    /// generations while ordinals stay contiguous from zero.
    pub fn new(
        document: &Document,
        ordinal: u32,
        raw_text: String,
        embed_text: String,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("{}#c{ordinal:04}", document.id),
            created_at: now,
            updated_at: now,
            document_uid: document.id.clone(),
            doc_id: document.doc_id.clone(),
            tenant_id: document.tenant_id.clone(),
            namespace: document.namespace.clone(),
            document_type: document.document_type.clone(),
            embedding_version: document.embedding_version.clone(),
            chunk_hash: content_hash(&raw_text),
            raw_text,
            embed_text,
            faiss_id: None,
            ordinal,
            metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
            deleted_at: None,
        }
    }

    /// All live chunks of a partition, in a stable order.
    pub async fn live_for_partition(
        db: &SurrealDbClient,
        partition: &Partition,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM chunks \
                 WHERE tenant_id = $tenant_id \
                   AND namespace = $namespace \
                   AND document_type = $document_type \
                   AND embedding_version = $embedding_version \
                   AND deleted_at = NONE \
                 ORDER BY document_uid, ordinal",
            )
            .bind(("tenant_id", partition.tenant_id.clone()))
            .bind(("namespace", partition.namespace.clone()))
            .bind(("document_type", partition.document_type.clone()))
            .bind(("embedding_version", partition.embedding_version.clone()))
            .await?;

        Ok(response.take(0)?)
    }

    /// Live chunks backing the given dense-index rows.
    pub async fn live_by_faiss_ids(
        db: &SurrealDbClient,
        partition: &Partition,
        faiss_ids: Vec<i64>,
    ) -> Result<Vec<Self>, AppError> {
        if faiss_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = db
            .query(
                "SELECT * FROM chunks \
                 WHERE tenant_id = $tenant_id \
                   AND namespace = $namespace \
                   AND document_type = $document_type \
                   AND embedding_version = $embedding_version \
                   AND faiss_id IN $faiss_ids \
                   AND deleted_at = NONE",
            )
            .bind(("tenant_id", partition.tenant_id.clone()))
            .bind(("namespace", partition.namespace.clone()))
            .bind(("document_type", partition.document_type.clone()))
            .bind(("embedding_version", partition.embedding_version.clone()))
            .bind(("faiss_ids", faiss_ids))
            .await?;

        Ok(response.take(0)?)
    }

    /// Live chunks by record id; soft-deleted rows are silently dropped.
    pub async fn live_by_ids(
        db: &SurrealDbClient,
        ids: Vec<String>,
    ) -> Result<Vec<Self>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let things: Vec<Thing> = ids
            .iter()
            .map(|id| Thing::from((Self::table_name(), id.as_str())))
            .collect();

        let mut response = db
            .query("SELECT * FROM chunks WHERE id IN $things AND deleted_at = NONE")
            .bind(("things", things))
            .await?;

        Ok(response.take(0)?)
    }

    /// Hashes of live chunks in a `(tenant, namespace)` partition, used to
    /// skip duplicate inserts. A document being replaced in the same
    /// transaction is excluded so its own unchanged chunks do not count as
    /// duplicates.
    pub async fn live_hashes(
        db: &SurrealDbClient,
        tenant_id: &str,
        namespace: &str,
        exclude_document_uid: Option<&str>,
    ) -> Result<HashSet<String>, AppError> {
        let mut response = db
            .query(
                "SELECT VALUE chunk_hash FROM chunks \
                 WHERE tenant_id = $tenant_id \
                   AND namespace = $namespace \
                   AND deleted_at = NONE \
                   AND document_uid != $excluded",
            )
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("namespace", namespace.to_owned()))
            .bind(("excluded", exclude_document_uid.unwrap_or_default().to_owned()))
            .await?;

        let hashes: Vec<String> = response.take(0)?;
        Ok(hashes.into_iter().collect())
    }

    pub async fn count_live_for_document(
        db: &SurrealDbClient,
        document_uid: &str,
    ) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct Row {
            count: usize,
        }

        let mut response = db
            .query(
                "SELECT count() AS count FROM chunks \
                 WHERE document_uid = $uid AND deleted_at = NONE \
                 GROUP ALL",
            )
            .bind(("uid", document_uid.to_owned()))
            .await?;

        let rows: Vec<Row> = response.take(0)?;
        Ok(rows.first().map_or(0, |row| row.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn partition() -> Partition {
        Partition::new("acme", "p1", None, "v1")
    }

    fn sample_document(doc_id: &str) -> Document {
        Document::new(
            &partition(),
            doc_id.to_owned(),
            "notes.txt".to_owned(),
            None,
            "hash".to_owned(),
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

    #[test]
    fn chunk_id_carries_document_uid_and_ordinal() {
        let doc = sample_document("d1");
        let chunk = Chunk::new(&doc, 7, "body".into(), "body".into(), None);
        assert_eq!(chunk.id, format!("{}#c0007", doc.id));
        assert_eq!(chunk.ordinal, 7);
        assert_eq!(chunk.chunk_hash, content_hash("body"));
        assert!(chunk.faiss_id.is_none());
    }

    #[tokio::test]
    async fn live_queries_filter_deleted_and_foreign_partitions() {
        let db = memory_db().await;

        let doc = sample_document("d1");
        db.store_item(doc.clone()).await.expect("store doc");

        let mut live = Chunk::new(&doc, 0, "alpha".into(), "alpha".into(), None);
        live.faiss_id = Some(0);
        let mut deleted = Chunk::new(&doc, 1, "beta".into(), "beta".into(), None);
        deleted.faiss_id = Some(1);
        deleted.deleted_at = Some(Utc::now());

        let other_partition = Partition::new("globex", "p1", None, "v1");
        let other_doc = Document::new(
            &other_partition,
            "d9".to_owned(),
            "other.txt".to_owned(),
            None,
            "hash".to_owned(),
            "default".to_owned(),
        );
        db.store_item(other_doc.clone()).await.expect("store doc");
        let mut foreign = Chunk::new(&other_doc, 0, "gamma".into(), "gamma".into(), None);
        foreign.faiss_id = Some(0);

        db.store_item(live.clone()).await.expect("store chunk");
        db.store_item(deleted.clone()).await.expect("store chunk");
        db.store_item(foreign.clone()).await.expect("store chunk");

        let rows = Chunk::live_for_partition(&db, &partition())
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, live.id);

        let rows = Chunk::live_by_faiss_ids(&db, &partition(), vec![0, 1])
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, live.id);

        let rows = Chunk::live_by_ids(&db, vec![live.id.clone(), deleted.id.clone()])
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, live.id);
    }

    #[tokio::test]
    async fn live_hashes_are_scoped_to_tenant_and_namespace() {
        let db = memory_db().await;

        let doc = sample_document("d1");
        db.store_item(doc.clone()).await.expect("store doc");
        db.store_item(Chunk::new(&doc, 0, "alpha".into(), "alpha".into(), None))
            .await
            .expect("store chunk");

        let hashes = Chunk::live_hashes(&db, "acme", "p1", None)
            .await
            .expect("query");
        assert!(hashes.contains(&content_hash("alpha")));

        let hashes = Chunk::live_hashes(&db, "globex", "p1", None)
            .await
            .expect("query");
        assert!(hashes.is_empty());

        let hashes = Chunk::live_hashes(&db, "acme", "p1", Some(&doc.id))
            .await
            .expect("query");
        assert!(hashes.is_empty(), "excluded document's hashes are skipped");
    }

    #[tokio::test]
    async fn count_live_for_document_ignores_deleted() {
        let db = memory_db().await;

        let doc = sample_document("d1");
        db.store_item(doc.clone()).await.expect("store doc");
        db.store_item(Chunk::new(&doc, 0, "alpha".into(), "alpha".into(), None))
            .await
            .expect("store chunk");
        let mut gone = Chunk::new(&doc, 1, "beta".into(), "beta".into(), None);
        gone.deleted_at = Some(Utc::now());
        db.store_item(gone).await.expect("store chunk");

        let count = Chunk::count_live_for_document(&db, &doc.id)
            .await
            .expect("count");
        assert_eq!(count, 1);
    }
}
