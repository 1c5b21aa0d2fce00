use crate::{error::AppError, partition::Partition, storage::db::SurrealDbClient, stored_object};

stored_object!(IndexMeta, "indices", {
    tenant_id: String,
    namespace: String,
    document_type: String,
    embedding_version: String,
    dimension: u32,
    ntotal: u64,
    dirty: bool,
    file_path: String,
    mutation_counter: u64
});

impl IndexMeta {
    pub fn new(partition: &Partition, dimension: u32, file_path: String) -> Self {
        let now = Utc::now();
        Self {
            id: partition.slug(),
            created_at: now,
            updated_at: now,
            tenant_id: partition.tenant_id.clone(),
            namespace: partition.namespace.clone(),
            document_type: partition.document_type.clone(),
            embedding_version: partition.embedding_version.clone(),
            dimension,
            ntotal: 0,
            dirty: false,
            file_path,
            mutation_counter: 0,
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

    pub async fn get(
        db: &SurrealDbClient,
        partition: &Partition,
    ) -> Result<Option<Self>, AppError> {
        Ok(db.get_item::<Self>(&partition.slug()).await?)
    }

    /// Flag the partition as containing rows for deleted chunks. Queries stay
    /// safe because retrieval filters against the store; a rebuild clears it.
    pub async fn mark_dirty(db: &SurrealDbClient, partition: &Partition) -> Result<(), AppError> {
        db.query("UPDATE type::thing('indices', $slug) SET dirty = true, updated_at = time::now()")
            .bind(("slug", partition.slug()))
            .await?;
        Ok(())
    }

    /// Persist the outcome of an index rebuild: new `faiss_id` assignments
    /// for every surviving chunk plus the refreshed index row, atomically.
    /// The new index file is already in place on disk.
    pub async fn commit_rebuild(
        db: &SurrealDbClient,
        partition: &Partition,
        assignments: &[(String, i64)],
        dimension: u32,
        ntotal: u64,
        file_path: &str,
    ) -> Result<(), AppError> {
        #[derive(Serialize)]
        struct RowAssignment {
            chunk_id: String,
            faiss_id: i64,
        }

        let rows: Vec<RowAssignment> = assignments
            .iter()
            .map(|(chunk_id, faiss_id)| RowAssignment {
                chunk_id: chunk_id.clone(),
                faiss_id: *faiss_id,
            })
            .collect();

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(
                "FOR $row IN $assignments { \
                 UPDATE type::thing('chunks', $row.chunk_id) SET \
                 faiss_id = $row.faiss_id, \
                 updated_at = time::now(); \
                 };",
            )
            .query(
                "UPDATE type::thing('indices', $slug) SET \
                 dimension = $dimension, \
                 ntotal = $ntotal, \
                 dirty = false, \
                 file_path = $file_path, \
                 updated_at = time::now();",
            )
            .query("COMMIT TRANSACTION;")
            .bind(("assignments", rows))
            .bind(("slug", partition.slug()))
            .bind(("dimension", dimension))
            .bind(("ntotal", ntotal))
            .bind(("file_path", file_path.to_owned()))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Reconcile the row with what is actually on disk. Used at startup when
    /// the process died between the file swap and the metadata commit: the
    /// on-disk index wins.
    pub async fn trust_disk(
        db: &SurrealDbClient,
        partition: &Partition,
        dimension: u32,
        ntotal: u64,
        file_path: &str,
    ) -> Result<(), AppError> {
        db.query(
            "UPSERT type::thing('indices', $slug) SET \
             tenant_id = $tenant_id, \
             namespace = $namespace, \
             document_type = $document_type, \
             embedding_version = $embedding_version, \
             dimension = $dimension, \
             ntotal = $ntotal, \
             dirty = dirty ?? false, \
             file_path = $file_path, \
             mutation_counter = (mutation_counter ?? 0), \
             created_at = created_at ?? time::now(), \
             updated_at = time::now()",
        )
        .bind(("slug", partition.slug()))
        .bind(("tenant_id", partition.tenant_id.clone()))
        .bind(("namespace", partition.namespace.clone()))
        .bind(("document_type", partition.document_type.clone()))
        .bind(("embedding_version", partition.embedding_version.clone()))
        .bind(("dimension", dimension))
        .bind(("ntotal", ntotal))
        .bind(("file_path", file_path.to_owned()))
        .await?;

        Ok(())
    }
}
