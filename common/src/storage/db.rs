use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connect to the metadata store.
    ///
    /// Remote engines (`ws://`, `http://`) require credentials; embedded
    /// engines (`mem://`, `surrealkv://`, `rocksdb://`) ignore them.
    pub async fn new(
        address: &str,
        username: Option<&str>,
        password: Option<&str>,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if address.starts_with("ws") || address.starts_with("http") {
            if let (Some(username), Some(password)) = (username, password) {
                db.signin(Root { username, password }).await?;
            }
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define tables and the secondary indexes retrieval and the job queue
    /// depend on. Statements are idempotent.
    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.client
            .query(
                "DEFINE TABLE IF NOT EXISTS docs SCHEMALESS;
                 DEFINE INDEX IF NOT EXISTS idx_docs_partition ON docs FIELDS tenant_id, namespace;
                 DEFINE INDEX IF NOT EXISTS idx_docs_deleted ON docs FIELDS deleted_at;
                 DEFINE TABLE IF NOT EXISTS chunks SCHEMALESS;
                 DEFINE INDEX IF NOT EXISTS idx_chunks_partition ON chunks FIELDS tenant_id, namespace;
                 DEFINE INDEX IF NOT EXISTS idx_chunks_hash ON chunks FIELDS chunk_hash;
                 DEFINE INDEX IF NOT EXISTS idx_chunks_deleted ON chunks FIELDS deleted_at;
                 DEFINE TABLE IF NOT EXISTS indices SCHEMALESS;
                 DEFINE TABLE IF NOT EXISTS jobs SCHEMALESS;
                 DEFINE INDEX IF NOT EXISTS idx_jobs_status ON jobs FIELDS status;
                 DEFINE INDEX IF NOT EXISTS idx_jobs_created ON jobs FIELDS created_at;",
            )
            .await?;

        Ok(())
    }

    /// Store an object, requires the struct to implement StoredObject.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Retrieve all objects from a table.
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Retrieve a single object by its ID.
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Delete a single object by its ID.
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
