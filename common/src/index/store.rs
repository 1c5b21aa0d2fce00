use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    error::AppError,
    index::dense::{meta_path, read_meta, DenseIndex},
    partition::Partition,
    storage::{
        db::SurrealDbClient,
        types::{
            index_meta::IndexMeta,
            job::{Job, JobKind, JobPayload},
        },
    },
};

/// Owns the directory of dense index files, one per partition.
///
/// Handles are opened per request and dropped at the end of it; the store
/// itself never keeps a file open, so a concurrent atomic swap is invisible
/// to in-flight readers.
#[derive(Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, AppError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, partition: &Partition) -> PathBuf {
        self.root.join(partition.index_file_name())
    }

    /// Open a verified snapshot of the partition's index, or `None` when the
    /// partition has no index file yet.
    pub fn open(&self, partition: &Partition) -> Result<Option<DenseIndex>, AppError> {
        let path = self.path_for(partition);
        if !path.exists() {
            return Ok(None);
        }
        let (index, _meta) = DenseIndex::read_verified(&path)?;
        Ok(Some(index))
    }

    /// Persist a new index generation via atomic swap and return its path.
    pub fn write(&self, partition: &Partition, index: &DenseIndex) -> Result<PathBuf, AppError> {
        let path = self.path_for(partition);
        index.write_atomic(&path)?;
        Ok(path)
    }

    /// Startup reconciliation: walk the `indices` rows and trust the disk.
    ///
    /// A process killed between the file rename and the metadata commit
    /// leaves a valid newer file with a stale row; the row is refreshed. A
    /// file that fails verification marks its partition dirty and enqueues a
    /// rebuild. A row whose file vanished entirely is handled the same way.
    pub async fn reconcile(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let rows: Vec<IndexMeta> = db.get_all_stored_items().await?;

        for row in rows {
            let partition = row.partition();
            let path = self.path_for(&partition);

            if !path.exists() {
                if row.ntotal > 0 {
                    warn!(partition = %partition, "index file missing, scheduling rebuild");
                    self.quarantine(db, &partition).await?;
                }
                continue;
            }

            match read_meta(&path).and_then(|_| DenseIndex::read_verified(&path)) {
                Ok((index, meta)) => {
                    if meta.ntotal != row.ntotal || meta.dimension != row.dimension {
                        info!(
                            partition = %partition,
                            disk_ntotal = meta.ntotal,
                            row_ntotal = row.ntotal,
                            "index row out of date, trusting on-disk index"
                        );
                        IndexMeta::trust_disk(
                            db,
                            &partition,
                            index.dimension() as u32,
                            index.ntotal(),
                            &path.to_string_lossy(),
                        )
                        .await?;
                    }
                }
                Err(AppError::IndexCorrupt(reason)) => {
                    warn!(partition = %partition, %reason, "corrupt index file, scheduling rebuild");
                    self.quarantine(db, &partition).await?;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Mark a partition dirty and enqueue its rebuild job.
    pub async fn quarantine(
        &self,
        db: &SurrealDbClient,
        partition: &Partition,
    ) -> Result<Job, AppError> {
        IndexMeta::mark_dirty(db, partition).await?;
        Job::enqueue(
            db,
            JobKind::Rebuild,
            JobPayload::Rebuild {
                tenant_id: partition.tenant_id.clone(),
                namespace: partition.namespace.clone(),
                document_type: Some(partition.document_type.clone()),
                reembed: false,
            },
        )
        .await
    }

    /// Cheap writability probe for the health endpoint.
    pub fn is_writable(&self) -> bool {
        tempfile::NamedTempFile::new_in(&self.root).is_ok()
    }
}
