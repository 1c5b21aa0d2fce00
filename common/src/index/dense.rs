use std::{
    fs,
    io::Write as _,
    path::Path,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{error::AppError, utils::hash::hex_encode};

const MAGIC: &[u8; 4] = b"QIDX";
const FORMAT_VERSION: u32 = 1;

/// Flat inner-product index over L2-normalized vectors.
///
/// Rows are addressed by their insertion position (`faiss_id`). The on-disk
/// form is a plain little-endian matrix with a small header and a JSON
/// sidecar carrying dimension, row count and a sha256 of the index file.
/// Files are immutable once written; updates go through an atomic swap.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseIndex {
    dimension: usize,
    vectors: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DenseIndexMeta {
    pub dimension: u32,
    pub ntotal: u64,
    pub sha256: String,
}

impl DenseIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn ntotal(&self) -> u64 {
        if self.dimension == 0 {
            return 0;
        }
        (self.vectors.len() / self.dimension) as u64
    }

    /// Append one vector; returns the row id it was assigned.
    pub fn append(&mut self, vector: &[f32]) -> Result<i64, AppError> {
        if vector.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        let id = self.ntotal() as i64;
        self.vectors.extend_from_slice(vector);
        Ok(id)
    }

    pub fn row(&self, id: i64) -> Option<&[f32]> {
        if id < 0 {
            return None;
        }
        let start = (id as usize).checked_mul(self.dimension)?;
        let end = start.checked_add(self.dimension)?;
        self.vectors.get(start..end)
    }

    /// Inner-product top-k. Scores equal cosine similarity for unit vectors.
    /// Ordering is score-descending with row id as the deterministic
    /// tie-break.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(i64, f32)> {
        if query.len() != self.dimension || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(i64, f32)> = (0..self.ntotal() as i64)
            .filter_map(|id| {
                let row = self.row(id)?;
                let score = row.iter().zip(query).map(|(a, b)| a * b).sum::<f32>();
                Some((id, score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(4 + 4 + 4 + 8 + self.vectors.len() * std::mem::size_of::<f32>());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&self.ntotal().to_le_bytes());
        for value in &self.vectors {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self, AppError> {
        let corrupt = |reason: &str| {
            AppError::IndexCorrupt(format!("{}: {reason}", path.display()))
        };

        if bytes.len() < 20 || &bytes[0..4] != MAGIC {
            return Err(corrupt("bad magic or truncated header"));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().map_err(|_| corrupt("header"))?);
        if version != FORMAT_VERSION {
            return Err(corrupt("unsupported format version"));
        }
        let dimension =
            u32::from_le_bytes(bytes[8..12].try_into().map_err(|_| corrupt("header"))?) as usize;
        let ntotal =
            u64::from_le_bytes(bytes[12..20].try_into().map_err(|_| corrupt("header"))?) as usize;

        let expected = 20 + ntotal * dimension * std::mem::size_of::<f32>();
        if bytes.len() != expected {
            return Err(corrupt("payload length mismatch"));
        }

        let mut vectors = Vec::with_capacity(ntotal * dimension);
        for value in bytes[20..].chunks_exact(4) {
            vectors.push(f32::from_le_bytes(
                value.try_into().map_err(|_| corrupt("payload"))?,
            ));
        }

        Ok(Self { dimension, vectors })
    }

    /// Atomic persist: write a temp file in the target directory, fsync,
    /// rename over the destination, fsync the directory, then refresh the
    /// sidecar the same way. A crash leaves either the old or the new index
    /// fully intact.
    pub fn write_atomic(&self, path: &Path) -> Result<DenseIndexMeta, AppError> {
        let parent = path
            .parent()
            .ok_or_else(|| AppError::InternalError("index path has no parent".to_owned()))?;
        fs::create_dir_all(parent)?;

        let bytes = self.to_bytes();
        let sha256 = hex_encode(&Sha256::digest(&bytes));

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| AppError::Io(e.error))?;
        fs::File::open(parent)?.sync_all()?;

        let meta = DenseIndexMeta {
            dimension: self.dimension as u32,
            ntotal: self.ntotal(),
            sha256,
        };
        let meta_bytes = serde_json::to_vec(&meta)
            .map_err(|e| AppError::InternalError(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&meta_bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(meta_path(path))
            .map_err(|e| AppError::Io(e.error))?;
        fs::File::open(parent)?.sync_all()?;

        Ok(meta)
    }

    /// Load and verify an index file against its sidecar. Any mismatch is
    /// surfaced as `IndexCorrupt` so the caller can mark the partition dirty
    /// and schedule a rebuild.
    pub fn read_verified(path: &Path) -> Result<(Self, DenseIndexMeta), AppError> {
        let meta = read_meta(path)?;
        let bytes = fs::read(path)?;

        let sha256 = hex_encode(&Sha256::digest(&bytes));
        if sha256 != meta.sha256 {
            return Err(AppError::IndexCorrupt(format!(
                "{}: sha256 mismatch",
                path.display()
            )));
        }

        let index = Self::from_bytes(&bytes, path)?;
        if index.dimension != meta.dimension as usize || index.ntotal() != meta.ntotal {
            return Err(AppError::IndexCorrupt(format!(
                "{}: sidecar metadata disagrees with payload",
                path.display()
            )));
        }

        Ok((index, meta))
    }
}

pub fn meta_path(index_path: &Path) -> std::path::PathBuf {
    index_path.with_extension("meta")
}

pub fn read_meta(index_path: &Path) -> Result<DenseIndexMeta, AppError> {
    let bytes = fs::read(meta_path(index_path)).map_err(|e| {
        AppError::IndexCorrupt(format!(
            "{}: sidecar unreadable: {e}",
            index_path.display()
        ))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        AppError::IndexCorrupt(format!("{}: sidecar malformed: {e}", index_path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::embedding::l2_normalize;

    fn unit(mut v: Vec<f32>) -> Vec<f32> {
        l2_normalize(&mut v);
        v
    }

    #[test]
    fn append_assigns_sequential_row_ids() {
        let mut index = DenseIndex::new(3);
        assert_eq!(index.append(&[1.0, 0.0, 0.0]).expect("append"), 0);
        assert_eq!(index.append(&[0.0, 1.0, 0.0]).expect("append"), 1);
        assert_eq!(index.ntotal(), 2);
        assert!(index.append(&[0.0, 1.0]).is_err());
    }

    #[test]
    fn search_orders_by_score_then_row_id() {
        let mut index = DenseIndex::new(2);
        index.append(&unit(vec![0.0, 1.0])).expect("append");
        index.append(&unit(vec![1.0, 0.0])).expect("append");
        // Duplicate of row 1 to exercise the tie-break.
        index.append(&unit(vec![1.0, 0.0])).expect("append");

        let hits = index.search(&unit(vec![1.0, 0.0]), 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1].0, 2);
        assert_eq!(hits[2].0, 0);
        assert!(hits[0].1 >= hits[2].1);
    }

    #[test]
    fn search_with_wrong_dimension_returns_nothing() {
        let mut index = DenseIndex::new(3);
        index.append(&[1.0, 0.0, 0.0]).expect("append");
        assert!(index.search(&[1.0, 0.0], 5).is_empty());
    }

    #[test]
    fn write_read_roundtrip_preserves_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.idx");

        let mut index = DenseIndex::new(2);
        index.append(&[0.6, 0.8]).expect("append");
        index.append(&[1.0, 0.0]).expect("append");

        let meta = index.write_atomic(&path).expect("write");
        assert_eq!(meta.ntotal, 2);
        assert_eq!(meta.dimension, 2);

        let (loaded, loaded_meta) = DenseIndex::read_verified(&path).expect("read");
        assert_eq!(loaded, index);
        assert_eq!(loaded_meta, meta);
    }

    #[test]
    fn swap_replaces_previous_version_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.idx");

        let mut first = DenseIndex::new(2);
        first.append(&[1.0, 0.0]).expect("append");
        first.write_atomic(&path).expect("write");

        let mut second = DenseIndex::new(2);
        second.append(&[0.0, 1.0]).expect("append");
        second.append(&[1.0, 0.0]).expect("append");
        second.write_atomic(&path).expect("write");

        let (loaded, meta) = DenseIndex::read_verified(&path).expect("read");
        assert_eq!(loaded, second);
        assert_eq!(meta.ntotal, 2);
    }

    #[test]
    fn tampered_file_is_reported_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.idx");

        let mut index = DenseIndex::new(2);
        index.append(&[1.0, 0.0]).expect("append");
        index.write_atomic(&path).expect("write");

        let mut bytes = fs::read(&path).expect("read file");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).expect("tamper");

        match DenseIndex::read_verified(&path) {
            Err(AppError::IndexCorrupt(_)) => {}
            other => panic!("expected IndexCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn missing_sidecar_is_reported_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.idx");

        let mut index = DenseIndex::new(2);
        index.append(&[1.0, 0.0]).expect("append");
        index.write_atomic(&path).expect("write");
        fs::remove_file(meta_path(&path)).expect("remove sidecar");

        assert!(matches!(
            DenseIndex::read_verified(&path),
            Err(AppError::IndexCorrupt(_))
        ));
    }
}
