use serde::{Deserialize, Serialize};

/// Reciprocal Rank Fusion constant.
pub const RRF_K: f32 = 60.0;

/// Relative weight of the dense and sparse rankings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionWeights {
    pub dense: f32,
    pub sparse: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            dense: 0.7,
            sparse: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: String,
    pub score: f32,
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
}

/// Fuse two rankings with RRF:
/// `fused(c) = w_d / (k + rank_d(c)) + w_s / (k + rank_s(c))`.
///
/// Ranks are 1-based; a candidate present in only one list contributes only
/// that side. Output is score-descending, ties broken by ascending chunk id,
/// and zero-scored candidates dropped so that zeroing one weight reproduces
/// the other ranking exactly.
pub fn reciprocal_rank_fusion(
    dense: &[(String, f32)],
    sparse: &[(String, f32)],
    weights: FusionWeights,
) -> Vec<FusedCandidate> {
    let mut fused: std::collections::HashMap<String, FusedCandidate> =
        std::collections::HashMap::new();

    for (rank0, (chunk_id, _score)) in dense.iter().enumerate() {
        let rank = rank0 + 1;
        let entry = fused
            .entry(chunk_id.clone())
            .or_insert_with(|| FusedCandidate {
                chunk_id: chunk_id.clone(),
                score: 0.0,
                dense_rank: None,
                sparse_rank: None,
            });
        entry.dense_rank = Some(rank);
        entry.score += weights.dense / (RRF_K + rank as f32);
    }

    for (rank0, (chunk_id, _score)) in sparse.iter().enumerate() {
        let rank = rank0 + 1;
        let entry = fused
            .entry(chunk_id.clone())
            .or_insert_with(|| FusedCandidate {
                chunk_id: chunk_id.clone(),
                score: 0.0,
                dense_rank: None,
                sparse_rank: None,
            });
        entry.sparse_rank = Some(rank);
        entry.score += weights.sparse / (RRF_K + rank as f32);
    }

    let mut candidates: Vec<FusedCandidate> = fused
        .into_values()
        .filter(|candidate| candidate.score > 0.0)
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    candidates
}
