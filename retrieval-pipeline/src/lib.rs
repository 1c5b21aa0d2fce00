pub mod fusion;
pub mod pipeline;
pub mod reranking;
pub mod sparse;

pub use fusion::{reciprocal_rank_fusion, FusionWeights};
pub use pipeline::{SearchHit, SearchPipeline, SearchRequest, DEFAULT_TOP_K, MAX_TOP_K};
pub use reranking::{RerankerLease, RerankerPool};
pub use sparse::{SparseCache, SparseIndexState, WordTokenizer};
