pub mod helpers;
pub mod strategies;

use common::error::AppError;
use serde::Serialize;

use strategies::{
    administrative::Administrative, conversation::ConversationTurns, fallback::DefaultStrategy,
    legal::Legal, menus::Menus, pages::PageTableAware, reviews::Reviews,
    sections::SemanticSections, tables::TableAware,
};

/// Per-strategy chunking limits, overridable per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkConfig {
    pub max_chars: usize,
    pub overlap: usize,
}

/// Request-level signals that feed strategy auto-detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentHints<'a> {
    pub filename: &'a str,
    pub mime_type: Option<&'a str>,
    pub document_type: Option<&'a str>,
    /// `source` key of the request metadata, e.g. `google_reviews`.
    pub source: Option<&'a str>,
}

/// One chunking strategy: a relevance score against a document plus the
/// actual splitting rule. Implementations are registered in a fixed
/// priority order; adding one is purely additive.
pub trait ChunkStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn defaults(&self) -> ChunkConfig;
    /// Applicability in `[0, 1]`, evaluated over the detection window.
    fn detect(&self, text: &str, hints: &DocumentHints) -> f32;
    fn chunk(&self, text: &str, config: &ChunkConfig) -> Vec<String>;
}

/// Priority order doubles as the tie-break for equal detection scores.
static REGISTRY: &[&(dyn ChunkStrategy)] = &[
    &PageTableAware,
    &SemanticSections,
    &ConversationTurns,
    &TableAware,
    &Reviews,
    &Menus,
    &Legal,
    &Administrative,
    &DefaultStrategy,
];

/// Auto-detection only looks at the head of the document.
pub const DETECTION_WINDOW_CHARS: usize = 2000;
/// Below this best score the fallback strategy is used.
pub const MIN_DETECTION_SCORE: f32 = 0.3;

pub fn registry() -> &'static [&'static (dyn ChunkStrategy)] {
    REGISTRY
}

pub fn strategy_by_name(name: &str) -> Option<&'static (dyn ChunkStrategy)> {
    REGISTRY.iter().copied().find(|s| s.name() == name)
}

fn detection_window(text: &str) -> &str {
    match text.char_indices().nth(DETECTION_WINDOW_CHARS) {
        Some((byte_offset, _)) => &text[..byte_offset],
        None => text,
    }
}

/// Applicability scores for every registered strategy, in registry order.
pub fn detection_scores(text: &str, hints: &DocumentHints) -> Vec<(&'static str, f32)> {
    let window = detection_window(text);
    REGISTRY
        .iter()
        .map(|s| (s.name(), s.detect(window, hints).clamp(0.0, 1.0)))
        .collect()
}

/// Pick a strategy: an explicitly requested one wins, otherwise the highest
/// detection score; ties break toward the earlier registry entry.
pub fn select_strategy(
    text: &str,
    hints: &DocumentHints,
    requested: Option<&str>,
) -> Result<&'static (dyn ChunkStrategy), AppError> {
    if let Some(name) = requested {
        return strategy_by_name(name).ok_or_else(|| {
            AppError::Validation(format!("unknown chunk strategy '{name}'"))
        });
    }

    let mut best: (&'static (dyn ChunkStrategy), f32) = (&DefaultStrategy, 0.0);
    let window = detection_window(text);
    for strategy in REGISTRY {
        let score = strategy.detect(window, hints).clamp(0.0, 1.0);
        if score > best.1 {
            best = (*strategy, score);
        }
    }

    if best.1 < MIN_DETECTION_SCORE {
        return Ok(&DefaultStrategy);
    }
    Ok(best.0)
}

#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub strategy: &'static str,
    pub config: ChunkConfig,
    pub chunks: Vec<String>,
}

/// Chunk a document end to end: select the strategy, apply overrides, split
/// and drop empty fragments. Empty input yields zero chunks without error.
pub fn chunk_document(
    text: &str,
    hints: &DocumentHints,
    requested_strategy: Option<&str>,
    overlap_override: Option<usize>,
) -> Result<ChunkOutcome, AppError> {
    let strategy = select_strategy(text, hints, requested_strategy)?;
    let mut config = strategy.defaults();
    if let Some(overlap) = overlap_override {
        config.overlap = overlap.min(config.max_chars / 2);
    }

    if text.trim().is_empty() {
        return Ok(ChunkOutcome {
            strategy: strategy.name(),
            config,
            chunks: Vec::new(),
        });
    }

    let chunks = strategy
        .chunk(text, &config)
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .collect();

    Ok(ChunkOutcome {
        strategy: strategy.name(),
        config,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_zero_chunks() {
        let outcome = chunk_document("   \n\t ", &DocumentHints::default(), None, None)
            .expect("chunk");
        assert!(outcome.chunks.is_empty());
    }

    #[test]
    fn unknown_requested_strategy_is_a_validation_error() {
        let result = chunk_document("hello", &DocumentHints::default(), Some("nope"), None);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn requested_strategy_overrides_detection() {
        let text = "[PAGE 1]\nsome pdf-ish text";
        let outcome = chunk_document(text, &DocumentHints::default(), Some("default"), None)
            .expect("chunk");
        assert_eq!(outcome.strategy, "default");
    }

    #[test]
    fn plain_prose_falls_back_to_default() {
        let text = "Just an ordinary paragraph about nothing in particular.";
        let selected = select_strategy(text, &DocumentHints::default(), None).expect("select");
        assert_eq!(selected.name(), "default");
    }

    #[test]
    fn page_markers_win_detection() {
        let text = "[PAGE 1]\nIntro text.\n\n[PAGE 2]\nMore text.";
        let selected = select_strategy(text, &DocumentHints::default(), None).expect("select");
        assert_eq!(selected.name(), "page_plus_table_aware");
    }

    #[test]
    fn detection_scores_cover_every_strategy() {
        let scores = detection_scores("hello", &DocumentHints::default());
        assert_eq!(scores.len(), registry().len());
        assert!(scores.iter().all(|(_, s)| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn detection_only_reads_the_window() {
        // Page markers far beyond the 2000-char window must not trigger.
        let mut text = "plain text. ".repeat(300);
        text.push_str("\n[PAGE 2]\nlate marker");
        let selected = select_strategy(&text, &DocumentHints::default(), None).expect("select");
        assert_eq!(selected.name(), "default");
    }

    #[test]
    fn overlap_override_is_applied_and_capped() {
        let text = "word ".repeat(400);
        let outcome =
            chunk_document(&text, &DocumentHints::default(), Some("default"), Some(10_000))
                .expect("chunk");
        assert_eq!(outcome.config.overlap, outcome.config.max_chars / 2);
    }
}
