use std::sync::LazyLock;

use regex::Regex;

use crate::chunking::{
    helpers::{pack_blocks, parse_blocks},
    ChunkConfig, ChunkStrategy, DocumentHints,
};

#[allow(clippy::expect_used)]
static PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\[PAGE \d+\]\s*$").expect("static page regex compiles"));

/// PDF-extracted text: `[PAGE N]` markers bound chunks, tables stay whole.
pub struct PageTableAware;

impl ChunkStrategy for PageTableAware {
    fn name(&self) -> &'static str {
        "page_plus_table_aware"
    }

    fn defaults(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: 1500,
            overlap: 200,
        }
    }

    fn detect(&self, text: &str, hints: &DocumentHints) -> f32 {
        let mut score: f32 = 0.0;
        if PAGE_MARKER.is_match(text) {
            score += 0.9;
        }
        if hints.mime_type == Some("application/pdf") {
            score += 0.5;
        }
        score.min(1.0)
    }

    fn chunk(&self, text: &str, config: &ChunkConfig) -> Vec<String> {
        let mut chunks = Vec::new();
        for page in split_pages(text) {
            // Packing restarts per page; overlap never crosses a marker.
            let blocks = parse_blocks(page);
            chunks.extend(pack_blocks(&blocks, config.max_chars, config.overlap));
        }
        chunks
    }
}

/// Segments starting at each page marker; text before the first marker is
/// its own segment.
fn split_pages(text: &str) -> Vec<&str> {
    let starts: Vec<usize> = PAGE_MARKER.find_iter(text).map(|m| m.start()).collect();
    if starts.is_empty() {
        return vec![text];
    }

    let mut pages = Vec::with_capacity(starts.len() + 1);
    if starts[0] > 0 {
        pages.push(&text[..starts[0]]);
    }
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        pages.push(&text[start..end]);
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_page_markers_and_pdf_mime() {
        let hints = DocumentHints::default();
        assert!(PageTableAware.detect("[PAGE 1]\ntext", &hints) >= 0.9);
        assert!(PageTableAware.detect("no markers here", &hints) < 0.3);

        let pdf_hints = DocumentHints {
            mime_type: Some("application/pdf"),
            ..DocumentHints::default()
        };
        assert!(PageTableAware.detect("no markers here", &pdf_hints) >= 0.5);
    }

    #[test]
    fn never_packs_across_page_markers() {
        let text = "[PAGE 1]\nshort page one.\n\n[PAGE 2]\nshort page two.";
        let chunks = PageTableAware.chunk(
            text,
            &ChunkConfig {
                max_chars: 1500,
                overlap: 0,
            },
        );
        // Both pages are tiny, yet they must not merge into one chunk.
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("[PAGE 1]"));
        assert!(!chunks[0].contains("[PAGE 2]"));
        assert!(chunks[1].contains("[PAGE 2]"));
    }

    #[test]
    fn tables_within_a_page_stay_atomic() {
        let table = "| col | val |\n| a | 1 |\n| b | 2 |";
        let text = format!("[PAGE 1]\nintro text.\n\n{table}\n\nmore prose.");
        let chunks = PageTableAware.chunk(
            &text,
            &ChunkConfig {
                max_chars: 60,
                overlap: 0,
            },
        );
        let table_chunks: Vec<_> = chunks.iter().filter(|c| c.contains("| col |")).collect();
        assert_eq!(table_chunks.len(), 1);
        assert!(table_chunks[0].contains("| b | 2 |"));
    }

    #[test]
    fn text_before_first_marker_is_preserved() {
        let text = "cover sheet text\n[PAGE 1]\nbody";
        let chunks = PageTableAware.chunk(
            text,
            &ChunkConfig {
                max_chars: 1500,
                overlap: 0,
            },
        );
        let joined = chunks.concat();
        assert!(joined.contains("cover sheet text"));
        assert!(joined.contains("body"));
    }
}
