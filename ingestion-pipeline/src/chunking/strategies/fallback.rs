use crate::chunking::{helpers::pack_paragraphs, ChunkConfig, ChunkStrategy, DocumentHints};

/// The catch-all: greedy paragraph packing. Never wins auto-detection on
/// score; it is chosen when nothing else clears the threshold.
pub struct DefaultStrategy;

impl ChunkStrategy for DefaultStrategy {
    fn name(&self) -> &'static str {
        "default"
    }

    fn defaults(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: 800,
            overlap: 0,
        }
    }

    fn detect(&self, _text: &str, _hints: &DocumentHints) -> f32 {
        0.0
    }

    fn chunk(&self, text: &str, config: &ChunkConfig) -> Vec<String> {
        pack_paragraphs(text, config.max_chars, config.overlap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_paragraphs_up_to_the_budget() {
        let text = "short one.\n\nshort two.\n\nshort three.";
        let chunks = DefaultStrategy.chunk(text, &DefaultStrategy.defaults());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("short three."));
    }

    #[test]
    fn splits_oversized_paragraphs_at_sentence_boundaries() {
        let text = "First sentence here. Second sentence follows. Third sentence closes."
            .repeat(20);
        let chunks = DefaultStrategy.chunk(
            &text,
            &ChunkConfig {
                max_chars: 100,
                overlap: 0,
            },
        );
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }

    #[test]
    fn single_unbroken_token_is_cut_at_the_byte_budget() {
        let text = "x".repeat(2500);
        let chunks = DefaultStrategy.chunk(&text, &DefaultStrategy.defaults());
        assert!(chunks.iter().all(|c| c.chars().count() <= 800));
        assert_eq!(chunks.concat().len(), 2500);
    }
}
