use crate::chunking::{
    helpers::{is_table_line, pack_blocks, parse_blocks, Block},
    ChunkConfig, ChunkStrategy, DocumentHints,
};

/// Mixed documents with embedded tables: every detected table becomes one
/// atomic `[TABLE]` chunk, narrative in between packs normally.
pub struct TableAware;

impl ChunkStrategy for TableAware {
    fn name(&self) -> &'static str {
        "table_aware"
    }

    fn defaults(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: 1000,
            overlap: 100,
        }
    }

    fn detect(&self, text: &str, _hints: &DocumentHints) -> f32 {
        let mut longest_run = 0usize;
        let mut run = 0usize;
        for line in text.lines() {
            if is_table_line(line) {
                run += 1;
                longest_run = longest_run.max(run);
            } else {
                run = 0;
            }
        }
        if longest_run < 3 {
            return 0.0;
        }
        (0.55 + 0.05 * (longest_run as f32 - 3.0)).min(0.8)
    }

    fn chunk(&self, text: &str, config: &ChunkConfig) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut narrative: Vec<Block> = Vec::new();

        let flush =
            |narrative: &mut Vec<Block>, chunks: &mut Vec<String>, config: &ChunkConfig| {
                if narrative.is_empty() {
                    return;
                }
                chunks.extend(pack_blocks(narrative, config.max_chars, config.overlap));
                narrative.clear();
            };

        for block in parse_blocks(text) {
            if block.atomic {
                flush(&mut narrative, &mut chunks, config);
                chunks.push(format!("[TABLE]\n{}", block.text));
            } else {
                narrative.push(block);
            }
        }
        flush(&mut narrative, &mut chunks, config);

        chunks
    }
}
