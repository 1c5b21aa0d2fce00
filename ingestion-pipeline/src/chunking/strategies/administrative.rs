use crate::chunking::{helpers::pack_paragraphs, ChunkConfig, ChunkStrategy, DocumentHints};

/// Section banners that mark the parts of Dutch administrative decisions.
const BANNERS: &[&str] = &[
    "BESLUIT",
    "VOORWAARDEN",
    "OVERWEGINGEN",
    "OVERWEGING",
    "BIJLAGE",
    "TOELICHTING",
    "ONDERTEKENING",
    "ARTIKELSGEWIJS",
];

/// Administrative decisions: every bannered section is its own chunk, even
/// when it is only a line or two.
pub struct Administrative;

impl ChunkStrategy for Administrative {
    fn name(&self) -> &'static str {
        "administrative"
    }

    fn defaults(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: 1200,
            overlap: 100,
        }
    }

    fn detect(&self, text: &str, _hints: &DocumentHints) -> f32 {
        match text.lines().filter(|line| is_banner(line)).count() {
            0 => 0.0,
            1 => 0.55,
            _ => 0.8,
        }
    }

    fn chunk(&self, text: &str, config: &ChunkConfig) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut section: Vec<&str> = Vec::new();

        let flush = |section: &mut Vec<&str>, chunks: &mut Vec<String>| {
            let body = section.join("\n");
            let body = body.trim();
            if body.is_empty() {
                section.clear();
                return;
            }
            if body.chars().count() <= config.max_chars {
                chunks.push(body.to_owned());
            } else {
                chunks.extend(pack_paragraphs(body, config.max_chars, config.overlap));
            }
            section.clear();
        };

        for line in text.lines() {
            if is_banner(line) {
                flush(&mut section, &mut chunks);
            }
            section.push(line);
        }
        flush(&mut section, &mut chunks);

        chunks
    }
}

fn is_banner(line: &str) -> bool {
    let trimmed = line.trim().trim_end_matches(':');
    BANNERS
        .iter()
        .any(|banner| trimmed == *banner || trimmed.starts_with(&format!("{banner} ")))
}
