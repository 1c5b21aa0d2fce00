use std::sync::LazyLock;

use regex::Regex;

use crate::chunking::{
    helpers::pack_paragraphs,
    ChunkConfig, ChunkStrategy, DocumentHints,
};

#[allow(clippy::expect_used)]
static MARKDOWN_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}\s+\S").expect("static header regex compiles"));
#[allow(clippy::expect_used)]
static UNDERLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(={3,}|-{3,})\s*$").expect("static underline regex compiles"));

/// Header-structured prose: split at headers, header line travels with the
/// section it introduces.
pub struct SemanticSections;

impl ChunkStrategy for SemanticSections {
    fn name(&self) -> &'static str {
        "semantic_sections"
    }

    fn defaults(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: 1200,
            overlap: 150,
        }
    }

    fn detect(&self, text: &str, _hints: &DocumentHints) -> f32 {
        let headers = count_headers(text);
        if headers < 2 {
            return 0.0;
        }
        (0.4 + 0.1 * (headers as f32 - 2.0)).min(0.9)
    }

    fn chunk(&self, text: &str, config: &ChunkConfig) -> Vec<String> {
        let sections = split_sections(text);
        let mut chunks = Vec::new();

        for section in sections {
            if section.body.trim().is_empty() && section.header.is_none() {
                continue;
            }
            let header = section.header.unwrap_or_default();
            let full = if header.is_empty() {
                section.body.clone()
            } else {
                format!("{header}\n{}", section.body)
            };

            if full.chars().count() <= config.max_chars {
                chunks.push(full.trim().to_owned());
                continue;
            }

            // Oversized section: pack the body, repeating the header on each
            // continuation so every chunk stays self-describing.
            for packed in pack_paragraphs(&section.body, config.max_chars, config.overlap) {
                if header.is_empty() {
                    chunks.push(packed);
                } else {
                    chunks.push(format!("{header}\n{packed}"));
                }
            }
        }

        chunks.retain(|c| !c.trim().is_empty());
        chunks
    }
}

struct Section {
    header: Option<String>,
    body: String,
}

fn count_headers(text: &str) -> usize {
    let lines: Vec<&str> = text.lines().collect();
    let mut count = 0;
    for (i, line) in lines.iter().enumerate() {
        if MARKDOWN_HEADER.is_match(line) {
            count += 1;
        } else if i + 1 < lines.len()
            && !line.trim().is_empty()
            && UNDERLINE.is_match(lines[i + 1])
        {
            count += 1;
        }
    }
    count
}

fn split_sections(text: &str) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    let mut sections = Vec::new();
    let mut header: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();

    let flush = |header: &mut Option<String>, body: &mut Vec<&str>, out: &mut Vec<Section>| {
        if header.is_none() && body.iter().all(|l| l.trim().is_empty()) {
            body.clear();
            return;
        }
        out.push(Section {
            header: header.take(),
            body: body.join("\n").trim().to_owned(),
        });
        body.clear();
    };

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if MARKDOWN_HEADER.is_match(line) {
            flush(&mut header, &mut body, &mut sections);
            header = Some(line.to_owned());
            i += 1;
            continue;
        }
        if i + 1 < lines.len() && !line.trim().is_empty() && UNDERLINE.is_match(lines[i + 1]) {
            flush(&mut header, &mut body, &mut sections);
            header = Some(format!("{line}\n{}", lines[i + 1]));
            i += 2;
            continue;
        }
        body.push(line);
        i += 1;
    }
    flush(&mut header, &mut body, &mut sections);

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Introduction\nSome intro prose.\n\n# Usage\nHow to use it.\n\n## Advanced\nDeep details.";

    #[test]
    fn detects_markdown_and_underline_headers() {
        assert!(SemanticSections.detect(DOC, &DocumentHints::default()) >= 0.4);

        let underlined = "Title\n=====\nbody\n\nOther\n-----\nmore";
        assert!(SemanticSections.detect(underlined, &DocumentHints::default()) >= 0.4);

        assert!(SemanticSections.detect("no headers at all", &DocumentHints::default()) < 0.3);
        assert!(SemanticSections.detect("# Only one\ntext", &DocumentHints::default()) < 0.3);
    }

    #[test]
    fn splits_at_headers_and_carries_header_into_chunk() {
        let chunks = SemanticSections.chunk(DOC, &SemanticSections.defaults());
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("# Introduction"));
        assert!(chunks[1].starts_with("# Usage"));
        assert!(chunks[2].starts_with("## Advanced"));
        assert!(chunks[1].contains("How to use it."));
    }

    #[test]
    fn preamble_before_first_header_is_kept() {
        let text = "free-floating intro\n\n# Section\nbody";
        let chunks = SemanticSections.chunk(text, &SemanticSections.defaults());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("free-floating intro"));
    }

    #[test]
    fn oversized_sections_repeat_their_header() {
        let body = (0..30)
            .map(|i| format!("paragraph {i} with plenty of words inside it."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let text = format!("# Big\n{body}");
        let chunks = SemanticSections.chunk(
            &text,
            &ChunkConfig {
                max_chars: 200,
                overlap: 0,
            },
        );
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.starts_with("# Big")));
    }

    #[test]
    fn underline_headers_travel_with_their_section() {
        let text = "Title\n=====\nfirst body\n\nNext\n-----\nsecond body";
        let chunks = SemanticSections.chunk(text, &SemanticSections.defaults());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("Title\n====="));
        assert!(chunks[1].contains("second body"));
    }
}
