use std::sync::LazyLock;

use regex::Regex;

use crate::chunking::{helpers::split_oversized, ChunkConfig, ChunkStrategy, DocumentHints};

#[allow(clippy::expect_used)]
static ARTICLE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:Artikel|Article|Art\.?|§)\s*\d+").expect("static article regex compiles")
});
#[allow(clippy::expect_used)]
static SUB_ARTICLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\d+\.\s").expect("static sub-article regex compiles"));

/// Statutes and contracts: one article per chunk, never overlapped so a
/// citation always maps to exactly one article.
pub struct Legal;

impl ChunkStrategy for Legal {
    fn name(&self) -> &'static str {
        "legal"
    }

    fn defaults(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: 2000,
            overlap: 0,
        }
    }

    fn detect(&self, text: &str, _hints: &DocumentHints) -> f32 {
        match ARTICLE_MARKER.find_iter(text).count() {
            0 => 0.0,
            1 => 0.45,
            _ => 0.8,
        }
    }

    fn chunk(&self, text: &str, config: &ChunkConfig) -> Vec<String> {
        let mut chunks = Vec::new();

        for article in split_at_markers(text, &ARTICLE_MARKER) {
            let article = article.trim();
            if article.is_empty() {
                continue;
            }
            if article.chars().count() <= config.max_chars {
                chunks.push(article.to_owned());
                continue;
            }

            // Oversized article: prefer sub-article boundaries, then
            // sentences. No overlap in either case.
            let sub_articles = split_at_markers(article, &SUB_ARTICLE);
            for part in sub_articles {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                if part.chars().count() <= config.max_chars {
                    chunks.push(part.to_owned());
                } else {
                    chunks.extend(split_oversized(part, config.max_chars));
                }
            }
        }

        chunks
    }
}

fn split_at_markers<'a>(text: &'a str, marker: &Regex) -> Vec<&'a str> {
    let starts: Vec<usize> = marker.find_iter(text).map(|m| m.start()).collect();
    if starts.is_empty() {
        return vec![text];
    }

    let mut segments = Vec::with_capacity(starts.len() + 1);
    if starts[0] > 0 {
        segments.push(&text[..starts[0]]);
    }
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        segments.push(&text[start..end]);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUTE: &str = "Artikel 1\nDeze wet regelt de verwerking.\n\nArtikel 2\nDe verwerking is rechtmatig indien toegestaan.\n\nArtikel 3\nToezicht berust bij de autoriteit.";

    #[test]
    fn article_markers_trigger_detection() {
        assert!(Legal.detect(STATUTE, &DocumentHints::default()) >= 0.8);
        assert!(Legal.detect("§ 12 Anwendungsbereich\n§ 13 Begriffe", &DocumentHints::default()) >= 0.8);
        assert!(Legal.detect("ordinary prose", &DocumentHints::default()) < 0.3);
    }

    #[test]
    fn one_article_per_chunk() {
        let chunks = Legal.chunk(STATUTE, &Legal.defaults());
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("Artikel 1"));
        assert!(chunks[1].starts_with("Artikel 2"));
        assert!(chunks[2].starts_with("Artikel 3"));
    }

    #[test]
    fn preamble_before_first_article_is_kept() {
        let text = format!("Considerans: gelet op het verdrag.\n\n{STATUTE}");
        let chunks = Legal.chunk(&text, &Legal.defaults());
        assert_eq!(chunks.len(), 4);
        assert!(chunks[0].contains("Considerans"));
    }

    #[test]
    fn oversized_articles_split_at_sub_articles_without_overlap() {
        let body: String = (1..=6)
            .map(|i| format!("{i}. Lid {i}: {}\n", "bepaling ".repeat(20)))
            .collect();
        let text = format!("Artikel 1\n{body}");
        let chunks = Legal.chunk(
            &text,
            &ChunkConfig {
                max_chars: 250,
                overlap: 0,
            },
        );
        assert!(chunks.len() > 1);
        let joined = chunks.concat();
        for i in 1..=6 {
            assert!(joined.contains(&format!("Lid {i}")));
        }
    }
}
