use std::sync::LazyLock;

use regex::Regex;

use crate::chunking::{ChunkConfig, ChunkStrategy, DocumentHints};

#[allow(clippy::expect_used)]
static PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[€$£¥]\s?\d+(?:[.,]\d{2})?|\d+[.,]\d{2}\s?[€$£¥])")
        .expect("static price regex compiles")
});

/// Menu cards: one item per chunk, prefixed `[MENU ITEM]`, with the section
/// banner (category) carried along.
pub struct Menus;

impl ChunkStrategy for Menus {
    fn name(&self) -> &'static str {
        "menus"
    }

    fn defaults(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: 400,
            overlap: 0,
        }
    }

    fn detect(&self, text: &str, hints: &DocumentHints) -> f32 {
        if hints.filename.to_lowercase().starts_with("menu_") {
            return 0.9;
        }

        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            return 0.0;
        }
        let priced = lines.iter().filter(|l| PRICE.is_match(l)).count();
        let avg_len = lines.iter().map(|l| l.chars().count()).sum::<usize>() / lines.len();
        if priced >= 3 && avg_len < 60 {
            return (0.5 + 0.05 * (priced as f32 - 3.0)).min(0.8);
        }
        0.0
    }

    fn chunk(&self, text: &str, _config: &ChunkConfig) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut category: Option<String> = None;
        let mut item: Vec<String> = Vec::new();

        let flush = |category: &Option<String>, item: &mut Vec<String>, out: &mut Vec<String>| {
            if item.is_empty() {
                return;
            }
            let body = item.join("\n");
            let chunk = match category {
                Some(cat) => format!("[MENU ITEM] {body}\ncategory: {cat}"),
                None => format!("[MENU ITEM] {body}"),
            };
            out.push(chunk);
            item.clear();
        };

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                flush(&category, &mut item, &mut chunks);
                continue;
            }
            if is_category_banner(trimmed) {
                flush(&category, &mut item, &mut chunks);
                // The banner line itself starts the next item's context and
                // is kept verbatim so no input text is lost.
                category = Some(trimmed.to_owned());
                chunks.push(format!("[MENU ITEM] {trimmed}"));
                continue;
            }
            if PRICE.is_match(trimmed) && !item.is_empty() {
                // A new priced line begins a new item.
                flush(&category, &mut item, &mut chunks);
            }
            item.push(trimmed.to_owned());
        }
        flush(&category, &mut item, &mut chunks);

        chunks
    }
}

/// Short all-caps line without a price, e.g. `DRANKEN` or `MAIN COURSES`.
fn is_category_banner(line: &str) -> bool {
    line.chars().count() <= 40
        && !PRICE.is_match(line)
        && line.chars().any(|c| c.is_alphabetic())
        && line
            .chars()
            .filter(|c| c.is_alphabetic())
            .all(|c| c.is_uppercase())
}
