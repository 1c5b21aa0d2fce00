use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)]
static SENTENCE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.!?][\)\x22']*\s+").expect("static sentence regex compiles")
});

/// A unit the packers work with. Atomic blocks (tables, markers) are never
/// split, even when they exceed the chunk budget.
#[derive(Debug, Clone)]
pub struct Block {
    pub text: String,
    pub atomic: bool,
}

impl Block {
    pub fn narrative(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            atomic: false,
        }
    }

    pub fn atomic(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            atomic: true,
        }
    }
}

/// Split on blank lines; fragments are trimmed and empties dropped.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .flat_map(|p| p.split("\r\n\r\n"))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Pipe- or tab-delimited line, the shape table extractors emit.
pub fn is_table_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    trimmed.matches('|').count() >= 2 || trimmed.matches('\t').count() >= 2
}

/// Parse text into narrative paragraphs and atomic table blocks. Consecutive
/// table lines collapse into one block.
pub fn parse_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut narrative: Vec<&str> = Vec::new();
    let mut table: Vec<&str> = Vec::new();

    let flush_narrative = |lines: &mut Vec<&str>, blocks: &mut Vec<Block>| {
        if lines.is_empty() {
            return;
        }
        let joined = lines.join("\n");
        for paragraph in split_paragraphs(&joined) {
            blocks.push(Block::narrative(paragraph));
        }
        lines.clear();
    };
    let flush_table = |lines: &mut Vec<&str>, blocks: &mut Vec<Block>| {
        if lines.is_empty() {
            return;
        }
        blocks.push(Block::atomic(lines.join("\n")));
        lines.clear();
    };

    for line in text.lines() {
        if is_table_line(line) {
            flush_narrative(&mut narrative, &mut blocks);
            table.push(line);
        } else {
            flush_table(&mut table, &mut blocks);
            narrative.push(line);
        }
    }
    flush_narrative(&mut narrative, &mut blocks);
    flush_table(&mut table, &mut blocks);

    blocks
}

/// Greedy-pack blocks into chunks of at most `max_chars`, carrying
/// `overlap` trailing characters of each emitted chunk into the next one.
/// Oversized narrative blocks are split down; atomic blocks are emitted
/// whole.
pub fn pack_blocks(blocks: &[Block], max_chars: usize, overlap: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    let emit = |current: &mut String, chunks: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_owned());
        }
        current.clear();
    };

    for block in blocks {
        let pieces: Vec<String> = if block.atomic || block.text.chars().count() <= max_chars {
            vec![block.text.clone()]
        } else {
            split_oversized(&block.text, max_chars)
        };

        for piece in pieces {
            let piece_len = piece.chars().count();
            let current_len = current.chars().count();
            let fits = current.is_empty() || current_len + 2 + piece_len <= max_chars;

            if !fits {
                let carry = tail_overlap(&current, overlap).to_owned();
                emit(&mut current, &mut chunks);
                if !carry.is_empty() {
                    current.push_str(&carry);
                }
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);

            // Atomic pieces that blew the budget stand alone.
            if block.atomic && current.chars().count() > max_chars {
                emit(&mut current, &mut chunks);
            }
        }
    }
    emit(&mut current, &mut chunks);

    chunks
}

/// Paragraph-pack plain text, the default strategy's rule.
pub fn pack_paragraphs(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let blocks: Vec<Block> = split_paragraphs(text)
        .into_iter()
        .map(Block::narrative)
        .collect();
    pack_blocks(&blocks, max_chars, overlap)
}

/// Break an oversized fragment at sentence boundaries; sentences that are
/// still too long get cut at the character limit (UTF-8 safe).
pub fn split_oversized(text: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        if sentence.chars().count() > max_chars {
            if !current.trim().is_empty() {
                out.push(current.trim().to_owned());
                current.clear();
            }
            out.extend(split_at_char_limit(sentence, max_chars));
            continue;
        }
        if !current.is_empty() && current.chars().count() + sentence.chars().count() > max_chars {
            out.push(current.trim().to_owned());
            current.clear();
        }
        current.push_str(sentence);
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_owned());
    }

    out
}

/// Sentence fragments including their terminators and trailing whitespace,
/// so concatenation reproduces the input.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut start = 0;
    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        fragments.push(&text[start..boundary.end()]);
        start = boundary.end();
    }
    if start < text.len() {
        fragments.push(&text[start..]);
    }
    fragments
}

/// Hard split every `max_chars` characters, respecting UTF-8 boundaries.
pub fn split_at_char_limit(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut out = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for c in text.chars() {
        current.push(c);
        count += 1;
        if count == max_chars {
            out.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

/// The trailing `overlap` characters of a chunk, snapped to a char boundary.
pub fn tail_overlap(text: &str, overlap: usize) -> &str {
    if overlap == 0 {
        return "";
    }
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    if chars.len() <= overlap {
        return text;
    }
    let start = chars[chars.len() - overlap].0;
    &text[start..]
}
