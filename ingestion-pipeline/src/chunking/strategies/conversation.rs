use std::sync::LazyLock;

use regex::Regex;

use crate::chunking::{ChunkConfig, ChunkStrategy, DocumentHints};

#[allow(clippy::expect_used)]
static SPEAKER_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Z][A-Za-z .'\-]{0,30}|Q|A)\s*:\s?").expect("static speaker regex compiles")
});

/// Transcripts and Q&A logs: one speaker turn per chunk, short adjacent
/// turns merged.
pub struct ConversationTurns;

impl ChunkStrategy for ConversationTurns {
    fn name(&self) -> &'static str {
        "conversation_turns"
    }

    fn defaults(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: 600,
            overlap: 0,
        }
    }

    fn detect(&self, text: &str, _hints: &DocumentHints) -> f32 {
        let tagged = text
            .lines()
            .filter(|line| SPEAKER_TAG.is_match(line))
            .count();
        if tagged < 5 {
            return 0.0;
        }
        (0.4 + 0.02 * (tagged as f32 - 5.0)).min(0.85)
    }

    fn chunk(&self, text: &str, config: &ChunkConfig) -> Vec<String> {
        let turns = split_turns(text);
        let mut chunks: Vec<String> = Vec::new();

        for turn in turns {
            let turn_len = turn.chars().count();
            let fits = chunks
                .last()
                .is_some_and(|last| last.chars().count() + 1 + turn_len <= config.max_chars);
            if fits {
                if let Some(last) = chunks.last_mut() {
                    last.push('\n');
                    last.push_str(&turn);
                }
            } else {
                chunks.push(turn);
            }
        }

        chunks
    }
}

/// Group lines into turns; a turn starts at each speaker-tagged line. Lines
/// before the first tag form their own preamble turn.
fn split_turns(text: &str) -> Vec<String> {
    let mut turns: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if SPEAKER_TAG.is_match(line) {
            if !current.is_empty() {
                turns.push(std::mem::take(&mut current));
            }
            current.push(line);
        } else if !line.trim().is_empty() || !current.is_empty() {
            current.push(line);
        }
    }
    if !current.is_empty() {
        turns.push(current);
    }

    turns
        .into_iter()
        .map(|lines| lines.join("\n").trim().to_owned())
        .filter(|t| !t.is_empty())
        .collect()
}
