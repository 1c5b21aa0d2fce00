use std::sync::LazyLock;

use regex::Regex;

use crate::chunking::{helpers::split_paragraphs, ChunkConfig, ChunkStrategy, DocumentHints};

#[allow(clippy::expect_used)]
static REVIEW_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:Review by .+|\[REVIEW\].*)$").expect("static review regex compiles")
});

/// Customer review dumps: one review per chunk, prefixed `[REVIEW]`.
pub struct Reviews;

impl ChunkStrategy for Reviews {
    fn name(&self) -> &'static str {
        "reviews"
    }

    fn defaults(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: 600,
            overlap: 0,
        }
    }

    fn detect(&self, text: &str, hints: &DocumentHints) -> f32 {
        if hints.filename.to_lowercase().starts_with("reviews_") {
            return 0.9;
        }
        if hints.source == Some("google_reviews") {
            return 0.9;
        }
        if REVIEW_MARKER.find_iter(text).count() >= 2 {
            return 0.7;
        }
        0.0
    }

    fn chunk(&self, text: &str, _config: &ChunkConfig) -> Vec<String> {
        let marker_starts: Vec<usize> = REVIEW_MARKER.find_iter(text).map(|m| m.start()).collect();

        let raw_reviews: Vec<String> = if marker_starts.is_empty() {
            // No explicit markers: treat blank-line separated blocks as
            // individual reviews.
            split_paragraphs(text)
                .into_iter()
                .map(ToOwned::to_owned)
                .collect()
        } else {
            let mut segments = Vec::with_capacity(marker_starts.len() + 1);
            if marker_starts[0] > 0 {
                segments.push(text[..marker_starts[0]].to_owned());
            }
            for (i, &start) in marker_starts.iter().enumerate() {
                let end = marker_starts.get(i + 1).copied().unwrap_or(text.len());
                segments.push(text[start..end].to_owned());
            }
            segments
        };

        raw_reviews
            .into_iter()
            .map(|review| review.trim().to_owned())
            .filter(|review| !review.is_empty())
            .map(|review| {
                if review.starts_with("[REVIEW]") {
                    review
                } else {
                    format!("[REVIEW] {review}")
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REVIEWS: &str = "Review by Jan:\nRating: 5/5\nGreat!\n\nReview by Marie:\nRating: 3/5\nOk.\n\nReview by Piet:\nRating: 4/5\nGood.";

    #[test]
    fn filename_hint_dominates_detection() {
        let hints = DocumentHints {
            filename: "reviews_r1.txt",
            ..DocumentHints::default()
        };
        assert!((Reviews.detect("anything", &hints) - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn metadata_source_triggers_detection() {
        let hints = DocumentHints {
            source: Some("google_reviews"),
            ..DocumentHints::default()
        };
        assert!((Reviews.detect("anything", &hints) - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn per_review_markers_trigger_detection() {
        assert!(Reviews.detect(REVIEWS, &DocumentHints::default()) >= 0.7);
        assert!(Reviews.detect("no reviews here", &DocumentHints::default()) < 0.3);
    }

    #[test]
    fn one_chunk_per_review_with_prefix() {
        let chunks = Reviews.chunk(REVIEWS, &Reviews.defaults());
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.starts_with("[REVIEW]")));
        assert!(chunks[0].contains("Jan"));
        assert!(chunks[1].contains("Marie"));
        assert!(chunks[2].contains("Piet"));
    }

    #[test]
    fn unmarked_blocks_fall_back_to_paragraph_reviews() {
        let text = "Lovely place, will return.\n\nFood was cold, two stars.";
        let chunks = Reviews.chunk(text, &Reviews.defaults());
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.starts_with("[REVIEW] ")));
    }
}
