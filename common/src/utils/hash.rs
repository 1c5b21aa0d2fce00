use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// SHA-256 over NFC-normalized, trimmed text, hex encoded.
///
/// Both document and chunk hashes go through this so that byte-level
/// differences in Unicode composition or trailing whitespace do not defeat
/// idempotent upserts.
pub fn content_hash(text: &str) -> String {
    let normalized: String = text.trim().nfc().collect();
    let digest = Sha256::digest(normalized.as_bytes());
    hex_encode(&digest)
}

pub fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing to a String cannot fail.
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}
