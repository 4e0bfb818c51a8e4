//! Content fingerprints with blake3.

use crate::parser::PARSER_VERSION;

/// Strong hash of file bytes plus the parser-version tag. Two files with the
/// same bytes share a fingerprint only while the parser version is unchanged,
/// so a parser upgrade invalidates every entry at once.
pub fn content_fingerprint(bytes: &[u8]) -> String {
    fingerprint_with_version(bytes, PARSER_VERSION)
}

pub fn fingerprint_with_version(bytes: &[u8], parser_version: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(bytes);
    hasher.update(parser_version.as_bytes());
    hasher.finalize().to_hex().to_string()
}
