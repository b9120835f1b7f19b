//! Channel fingerprint derivation.
//!
//! A channel is identified by `hex(SHA-256(channel_id || password))`. Knowing
//! the pair is both the lookup key and the credential, so the fingerprint is
//! the only thing the registry ever stores.
//!
//! No delimiter is placed between the two inputs. This keeps fingerprints
//! bit-compatible with existing clients, at the cost that `("ab", "c")` and
//! `("a", "bc")` name the same channel.

use ring::digest::{Context, SHA256};
use serde::Serialize;
use std::fmt;

/// Length of a rendered fingerprint (SHA-256 as lowercase hex).
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Stable, hash-derived channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ChannelFingerprint(String);

impl ChannelFingerprint {
    /// Derive the fingerprint for a `(channel_id, password)` pair.
    #[must_use]
    pub fn derive(channel_id: &str, password: &str) -> Self {
        let mut context = Context::new(&SHA256);
        context.update(channel_id.as_bytes());
        context.update(password.as_bytes());
        Self(hex::encode(context.finish().as_ref()))
    }

    /// The full 64-character hex rendering.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for ChannelFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        let fp = ChannelFingerprint::derive("lab1", "secret");
        assert_eq!(
            fp.as_str(),
            "aee744de2163afffc9770a65b111c5b7e896e680b7246ad34c6c9f51d18e98eb"
        );
    }

    #[test]
    fn test_empty_inputs_hash_to_valid_fingerprint() {
        let fp = ChannelFingerprint::derive("", "");
        assert_eq!(
            fp.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_deterministic() {
        let a = ChannelFingerprint::derive("lab1", "secret");
        let b = ChannelFingerprint::derive("lab1", "secret");
        assert_eq!(a, b);
    }

    #[test]
    fn test_rendering_is_lowercase_hex() {
        let fp = ChannelFingerprint::derive("Channel-Å", "pässword");
        assert_eq!(fp.as_str().len(), FINGERPRINT_HEX_LEN);
        assert!(fp
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_distinct_pairs_do_not_collide() {
        let pairs = [
            ("lab1", "secret"),
            ("lab1", "secret2"),
            ("lab2", "secret"),
            ("house", "hunter2"),
            ("", "x"),
            ("x", ""),
        ];
        let fingerprints: std::collections::HashSet<_> = pairs
            .iter()
            .map(|(c, p)| ChannelFingerprint::derive(c, p))
            .collect();
        // ("", "x") and ("x", "") concatenate to the same bytes
        assert_eq!(fingerprints.len(), pairs.len() - 1);
    }

    #[test]
    fn test_concatenation_without_delimiter_collides() {
        assert_eq!(
            ChannelFingerprint::derive("ab", "c"),
            ChannelFingerprint::derive("a", "bc")
        );
    }

    #[test]
    fn test_short_prefix() {
        let fp = ChannelFingerprint::derive("lab1", "secret");
        assert_eq!(fp.short(), "aee744de");
        assert_eq!(fp.to_string(), fp.as_str());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let fp = ChannelFingerprint::derive("lab1", "secret");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.as_str()));
    }
}
