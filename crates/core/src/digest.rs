//! Digest algorithms and incremental multi-algorithm hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A checksum algorithm an artifact stream can be digested with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

/// Algorithm -> lowercase hex digest, accumulated while a stream is copied.
pub type DigestMap = BTreeMap<DigestAlgorithm, String>;

impl DigestAlgorithm {
    /// Every supported algorithm.
    pub const ALL: [DigestAlgorithm; 4] = [Self::Md5, Self::Sha1, Self::Sha256, Self::Sha512];

    /// Canonical algorithm name ("MD5", "SHA-1", ...).
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }

    /// File extension of a detached checksum file for this algorithm.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex-encoded digest.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Look up an algorithm by checksum file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.extension().eq_ignore_ascii_case(ext))
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = crate::Error;

    /// Accepts either the canonical name ("SHA-1") or the extension ("sha1").
    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(s))
            .or_else(|| Self::from_extension(s))
            .ok_or_else(|| crate::Error::UnsupportedAlgorithm(s.to_string()))
    }
}

enum HasherState {
    Md5(md5::Context),
    Sha1(sha1::Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl HasherState {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Self::Md5(md5::Context::new()),
            DigestAlgorithm::Sha1 => Self::Sha1(sha1::Sha1::new()),
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha1(hasher) => hasher.update(data),
            Self::Sha256(hasher) => hasher.update(data),
            Self::Sha512(hasher) => hasher.update(data),
        }
    }

    fn finalize(self) -> String {
        match self {
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha1(hasher) => hex::encode(hasher.finalize()),
            Self::Sha256(hasher) => hex::encode(hasher.finalize()),
            Self::Sha512(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

/// Incremental hasher feeding the same bytes into several algorithms.
pub struct MultiDigester {
    states: Vec<(DigestAlgorithm, HasherState)>,
}

impl MultiDigester {
    /// Create a digester for the given algorithms. Duplicates are ignored.
    pub fn new(algorithms: &[DigestAlgorithm]) -> Self {
        let mut states: Vec<(DigestAlgorithm, HasherState)> = Vec::with_capacity(algorithms.len());
        for &algorithm in algorithms {
            if states.iter().all(|(existing, _)| *existing != algorithm) {
                states.push((algorithm, HasherState::new(algorithm)));
            }
        }
        Self { states }
    }

    /// Algorithms this digester computes.
    pub fn algorithms(&self) -> Vec<DigestAlgorithm> {
        self.states.iter().map(|(alg, _)| *alg).collect()
    }

    /// Whether no algorithm is configured.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Update every hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        for (_, state) in &mut self.states {
            state.update(data);
        }
    }

    /// Finalize and return the hex digests.
    pub fn finalize(self) -> DigestMap {
        self.states
            .into_iter()
            .map(|(alg, state)| (alg, state.finalize()))
            .collect()
    }
}

/// Digest a complete buffer with each algorithm.
pub fn compute(algorithms: &[DigestAlgorithm], data: &[u8]) -> DigestMap {
    let mut digester = MultiDigester::new(algorithms);
    digester.update(data);
    digester.finalize()
}

/// Extract the digest from the text of an uploaded checksum file.
///
/// Checksum files hold the hex digest, optionally followed by whitespace and
/// a file name (`sha1sum` style). Returns `None` for blank content.
pub fn parse_checksum_text(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    text.split_whitespace()
        .next()
        .map(|token| token.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let digests = compute(&DigestAlgorithm::ALL, b"hello world");
        assert_eq!(
            digests[&DigestAlgorithm::Md5],
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            digests[&DigestAlgorithm::Sha1],
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
        assert_eq!(
            digests[&DigestAlgorithm::Sha256],
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        for (alg, hex) in &digests {
            assert_eq!(hex.len(), alg.hex_len(), "{alg} digest length");
        }
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let algorithms = [DigestAlgorithm::Md5, DigestAlgorithm::Sha1];
        let mut digester = MultiDigester::new(&algorithms);
        digester.update(b"hello ");
        digester.update(b"world");
        assert_eq!(digester.finalize(), compute(&algorithms, b"hello world"));
    }

    #[test]
    fn test_duplicate_algorithms_ignored() {
        let digester = MultiDigester::new(&[DigestAlgorithm::Md5, DigestAlgorithm::Md5]);
        assert_eq!(digester.algorithms(), vec![DigestAlgorithm::Md5]);
    }

    #[test]
    fn test_algorithm_lookup() {
        assert_eq!(
            DigestAlgorithm::from_extension("SHA1"),
            Some(DigestAlgorithm::Sha1)
        );
        assert_eq!(DigestAlgorithm::from_extension("asc"), None);
        assert_eq!(
            "SHA-512".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha512
        );
        assert_eq!("md5".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Md5);
        assert!("crc32".parse::<DigestAlgorithm>().is_err());
    }

    #[test]
    fn test_parse_checksum_text() {
        assert_eq!(parse_checksum_text(b"ABCDEF\n").as_deref(), Some("abcdef"));
        assert_eq!(
            parse_checksum_text(b"abcdef  foo-1.0.jar\n").as_deref(),
            Some("abcdef")
        );
        assert_eq!(parse_checksum_text(b"  \n"), None);
    }
}
