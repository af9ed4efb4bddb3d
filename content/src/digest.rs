//! Content digests.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// The only digest algorithm accepted by the store.
pub const SHA256: &str = "sha256";

const SHA256_HEX_LEN: usize = 64;

/// A digest string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid digest: {0:?}")]
pub struct InvalidDigest(String);

/// A content digest in the `algorithm:encoded` form, e.g. `sha256:e3b0...`.
///
/// Only `sha256` digests with 64 lowercase hex characters are accepted, since
/// that is what the local store lays out on disk.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Compute the sha256 digest of `data`.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::from_sha256(Sha256::digest(data).as_slice())
    }

    /// Build a digest from a raw sha256 hash value.
    pub fn from_sha256(hash: &[u8]) -> Self {
        Digest(format!("{SHA256}:{}", hex::encode(hash)))
    }

    /// The algorithm portion, e.g. `sha256`.
    pub fn algorithm(&self) -> &str {
        self.split().0
    }

    /// The encoded hash portion.
    pub fn encoded(&self) -> &str {
        self.split().1
    }

    /// The full `algorithm:encoded` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(&self) -> (&str, &str) {
        // validated on construction
        self.0.split_once(':').unwrap_or((SHA256, &self.0))
    }
}

impl FromStr for Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((algorithm, encoded)) = s.split_once(':') else {
            return Err(InvalidDigest(s.to_owned()));
        };

        if algorithm != SHA256
            || encoded.len() != SHA256_HEX_LEN
            || !encoded
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(InvalidDigest(s.to_owned()));
        }

        Ok(Digest(s.to_owned()))
    }
}

impl TryFrom<String> for Digest {
    type Error = InvalidDigest;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Digest").field(&self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn digest_of_empty_input() {
        let digest = Digest::from_bytes(b"");
        assert_eq!(digest.as_str(), EMPTY);
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.encoded().len(), 64);
    }

    #[test]
    fn parse_valid_digest() {
        let digest: Digest = EMPTY.parse().unwrap();
        assert_eq!(digest, Digest::from_bytes(b""));
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("e3b0c442".parse::<Digest>().is_err());
        assert!("sha256:".parse::<Digest>().is_err());
        assert!("sha512:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            .parse::<Digest>()
            .is_err());
        assert!("sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
            .parse::<Digest>()
            .is_err());
        assert!("sha256:../../etc/passwd".parse::<Digest>().is_err());
    }

    #[test]
    fn serde_uses_plain_string() {
        let digest = Digest::from_bytes(b"hello");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{digest}\""));

        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);

        assert!(serde_json::from_str::<Digest>("\"sha256:nope\"").is_err());
    }
}
