//! Wire digests and the compact relational encoding.
//!
//! Blobs are addressed on the wire by `algorithm:hex` digests. Relational
//! stores index them in a compact form: a two-digit algorithm prefix
//! followed by the hex checksum, so a single binary column can carry any
//! supported algorithm.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

/// Hex checksum of zero-length content under the canonical algorithm.
const EMPTY_SHA256_HEX: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Digest algorithms understood on the wire.
///
/// `sha384` parses but is refused by the compact codec; the relational
/// prefix table never assigned it a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Sha256,
    Sha512,
    Sha384,
    Sha1,
    Md5,
}

impl Algorithm {
    /// The canonical algorithm used for content addressing.
    pub const CANONICAL: Algorithm = Algorithm::Sha256;

    /// Wire name of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Sha384 => "sha384",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }

    /// Parse a wire algorithm name.
    pub fn from_name(name: &str) -> crate::Result<Self> {
        match name {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "sha384" => Ok(Self::Sha384),
            "sha1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            other => Err(crate::Error::UnknownAlgorithm(other.to_string())),
        }
    }

    /// Length of the hex-encoded checksum for this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
            Self::Sha384 => 96,
            Self::Sha1 => 40,
            Self::Md5 => 32,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wire-form content digest (`algorithm:hex`).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Build a digest from an algorithm and a hex checksum, validating the
    /// checksum length and character set.
    pub fn new(algorithm: Algorithm, hex: impl Into<String>) -> crate::Result<Self> {
        let hex = hex.into();
        if hex.len() != algorithm.hex_len() {
            return Err(crate::Error::InvalidDigest(format!(
                "invalid length for {algorithm}: expected {} hex chars, got {}",
                algorithm.hex_len(),
                hex.len()
            )));
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(crate::Error::InvalidDigest(format!(
                "invalid hex in digest: {hex}"
            )));
        }
        Ok(Self { algorithm, hex })
    }

    /// Parse a wire digest string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (name, hex) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::InvalidDigest(format!("missing ':' separator: {s}")))?;
        Self::new(Algorithm::from_name(name)?, hex)
    }

    /// Compute the digest of `data` under `algorithm`.
    pub fn from_bytes(algorithm: Algorithm, data: &[u8]) -> Self {
        let hex = match algorithm {
            Algorithm::Sha256 => hex::encode(Sha256::digest(data)),
            Algorithm::Sha512 => hex::encode(Sha512::digest(data)),
            Algorithm::Sha384 => hex::encode(Sha384::digest(data)),
            Algorithm::Sha1 => hex::encode(Sha1::digest(data)),
            Algorithm::Md5 => hex::encode(Md5::digest(data)),
        };
        Self { algorithm, hex }
    }

    /// Compute the canonical (sha256) digest of `data`.
    pub fn canonical_from_bytes(data: &[u8]) -> Self {
        Self::from_bytes(Algorithm::CANONICAL, data)
    }

    /// The well-known digest of zero-length content.
    pub fn empty_content() -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            hex: EMPTY_SHA256_HEX.to_string(),
        }
    }

    /// The digest algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The hex-encoded checksum, without the algorithm prefix.
    pub fn encoded(&self) -> &str {
        &self.hex
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> String {
        d.to_string()
    }
}

fn prefix_for(algorithm: Algorithm) -> crate::Result<&'static str> {
    match algorithm {
        Algorithm::Sha256 => Ok("01"),
        Algorithm::Sha512 => Ok("02"),
        Algorithm::Sha1 => Ok("03"),
        Algorithm::Md5 => Ok("04"),
        Algorithm::Sha384 => Err(crate::Error::UnimplementedAlgorithm(
            Algorithm::Sha384.as_str().to_string(),
        )),
    }
}

fn algorithm_for_prefix(prefix: &str) -> Option<Algorithm> {
    match prefix {
        "01" => Some(Algorithm::Sha256),
        "02" => Some(Algorithm::Sha512),
        "03" => Some(Algorithm::Sha1),
        "04" => Some(Algorithm::Md5),
        _ => None,
    }
}

/// A digest in compact relational form: `<2-digit-prefix><hex>`.
///
/// The prefix uniquely determines the algorithm, so the encoding
/// round-trips losslessly through [`CompactDigest::parse`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompactDigest(String);

impl CompactDigest {
    /// Encode a wire digest in compact form.
    pub fn from_digest(digest: &Digest) -> crate::Result<Self> {
        let prefix = prefix_for(digest.algorithm())?;
        Ok(Self(format!("{prefix}{}", digest.encoded())))
    }

    /// Wrap a raw stored value (e.g. a database column) without validation.
    /// Validation happens on [`CompactDigest::parse`].
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The compact string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the stored value is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode back to the wire form.
    ///
    /// An empty value passes through as `Ok(None)`: NULL-ish relational
    /// reads have always been forwarded untouched, while a non-empty value
    /// that is merely too short is a hard error. Callers depend on that
    /// asymmetry; do not "fix" it without auditing the index readers.
    pub fn parse(&self) -> crate::Result<Option<Digest>> {
        if self.0.is_empty() {
            return Ok(None);
        }
        if self.0.len() < 2 {
            return Err(crate::Error::InvalidDigest(format!(
                "invalid digest: too short: {}",
                self.0
            )));
        }
        let (prefix, hex) = self.0.split_at(2);
        if hex.is_empty() {
            return Err(crate::Error::InvalidDigest(format!(
                "no checksum in digest: {}",
                self.0
            )));
        }
        let algorithm = algorithm_for_prefix(prefix)
            .ok_or_else(|| crate::Error::UnknownAlgorithmPrefix(prefix.to_string()))?;
        Digest::new(algorithm, hex).map(Some)
    }

    /// Hex literal form for binary columns (`\x01ab...`).
    pub fn hex_literal(&self) -> String {
        format!("\\x{}", self.0)
    }
}

impl fmt::Debug for CompactDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompactDigest({})", self.0)
    }
}

impl fmt::Display for CompactDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decode a compact-form hex string to raw bytes.
pub fn hex_decoded_bytes(value: &str) -> crate::Result<Vec<u8>> {
    hex::decode(value).map_err(|e| crate::Error::InvalidDigest(format!("invalid hex: {e}")))
}

/// Binary index form of a digest: `[algorithm-byte] + raw-hash-bytes`.
///
/// `None` (an absent digest) yields an empty vector with no error, for the
/// same legacy reason the compact codec forwards empty values.
pub fn digest_bytes(digest: Option<&Digest>) -> crate::Result<Vec<u8>> {
    let Some(digest) = digest else {
        return Ok(Vec::new());
    };
    let prefix = prefix_for(digest.algorithm())?;
    let mut bytes = hex_decoded_bytes(prefix)?;
    bytes.extend(hex_decoded_bytes(digest.encoded())?);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(algorithm: Algorithm, data: &[u8]) -> Digest {
        Digest::from_bytes(algorithm, data)
    }

    #[test]
    fn test_wire_parse_roundtrip() {
        let d = wire(Algorithm::Sha256, b"hello");
        let parsed = Digest::parse(&d.to_string()).unwrap();
        assert_eq!(parsed, d);
        assert_eq!(parsed.algorithm(), Algorithm::Sha256);
        assert_eq!(parsed.encoded().len(), 64);
    }

    #[test]
    fn test_wire_parse_rejects_malformed() {
        assert!(Digest::parse("sha256").is_err());
        assert!(Digest::parse(&format!("nope:{}", "a".repeat(64))).is_err());
        assert!(Digest::parse(&format!("sha256:{}", "z".repeat(64))).is_err());
        assert!(Digest::parse("sha256:aa").is_err());
        // Uppercase hex is not canonical.
        assert!(Digest::parse(&format!("sha256:{}", "A".repeat(64))).is_err());
    }

    #[test]
    fn test_compact_roundtrip_all_algorithms() {
        for (algorithm, prefix) in [
            (Algorithm::Sha256, "01"),
            (Algorithm::Sha512, "02"),
            (Algorithm::Sha1, "03"),
            (Algorithm::Md5, "04"),
        ] {
            let d = wire(algorithm, b"hello");
            let compact = CompactDigest::from_digest(&d).unwrap();
            assert!(compact.as_str().starts_with(prefix));
            assert_eq!(compact.as_str().len(), 2 + algorithm.hex_len());
            assert_eq!(compact.parse().unwrap().unwrap(), d);
        }
    }

    #[test]
    fn test_compact_refuses_sha384() {
        let d = wire(Algorithm::Sha384, b"hello");
        match CompactDigest::from_digest(&d) {
            Err(crate::Error::UnimplementedAlgorithm(name)) => assert_eq!(name, "sha384"),
            other => panic!("expected UnimplementedAlgorithm, got {other:?}"),
        }
    }

    #[test]
    fn test_compact_parse_empty_passes_through() {
        let parsed = CompactDigest::from_stored("").parse().unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_compact_parse_invalid_cases() {
        let unknown_prefix = format!("99{}", "a".repeat(64));
        let bad_hex = format!("01{}", "z".repeat(64));
        let cases = [
            ("0", "too short"),
            ("01", "no checksum"),
            (unknown_prefix.as_str(), "unknown algorithm prefix"),
            ("01aa", "invalid length"),
            (bad_hex.as_str(), "invalid hex"),
        ];
        for (input, want) in cases {
            let err = CompactDigest::from_stored(input).parse().unwrap_err();
            let msg = err.to_string().to_lowercase();
            assert!(msg.contains(want), "{input}: {msg} should mention {want}");
        }
    }

    #[test]
    fn test_hex_literal() {
        let compact = CompactDigest::from_stored("01abcd");
        assert_eq!(compact.hex_literal(), "\\x01abcd");
    }

    #[test]
    fn test_hex_decoded_bytes() {
        assert_eq!(hex_decoded_bytes("01ff10").unwrap(), vec![0x01, 0xff, 0x10]);
        assert!(hex_decoded_bytes("zz").is_err());
    }

    #[test]
    fn test_digest_bytes_layout() {
        assert!(digest_bytes(None).unwrap().is_empty());

        let d = wire(Algorithm::Sha256, b"hello");
        let bytes = digest_bytes(Some(&d)).unwrap();
        assert_eq!(bytes.len(), 1 + 32);
        assert_eq!(bytes[0], 0x01);
        assert_eq!(hex::encode(&bytes[1..]), d.encoded());

        let d = wire(Algorithm::Sha512, b"hello");
        let bytes = digest_bytes(Some(&d)).unwrap();
        assert_eq!(bytes.len(), 1 + 64);
        assert_eq!(bytes[0], 0x02);
    }

    #[test]
    fn test_empty_content_digest() {
        assert_eq!(Digest::empty_content(), Digest::canonical_from_bytes(b""));
    }
}
