//! Incremental hashing with serializable state.
//!
//! Resumable uploads checkpoint their digester between chunks so a fresh
//! process can pick up hashing at the persisted offset instead of
//! re-reading everything already written. The RustCrypto hashers do not
//! expose their internal state, so [`ResumableSha256`] drives the block
//! function (`sha2::compress256`) directly and keeps the schedule words,
//! total length and unprocessed tail where they can be exported.

use crate::digest::{Algorithm, Digest};
use md5::Md5;
use sha1::Sha1;
use sha2::digest::generic_array::GenericArray;
use sha2::{Digest as _, Sha256, Sha384, Sha512};

const BLOCK_LEN: usize = 64;

/// Version tag leading every serialized hash state.
const STATE_VERSION: u8 = 1;

/// Algorithm byte for sha256 state payloads (matches the compact prefix).
const STATE_ALGORITHM_SHA256: u8 = 0x01;

/// SHA-256 initialization vector (FIPS 180-4).
const SHA256_IV: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

fn compress(state: &mut [u32; 8], block: &[u8; BLOCK_LEN]) {
    let block = GenericArray::clone_from_slice(block);
    sha2::compress256(state, core::slice::from_ref(&block));
}

/// An incremental SHA-256 digester whose state can be serialized and
/// restored across processes.
#[derive(Clone)]
pub struct ResumableSha256 {
    state: [u32; 8],
    len: u64,
    tail: [u8; BLOCK_LEN],
}

impl ResumableSha256 {
    /// Create a fresh digester.
    pub fn new() -> Self {
        Self {
            state: SHA256_IV,
            len: 0,
            tail: [0u8; BLOCK_LEN],
        }
    }

    /// Total bytes hashed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.len
    }

    fn buffered(&self) -> usize {
        (self.len % BLOCK_LEN as u64) as usize
    }

    /// Feed more data into the digester.
    pub fn update(&mut self, mut data: &[u8]) {
        let mut buffered = self.buffered();
        self.len += data.len() as u64;

        if buffered > 0 {
            let take = (BLOCK_LEN - buffered).min(data.len());
            self.tail[buffered..buffered + take].copy_from_slice(&data[..take]);
            buffered += take;
            data = &data[take..];
            if buffered < BLOCK_LEN {
                return;
            }
            let block = self.tail;
            compress(&mut self.state, &block);
        }

        let mut blocks = data.chunks_exact(BLOCK_LEN);
        for block in blocks.by_ref() {
            let block: &[u8; BLOCK_LEN] = block.try_into().expect("exact chunk");
            compress(&mut self.state, block);
        }

        let rest = blocks.remainder();
        self.tail[..rest.len()].copy_from_slice(rest);
    }

    /// Produce the digest of everything hashed so far.
    ///
    /// Non-consuming: padding runs on a copy of the state, so the digester
    /// can keep accepting data afterwards.
    pub fn finalize_digest(&self) -> Digest {
        let mut state = self.state;
        let buffered = self.buffered();

        let mut block = [0u8; BLOCK_LEN];
        block[..buffered].copy_from_slice(&self.tail[..buffered]);
        block[buffered] = 0x80;

        let bit_len = self.len.wrapping_mul(8).to_be_bytes();
        if buffered < 56 {
            block[56..].copy_from_slice(&bit_len);
            compress(&mut state, &block);
        } else {
            compress(&mut state, &block);
            let mut last = [0u8; BLOCK_LEN];
            last[56..].copy_from_slice(&bit_len);
            compress(&mut state, &last);
        }

        let mut out = [0u8; 32];
        for (chunk, word) in out.chunks_exact_mut(4).zip(state.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        Digest::new(Algorithm::Sha256, hex::encode(out)).expect("sha256 output is a valid digest")
    }

    /// Export the digester state for checkpointing.
    pub fn serialize_state(&self) -> Vec<u8> {
        let buffered = self.buffered();
        let mut out = Vec::with_capacity(2 + 32 + 8 + buffered);
        out.push(STATE_VERSION);
        out.push(STATE_ALGORITHM_SHA256);
        for word in &self.state {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out.extend_from_slice(&self.len.to_be_bytes());
        out.extend_from_slice(&self.tail[..buffered]);
        out
    }

    /// Restore a digester from a checkpoint produced by
    /// [`ResumableSha256::serialize_state`].
    pub fn deserialize_state(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < 2 + 32 + 8 {
            return Err(crate::Error::InvalidHashState(format!(
                "truncated state: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != STATE_VERSION {
            return Err(crate::Error::InvalidHashState(format!(
                "unsupported state version: {}",
                bytes[0]
            )));
        }
        if bytes[1] != STATE_ALGORITHM_SHA256 {
            return Err(crate::Error::InvalidHashState(format!(
                "unsupported state algorithm: {:#04x}",
                bytes[1]
            )));
        }

        let mut state = [0u32; 8];
        for (word, chunk) in state.iter_mut().zip(bytes[2..34].chunks_exact(4)) {
            *word = u32::from_be_bytes(chunk.try_into().expect("exact chunk"));
        }
        let len = u64::from_be_bytes(bytes[34..42].try_into().expect("exact slice"));

        let buffered = (len % BLOCK_LEN as u64) as usize;
        let rest = &bytes[42..];
        if rest.len() != buffered {
            return Err(crate::Error::InvalidHashState(format!(
                "tail length {} does not match hashed length {len}",
                rest.len()
            )));
        }
        let mut tail = [0u8; BLOCK_LEN];
        tail[..buffered].copy_from_slice(rest);

        Ok(Self { state, len, tail })
    }
}

impl Default for ResumableSha256 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResumableSha256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableSha256")
            .field("bytes_hashed", &self.len)
            .finish()
    }
}

/// An incremental digester for any wire algorithm.
///
/// Only the canonical algorithm has serializable state; the others exist
/// for verification of client-chosen digests.
pub enum AnyDigester {
    Sha256(ResumableSha256),
    Sha512(Sha512),
    Sha384(Sha384),
    Sha1(Sha1),
    Md5(Md5),
}

impl AnyDigester {
    /// Create a digester for the given algorithm.
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha256 => Self::Sha256(ResumableSha256::new()),
            Algorithm::Sha512 => Self::Sha512(Sha512::new()),
            Algorithm::Sha384 => Self::Sha384(Sha384::new()),
            Algorithm::Sha1 => Self::Sha1(Sha1::new()),
            Algorithm::Md5 => Self::Md5(Md5::new()),
        }
    }

    /// Feed more data into the digester.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Md5(h) => h.update(data),
        }
    }

    /// Finalize into a wire digest.
    pub fn finalize(self) -> Digest {
        match self {
            Self::Sha256(h) => Ok(h.finalize_digest()),
            Self::Sha512(h) => Digest::new(Algorithm::Sha512, hex::encode(h.finalize())),
            Self::Sha384(h) => Digest::new(Algorithm::Sha384, hex::encode(h.finalize())),
            Self::Sha1(h) => Digest::new(Algorithm::Sha1, hex::encode(h.finalize())),
            Self::Md5(h) => Digest::new(Algorithm::Md5, hex::encode(h.finalize())),
        }
        .expect("hasher output is a valid digest")
    }
}

/// Checksums of a streamed file under every indexable algorithm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHashes {
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
    pub md5: String,
    pub size: u64,
}

/// Hashes a stream under sha1, sha256, sha512 and md5 simultaneously,
/// for indexing generic artifacts that are looked up by any of them.
pub struct MultiHasher {
    sha1: Sha1,
    sha256: Sha256,
    sha512: Sha512,
    md5: Md5,
    size: u64,
}

impl MultiHasher {
    /// Create a fresh multi-hasher.
    pub fn new() -> Self {
        Self {
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            sha512: Sha512::new(),
            md5: Md5::new(),
            size: 0,
        }
    }

    /// Feed more data into all four digesters.
    pub fn update(&mut self, data: &[u8]) {
        self.sha1.update(data);
        self.sha256.update(data);
        self.sha512.update(data);
        self.md5.update(data);
        self.size += data.len() as u64;
    }

    /// Finalize into a [`FileHashes`] record.
    pub fn finalize(self) -> FileHashes {
        FileHashes {
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            sha512: hex::encode(self.sha512.finalize()),
            md5: hex::encode(self.md5.finalize()),
            size: self.size,
        }
    }
}

impl Default for MultiHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_sha256(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    #[test]
    fn test_resumable_matches_reference() {
        for len in [0usize, 1, 55, 56, 63, 64, 65, 1000, 4096, 70_000] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut hasher = ResumableSha256::new();
            hasher.update(&data);
            assert_eq!(
                hasher.finalize_digest().encoded(),
                reference_sha256(&data),
                "length {len}"
            );
        }
    }

    #[test]
    fn test_resumable_split_updates() {
        let data: Vec<u8> = (0..10_000).map(|i| (i % 13) as u8).collect();
        let mut hasher = ResumableSha256::new();
        for chunk in data.chunks(7) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.bytes_hashed(), data.len() as u64);
        assert_eq!(hasher.finalize_digest().encoded(), reference_sha256(&data));
    }

    #[test]
    fn test_finalize_is_non_consuming() {
        let mut hasher = ResumableSha256::new();
        hasher.update(b"hello ");
        let _ = hasher.finalize_digest();
        hasher.update(b"world");
        assert_eq!(
            hasher.finalize_digest().encoded(),
            reference_sha256(b"hello world")
        );
    }

    #[test]
    fn test_state_roundtrip_mid_stream() {
        let data: Vec<u8> = (0..5000).map(|i| (i % 17) as u8).collect();
        for split in [0usize, 1, 63, 64, 65, 2500, 4999] {
            let mut first = ResumableSha256::new();
            first.update(&data[..split]);

            let state = first.serialize_state();
            let mut resumed = ResumableSha256::deserialize_state(&state).unwrap();
            assert_eq!(resumed.bytes_hashed(), split as u64);

            resumed.update(&data[split..]);
            assert_eq!(
                resumed.finalize_digest().encoded(),
                reference_sha256(&data),
                "split {split}"
            );
        }
    }

    #[test]
    fn test_state_rejects_corrupt_payloads() {
        let mut hasher = ResumableSha256::new();
        hasher.update(b"some data here");
        let mut state = hasher.serialize_state();

        assert!(ResumableSha256::deserialize_state(&state[..10]).is_err());

        state[0] = 9;
        assert!(ResumableSha256::deserialize_state(&state).is_err());
        state[0] = 1;

        state.push(0);
        assert!(ResumableSha256::deserialize_state(&state).is_err());
    }

    #[test]
    fn test_any_digester_agrees_with_from_bytes() {
        let data = b"any digester input";
        for algorithm in [
            Algorithm::Sha256,
            Algorithm::Sha512,
            Algorithm::Sha384,
            Algorithm::Sha1,
            Algorithm::Md5,
        ] {
            let mut digester = AnyDigester::new(algorithm);
            digester.update(&data[..5]);
            digester.update(&data[5..]);
            assert_eq!(digester.finalize(), Digest::from_bytes(algorithm, data));
        }
    }

    #[test]
    fn test_multi_hasher() {
        let data = b"multi hash me";
        let mut hasher = MultiHasher::new();
        hasher.update(&data[..4]);
        hasher.update(&data[4..]);
        let hashes = hasher.finalize();

        assert_eq!(hashes.size, data.len() as u64);
        assert_eq!(hashes.sha256, reference_sha256(data));
        assert_eq!(hashes.sha1, hex::encode(Sha1::digest(data)));
        assert_eq!(hashes.sha512, hex::encode(Sha512::digest(data)));
        assert_eq!(hashes.md5, hex::encode(Md5::digest(data)));
    }
}
