//! Hash verification (spec §4.3, §4.5, §8 testable property 6).
//!
//! A declared hash's *length* selects the algorithm: 32 hex chars is MD5, 40
//! is SHA-1, 64 is SHA-256. This mirrors the streaming-hasher pattern used
//! elsewhere in this codebase for file integrity checks, generalized to all
//! three algorithms the catalog format allows.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgo {
    /// Returns `None` for a hash string whose length doesn't match one of
    /// the three recognized algorithms.
    pub fn from_hash_len(hash: &str) -> Option<Self> {
        match hash.trim().len() {
            32 => Some(HashAlgo::Md5),
            40 => Some(HashAlgo::Sha1),
            64 => Some(HashAlgo::Sha256),
            _ => None,
        }
    }
}

fn hash_reader<D: Digest>(mut reader: impl Read, mut hasher: D) -> std::io::Result<String>
where
    D::OutputSize: std::ops::Add,
    <D::OutputSize as std::ops::Add>::Output: sha2::digest::generic_array::ArrayLength<u8>,
{
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Streams `path` through the algorithm selected by `algo`.
pub fn hash_file(path: &Path, algo: HashAlgo) -> std::io::Result<String> {
    let file = File::open(path)?;
    match algo {
        HashAlgo::Md5 => hash_reader(file, Md5::new()),
        HashAlgo::Sha1 => hash_reader(file, Sha1::new()),
        HashAlgo::Sha256 => hash_reader(file, Sha256::new()),
    }
}

/// Returns `true` only when `expected` parses to a recognized length and the
/// computed digest matches, case-insensitively.
pub fn verify_file(path: &Path, expected: &str) -> bool {
    let Some(algo) = HashAlgo::from_hash_len(expected) else {
        return false;
    };
    match hash_file(path, algo) {
        Ok(actual) => actual.eq_ignore_ascii_case(expected.trim()),
        Err(_) => false,
    }
}
