//! Digest helpers used for download verification.
//!
//! Every digest is reported as lowercase hex. The default method is MD5: it is
//! what release sidecar files (`<asset>.md5`) carry, and it is only used as an
//! integrity check, never for security.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use sha2::digest::DynDigest;
use thiserror::Error;
use tracing::debug;

const BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("unsupported hash method \"{0}\" (expected one of md5, sha1, sha224, sha256, sha384, sha512)")]
    UnsupportedMethod(String),
    #[error("io error at {path}: {source}")]
    Io { path: String, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashMethod {
    #[default]
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashMethod {
    pub const ALL: [HashMethod; 6] = [
        HashMethod::Md5,
        HashMethod::Sha1,
        HashMethod::Sha224,
        HashMethod::Sha256,
        HashMethod::Sha384,
        HashMethod::Sha512,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HashMethod::Md5 => "md5",
            HashMethod::Sha1 => "sha1",
            HashMethod::Sha224 => "sha224",
            HashMethod::Sha256 => "sha256",
            HashMethod::Sha384 => "sha384",
            HashMethod::Sha512 => "sha512",
        }
    }

    /// Length of the hex digest this method produces.
    pub fn hex_len(self) -> usize {
        match self {
            HashMethod::Md5 => 32,
            HashMethod::Sha1 => 40,
            HashMethod::Sha224 => 56,
            HashMethod::Sha256 => 64,
            HashMethod::Sha384 => 96,
            HashMethod::Sha512 => 128,
        }
    }

    fn hasher(self) -> Box<dyn DynDigest> {
        match self {
            HashMethod::Md5 => Box::new(md5::Md5::default()),
            HashMethod::Sha1 => Box::new(sha1::Sha1::default()),
            HashMethod::Sha224 => Box::new(sha2::Sha224::default()),
            HashMethod::Sha256 => Box::new(sha2::Sha256::default()),
            HashMethod::Sha384 => Box::new(sha2::Sha384::default()),
            HashMethod::Sha512 => Box::new(sha2::Sha512::default()),
        }
    }

    pub fn digest_hex(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashMethod {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        HashMethod::ALL
            .into_iter()
            .find(|m| m.name() == normalized)
            .ok_or_else(|| HashError::UnsupportedMethod(s.to_string()))
    }
}

/// Digest `data` with the method named `method` (e.g. `"md5"`, `"SHA-256"`).
pub fn get_hash(data: &[u8], method: &str) -> Result<String, HashError> {
    let method: HashMethod = method.parse()?;
    let digest = method.digest_hex(data);
    debug!(method = %method, "hash for binary data: {digest}");
    Ok(digest)
}

/// Digest a file without loading it whole.
pub fn hash_file(path: &Path, method: HashMethod) -> Result<String, HashError> {
    let io_err = |source| HashError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = method.hasher();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn digests_match(actual: &str, expected: &str) -> bool {
    actual.trim().eq_ignore_ascii_case(expected.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn known_vectors_for_abc() {
        let cases = [
            ("md5", "900150983cd24fb0d6963f7d28e17f72"),
            ("sha1", "a9993e364706816aba3e25717850c26c9cd0d89d"),
            (
                "sha224",
                "23097d223405d8228642a477bda255b32aadbce4bda0b3f7e36c9da7",
            ),
            (
                "sha256",
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
            ),
            (
                "sha384",
                "cb00753f45a35e8bb5a03d699ac65007272c32ab0eded1631a8b605a43ff5bed8086072ba1e7cc2358baeca134c825a7",
            ),
            (
                "sha512",
                "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f",
            ),
        ];
        for (method, expected) in cases {
            let digest = get_hash(b"abc", method).unwrap();
            assert_eq!(digest, expected, "method {method}");
            assert_eq!(digest.len(), method.parse::<HashMethod>().unwrap().hex_len());
        }
    }

    #[test]
    fn method_names_are_forgiving() {
        assert_eq!("SHA-256".parse::<HashMethod>().unwrap(), HashMethod::Sha256);
        assert_eq!(" Md5 ".parse::<HashMethod>().unwrap(), HashMethod::Md5);
        assert_eq!("sha_1".parse::<HashMethod>().unwrap(), HashMethod::Sha1);
        assert_eq!(HashMethod::default(), HashMethod::Md5);
    }

    #[test]
    fn unknown_method_is_reported_by_name() {
        let err = get_hash(b"abc", "whirlpool").unwrap_err();
        assert!(matches!(err, HashError::UnsupportedMethod(ref m) if m == "whirlpool"));
        assert!(err.to_string().contains("whirlpool"));
    }

    #[test]
    fn unknown_method_fails_before_any_request_is_built() {
        assert!(matches!(
            "whirlpool".parse::<HashMethod>(),
            Err(HashError::UnsupportedMethod(ref m)) if m == "whirlpool"
        ));
    }

    #[test]
    fn file_digest_matches_in_memory_digest() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        assert_eq!(
            hash_file(f.path(), HashMethod::Sha256).unwrap(),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
        assert_eq!(
            hash_file(f.path(), HashMethod::Md5).unwrap(),
            HashMethod::Md5.digest_hex(b"hello\n")
        );
    }

    #[test]
    fn comparison_ignores_case_and_padding() {
        assert!(digests_match("ABCDEF01", " abcdef01\n"));
        assert!(!digests_match("abcdef01", "abcdef02"));
        assert!(!digests_match("abcdef01", "nope"));
    }
}
