//! SHA-512 digests for firmware files.
//!
//! Catalog records store the lowercase hex digest of the full file content.

use crate::error::{OtaError, Result};
use sha2::{Digest, Sha512};
use std::io::Read;
use std::path::Path;

/// Chunk size for reading files.
const CHUNK_SIZE: usize = 1024 * 1024;

/// SHA-512 of an in-memory buffer as lowercase hex.
pub fn compute_sha512(bytes: &[u8]) -> String {
    hex::encode(Sha512::digest(bytes))
}

/// SHA-512 of a file, streamed in chunks.
pub fn compute_file_sha512(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| OtaError::io_with_path(e, path))?;

    let mut hasher = Sha512::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| OtaError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify a file's SHA-512 matches `expected` (hex, any case).
pub fn verify_sha512(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    let actual = compute_file_sha512(path)?;
    let expected_lower = expected.to_lowercase();

    if actual == expected_lower {
        Ok(())
    } else {
        Err(OtaError::Validation {
            field: "sha512".to_string(),
            message: format!("expected {}, got {}", expected_lower, actual),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const EMPTY_SHA512: &str = "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e";

    #[test]
    fn test_sha512_empty() {
        assert_eq!(compute_sha512(&[]), EMPTY_SHA512);

        let file = NamedTempFile::new().unwrap();
        assert_eq!(compute_file_sha512(file.path()).unwrap(), EMPTY_SHA512);
    }

    #[test]
    fn test_file_digest_matches_buffer_digest() {
        let content = vec![0x5au8; CHUNK_SIZE + 17];
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&content).unwrap();
        file.flush().unwrap();

        let digest = compute_file_sha512(file.path()).unwrap();
        assert_eq!(digest.len(), 128);
        assert_eq!(digest, compute_sha512(&content));
    }

    #[test]
    fn test_verify_sha512_case_insensitive() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"firmware").unwrap();
        file.flush().unwrap();

        let digest = compute_sha512(b"firmware").to_uppercase();
        assert!(verify_sha512(file.path(), &digest).is_ok());
    }

    #[test]
    fn test_verify_sha512_mismatch() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"firmware").unwrap();
        file.flush().unwrap();

        match verify_sha512(file.path(), "abcd") {
            Err(OtaError::Validation { field, .. }) => assert_eq!(field, "sha512"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = compute_file_sha512("/nonexistent/image.ota").unwrap_err();
        assert!(matches!(err, OtaError::Io { path: Some(_), .. }));
    }
}
