//! Integrity verification
//!
//! Content-hash checks over manifest files. The hash covers the raw file
//! bytes, not the parsed structure, so a parser upgrade can never change
//! what a recorded hash means. BLAKE3 is canonical; `sha256:`-prefixed
//! hashes are accepted for records produced by older tooling.
//!
//! A mismatch is fatal for the call that observed it: the executor refuses
//! to dispatch a chain containing a mismatched element. The file itself is
//! left untouched.

use sdk::errors::KernelError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Hash prefix written by [`compute_file_hash`]
const CANONICAL_PREFIX: &str = "blake3:";

/// Compute the canonical content hash of a file
///
/// Returns `blake3:<hex>` over the raw bytes, read in 8 KiB chunks.
pub fn compute_file_hash(path: &Path) -> Result<String, KernelError> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{}{}", CANONICAL_PREFIX, hasher.finalize().to_hex()))
}

/// Verify a manifest file against an expected content hash
///
/// The expected hash selects the algorithm by prefix (`blake3:` or
/// `sha256:`). Comparison is over lowercase hex.
pub fn verify_file(tool_id: &str, path: &Path, expected: &str) -> Result<(), KernelError> {
    tracing::debug!("Verifying content hash for '{}'", tool_id);

    let computed = if expected.starts_with(CANONICAL_PREFIX) {
        compute_file_hash(path)?
    } else if expected.starts_with("sha256:") {
        compute_sha256(path)?
    } else {
        return Err(KernelError::Config(format!(
            "Invalid hash format: expected 'blake3:hex' or 'sha256:hex', got '{}'",
            expected
        )));
    };

    if !computed.eq_ignore_ascii_case(expected) {
        tracing::error!(
            "Hash mismatch for '{}' at {}: expected {}, got {}",
            tool_id,
            path.display(),
            expected,
            computed
        );
        return Err(KernelError::IntegrityMismatch {
            tool_id: tool_id.to_string(),
            path: path.to_path_buf(),
        });
    }

    tracing::debug!("Content hash verified for '{}'", tool_id);
    Ok(())
}

fn compute_sha256(path: &Path) -> Result<String, KernelError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fixture(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_compute_is_stable() {
        let file = fixture(b"tool_id: git\n");
        let first = compute_file_hash(file.path()).unwrap();
        let second = compute_file_hash(file.path()).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("blake3:"));
    }

    #[test]
    fn test_verify_round_trip() {
        let file = fixture(b"tool_id: git\n");
        let hash = compute_file_hash(file.path()).unwrap();
        assert!(verify_file("git", file.path(), &hash).is_ok());
    }

    #[test]
    fn test_mismatch_detected_and_file_kept() {
        let file = fixture(b"original");
        let hash = compute_file_hash(file.path()).unwrap();
        std::fs::write(file.path(), b"tampered").unwrap();

        let err = verify_file("git", file.path(), &hash).unwrap_err();
        assert!(matches!(err, KernelError::IntegrityMismatch { .. }));
        // The mismatched file must still exist
        assert!(file.path().exists());
    }

    #[test]
    fn test_sha256_accepted() {
        let file = fixture(b"legacy bytes");
        let mut hasher = Sha256::new();
        hasher.update(b"legacy bytes");
        let expected = format!("sha256:{}", hex::encode(hasher.finalize()));
        assert!(verify_file("legacy", file.path(), &expected).is_ok());
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        let file = fixture(b"x");
        let err = verify_file("x", file.path(), "md5:abcd").unwrap_err();
        assert!(matches!(err, KernelError::Config(_)));
    }

    #[test]
    fn test_case_insensitive_comparison() {
        let file = fixture(b"bytes");
        let hash = compute_file_hash(file.path()).unwrap().to_uppercase();
        assert!(verify_file("x", file.path(), &hash).is_ok());
    }

    #[test]
    fn test_different_bytes_different_hash() {
        let a = fixture(b"one");
        let b = fixture(b"two");
        assert_ne!(
            compute_file_hash(a.path()).unwrap(),
            compute_file_hash(b.path()).unwrap()
        );
    }
}
