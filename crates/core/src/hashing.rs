//! SHA-256 hex digests for downloaded dump files.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

/// Read buffer size for streaming file digests.
const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// Compute a SHA-256 hex digest of a file without loading it into memory.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_file_produces_known_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.sql");
        tokio::fs::write(&path, b"").await.unwrap();

        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn file_digest_matches_in_memory_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");
        let body = "INSERT INTO users VALUES (1);\n".repeat(10_000);
        tokio::fs::write(&path, &body).await.unwrap();

        let streamed = sha256_file(&path).await.unwrap();
        assert_eq!(streamed, format!("{:x}", Sha256::digest(body.as_bytes())));
    }
}
