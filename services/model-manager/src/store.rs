//! Content-addressed blob store
//!
//! Blobs live under `storage_path/{sha256(model_id)}.model`. The storage key
//! is a pure function of the model id, so re-storing a model overwrites its
//! previous blob deterministically; duplicate protection happens at the
//! catalog layer. Writes go to a temp file first and are renamed into place,
//! so a partially written blob is never observable under its final key.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use infermesh_core::protocol::StoreReceipt;
use infermesh_core::{Error, Result};

const DEFAULT_MAX_MODEL_SIZE: u64 = 1024 * 1024 * 1024; // 1 GiB

/// Parse a human-readable size string ("1GB", "500MB", "64KB", "1234")
///
/// Unparseable input falls back to 1 GiB with a warning rather than
/// rejecting, so a typo in deployment config degrades to the default cap
/// instead of refusing to boot.
pub fn parse_size(input: &str) -> u64 {
    let trimmed = input.trim();
    let (digits, unit): (String, String) = trimmed
        .chars()
        .partition(|c| c.is_ascii_digit() || *c == '.');

    let Ok(value) = digits.parse::<f64>() else {
        tracing::warn!(input, "unparseable size, defaulting to 1GB");
        return DEFAULT_MAX_MODEL_SIZE;
    };

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        "TB" => 1024u64.pow(4),
        _ => {
            tracing::warn!(input, "unparseable size unit, defaulting to 1GB");
            return DEFAULT_MAX_MODEL_SIZE;
        }
    };

    (value * multiplier as f64) as u64
}

/// Hex-encoded sha256 of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Aggregate numbers about the blob directory
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub file_count: usize,
    pub total_bytes: u64,
    pub max_model_size: u64,
}

/// Blob storage rooted at one directory
pub struct ModelStore {
    root: PathBuf,
    max_model_size: u64,
}

impl ModelStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>, max_model_size: u64) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            max_model_size,
        })
    }

    /// Deterministic on-disk key for a model id
    pub fn storage_key(model_id: &str) -> String {
        format!("{}.model", sha256_hex(model_id.as_bytes()))
    }

    /// Configured size cap in bytes
    pub fn max_model_size(&self) -> u64 {
        self.max_model_size
    }

    fn blob_path(&self, storage_key: &str) -> Result<PathBuf> {
        // Keys are hex digests; anything else is a caller bug or traversal attempt
        if storage_key.contains('/') || storage_key.contains("..") {
            return Err(Error::BadRequest(format!(
                "malformed storage key: {}",
                storage_key
            )));
        }
        Ok(self.root.join(storage_key))
    }

    /// Store a blob, returning its key, checksum, and size
    pub async fn store(&self, model_id: &str, bytes: &[u8]) -> Result<StoreReceipt> {
        if bytes.is_empty() {
            return Err(Error::InvalidModelData(format!(
                "model {} has an empty payload",
                model_id
            )));
        }
        if bytes.len() as u64 > self.max_model_size {
            return Err(Error::ModelTooLarge(format!(
                "model {} is {} bytes, cap is {} bytes",
                model_id,
                bytes.len(),
                self.max_model_size
            )));
        }

        let storage_key = Self::storage_key(model_id);
        let final_path = self.blob_path(&storage_key)?;
        let tmp_path = self
            .root
            .join(format!(".{}.tmp-{}", storage_key, uuid::Uuid::new_v4()));

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        let checksum = sha256_hex(bytes);
        tracing::debug!(model_id, %storage_key, size = bytes.len(), "stored blob");

        Ok(StoreReceipt {
            storage_key,
            checksum,
            size: bytes.len() as u64,
        })
    }

    /// Read a blob back by key
    pub async fn fetch(&self, storage_key: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(storage_key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::ModelNotFound(
                format!("no blob under key {}", storage_key),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a blob; returns whether it existed
    pub async fn delete(&self, storage_key: &str) -> Result<bool> {
        let path = self.blob_path(storage_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Recompute the blob's checksum and compare against `expected`
    pub async fn verify(&self, storage_key: &str, expected: &str) -> Result<bool> {
        let bytes = self.fetch(storage_key).await?;
        Ok(sha256_hex(&bytes) == expected)
    }

    /// Keys of every blob currently on disk
    pub async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".model") {
                keys.push(name);
            }
        }
        Ok(keys)
    }

    /// File count and cumulative size of stored blobs
    pub async fn stats(&self) -> Result<StoreStats> {
        let mut file_count = 0;
        let mut total_bytes = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".model") {
                continue;
            }
            file_count += 1;
            total_bytes += entry.metadata().await?.len();
        }
        Ok(StoreStats {
            file_count,
            total_bytes,
            max_model_size: self.max_model_size,
        })
    }

    /// Root directory, for diagnostics
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir, cap: u64) -> ModelStore {
        ModelStore::open(dir.path(), cap).unwrap()
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("1GB"), 1024 * 1024 * 1024);
        assert_eq!(parse_size("500MB"), 500 * 1024 * 1024);
        assert_eq!(parse_size("64kb"), 64 * 1024);
        assert_eq!(parse_size("1234"), 1234);
    }

    #[test]
    fn test_parse_size_garbage_defaults_to_one_gib() {
        assert_eq!(parse_size("a lot"), DEFAULT_MAX_MODEL_SIZE);
        assert_eq!(parse_size("12parsecs"), DEFAULT_MAX_MODEL_SIZE);
        assert_eq!(parse_size(""), DEFAULT_MAX_MODEL_SIZE);
    }

    #[test]
    fn test_storage_key_is_deterministic() {
        let a = ModelStore::storage_key("m1");
        let b = ModelStore::storage_key("m1");
        assert_eq!(a, b);
        assert!(a.ends_with(".model"));
        assert_ne!(a, ModelStore::storage_key("m2"));
    }

    #[tokio::test]
    async fn test_store_fetch_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 1024);

        let receipt = store.store("m1", b"model weights").await.unwrap();
        assert_eq!(receipt.size, 13);
        assert_eq!(receipt.checksum, sha256_hex(b"model weights"));

        let bytes = store.fetch(&receipt.storage_key).await.unwrap();
        assert_eq!(bytes, b"model weights");
        assert!(store
            .verify(&receipt.storage_key, &receipt.checksum)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_store_rejects_oversized_blob() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 8);

        let err = store.store("m1", b"way too many bytes").await.unwrap_err();
        assert!(matches!(err, Error::ModelTooLarge(_)));
        assert_eq!(store.stats().await.unwrap().file_count, 0);
    }

    #[tokio::test]
    async fn test_store_rejects_empty_blob() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 1024);

        let err = store.store("m1", b"").await.unwrap_err();
        assert!(matches!(err, Error::InvalidModelData(_)));
    }

    #[tokio::test]
    async fn test_fetch_missing_key() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 1024);

        let err = store.fetch("deadbeef.model").await.unwrap_err();
        assert!(matches!(err, Error::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 1024);

        let receipt = store.store("m1", b"bytes").await.unwrap();
        assert!(store.delete(&receipt.storage_key).await.unwrap());
        assert!(!store.delete(&receipt.storage_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 1024);

        let receipt = store.store("m1", b"original").await.unwrap();
        std::fs::write(dir.path().join(&receipt.storage_key), b"tampered").unwrap();
        assert!(!store
            .verify(&receipt.storage_key, &receipt.checksum)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_restore_overwrites_same_key() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 1024);

        let first = store.store("m1", b"v1").await.unwrap();
        let second = store.store("m1", b"v2-longer").await.unwrap();
        assert_eq!(first.storage_key, second.storage_key);
        assert_eq!(store.fetch(&first.storage_key).await.unwrap(), b"v2-longer");
        assert_eq!(store.stats().await.unwrap().file_count, 1);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 1024);
        store.store("m1", b"bytes").await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_key_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 1024);
        assert!(store.fetch("../escape.model").await.is_err());
    }
}
