//! Local-filesystem blob store.
//!
//! Containers are directories under a configured root; blob names may
//! contain `/` separators and map directly to relative paths. The store
//! implements the contracts the pipeline depends on:
//!
//! - `put` / `get` / prefix `list` (optionally including soft-deleted blobs)
//! - `soft_delete` — a sidecar marker keeps the blob recoverable and listable
//! - `delete_batch` — permanent removal, capped batch size
//! - HMAC-SHA256 signed read URLs with a bounded lifetime
//!
//! Exactly one stage writes any given blob name, so no locking is required.

use anyhow::{bail, Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

type HmacSha256 = Hmac<Sha256>;

/// Suffix of the sidecar file marking a blob as soft-deleted.
const DELETED_MARKER: &str = ".deleted";

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    signing_key: String,
    signed_url_ttl_secs: i64,
    delete_batch_max: usize,
}

/// One entry returned by [`BlobStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
    pub soft_deleted: bool,
}

impl BlobStore {
    pub fn new(
        root: impl Into<PathBuf>,
        signing_key: &str,
        signed_url_ttl_secs: i64,
        delete_batch_max: usize,
    ) -> Self {
        Self {
            root: root.into(),
            signing_key: signing_key.to_string(),
            signed_url_ttl_secs,
            delete_batch_max,
        }
    }

    pub fn from_config(storage: &crate::config::StorageConfig) -> Self {
        Self::new(
            &storage.root,
            &storage.signing_key,
            storage.signed_url_ttl_secs,
            storage.delete_batch_max,
        )
    }

    fn blob_path(&self, container: &str, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.split('/').any(|part| part == ".." || part.is_empty()) {
            bail!("invalid blob name: {name:?}");
        }
        Ok(self.root.join(container).join(name))
    }

    /// Canonical URI for a blob, independent of whether it exists yet.
    pub fn uri(&self, container: &str, name: &str) -> String {
        format!("file://{}", self.root.join(container).join(name).display())
    }

    pub fn put(&self, container: &str, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(container, name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write blob {}", path.display()))?;
        // A rewrite revives a previously soft-deleted blob.
        let _ = std::fs::remove_file(marker_path(&path));
        Ok(())
    }

    pub fn get(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(container, name)?;
        std::fs::read(&path).with_context(|| format!("Failed to read blob {}", path.display()))
    }

    pub fn exists(&self, container: &str, name: &str) -> bool {
        self.blob_path(container, name)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// List blob names under a prefix, sorted, optionally including
    /// soft-deleted entries. Marker files themselves are never listed.
    pub fn list(&self, container: &str, prefix: &str, include_deleted: bool) -> Result<Vec<BlobEntry>> {
        let base = self.root.join(container);
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&base) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let name = path
                .strip_prefix(&base)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            if name.ends_with(DELETED_MARKER) {
                continue;
            }
            if !name.starts_with(prefix) {
                continue;
            }
            let soft_deleted = marker_path(path).exists();
            if soft_deleted && !include_deleted {
                continue;
            }
            entries.push(BlobEntry { name, soft_deleted });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Mark a blob deleted without removing its content.
    pub fn soft_delete(&self, container: &str, name: &str) -> Result<()> {
        let path = self.blob_path(container, name)?;
        if !path.is_file() {
            bail!("cannot soft-delete missing blob: {name}");
        }
        std::fs::write(marker_path(&path), b"")?;
        Ok(())
    }

    /// Permanently delete a batch of blobs (content and markers).
    ///
    /// The batch size cap mirrors the managed-store API this fronts;
    /// callers chunk larger delete lists.
    pub fn delete_batch(&self, container: &str, names: &[String]) -> Result<()> {
        if names.len() > self.delete_batch_max {
            bail!(
                "delete batch of {} exceeds maximum of {}",
                names.len(),
                self.delete_batch_max
            );
        }
        for name in names {
            let path = self.blob_path(container, name)?;
            // Already-gone blobs are a non-error: deletes are idempotent.
            let _ = std::fs::remove_file(&path);
            let _ = std::fs::remove_file(marker_path(&path));
        }
        Ok(())
    }

    pub fn delete_batch_max(&self) -> usize {
        self.delete_batch_max
    }

    /// Generate a time-bounded, read-only signed URL for a blob.
    ///
    /// Shape: `file://{path}?exp={unix}&sig={hex hmac}` where the signature
    /// covers `{container}/{name}:{exp}`.
    pub fn signed_url(&self, container: &str, name: &str) -> Result<String> {
        let path = self.blob_path(container, name)?;
        if !path.is_file() {
            bail!("cannot sign URL for missing blob: {name}");
        }
        let expires = chrono::Utc::now().timestamp() + self.signed_url_ttl_secs;
        let sig = self.signature(container, name, expires);
        Ok(format!("file://{}?exp={}&sig={}", path.display(), expires, sig))
    }

    /// Verify a signature produced by [`BlobStore::signed_url`].
    pub fn verify_signature(
        &self,
        container: &str,
        name: &str,
        expires: i64,
        sig: &str,
    ) -> bool {
        if expires < chrono::Utc::now().timestamp() {
            return false;
        }
        self.signature(container, name, expires) == sig
    }

    fn signature(&self, container: &str, name: &str, expires: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(self.signing_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(format!("{container}/{name}:{expires}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn marker_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(DELETED_MARKER);
    PathBuf::from(s)
}
