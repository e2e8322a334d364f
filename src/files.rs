//! Chat file store
//!
//! Message parts hold references to files, not bytes. Files belong to the
//! conversation that references them, live under that conversation's own
//! directory, and are deleted once no version of that conversation
//! references them any more.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Directory holding files referenced by messages
#[derive(Debug, Clone)]
pub struct ChatFiles {
    dir: PathBuf,
}

impl ChatFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn owner_dir(&self, owner: Uuid) -> PathBuf {
        self.dir.join(owner.simple().to_string())
    }

    /// Store bytes for conversation `owner` and return the reference.
    ///
    /// Names are content-addressed within the owner: saving the same bytes
    /// twice for one conversation yields the same reference, while another
    /// conversation gets its own copy.
    pub async fn save(
        &self,
        owner: Uuid,
        bytes: &[u8],
        extension: &str,
    ) -> std::io::Result<String> {
        let dir = self.owner_dir(owner);
        tokio::fs::create_dir_all(&dir).await?;
        let digest = Sha256::digest(bytes);
        let name: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();
        let path = dir.join(format!("{name}.{extension}"));
        if tokio::fs::try_exists(&path).await? {
            return Ok(path.to_string_lossy().into_owned());
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Copy a stored file under a fresh name owned by `owner`
    pub async fn duplicate(&self, reference: &str, owner: Uuid) -> std::io::Result<String> {
        let extension = Path::new(reference)
            .extension()
            .map_or_else(String::new, |e| format!(".{}", e.to_string_lossy()));
        let dir = self.owner_dir(owner);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}{extension}", Uuid::new_v4().simple()));
        tokio::fs::copy(reference, &path).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Remove the directory of a deleted conversation if nothing is left in it
    pub async fn remove_owner_dir(&self, owner: Uuid) {
        let dir = self.owner_dir(owner);
        match tokio::fs::remove_dir(&dir).await {
            Ok(()) => tracing::debug!(dir = %dir.display(), "Removed chat file directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::debug!(dir = %dir.display(), error = %e, "Kept chat file directory"),
        }
    }

    /// Whether a reference points into this store
    pub fn owns(&self, reference: &str) -> bool {
        Path::new(reference).starts_with(&self.dir)
    }

    /// Delete referenced files. Files outside the store are left alone and
    /// missing files are ignored.
    pub async fn delete<'a>(&self, references: impl IntoIterator<Item = &'a String>) {
        for reference in references {
            if !self.owns(reference) {
                continue;
            }
            match tokio::fs::remove_file(reference).await {
                Ok(()) => tracing::debug!(file = %reference, "Deleted chat file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(file = %reference, error = %e, "Failed to delete chat file");
                }
            }
        }
    }

    /// Delete files present in `old` but absent from `new`
    pub async fn release_unreferenced(&self, old: &HashSet<String>, new: &HashSet<String>) {
        let released: Vec<&String> = old.difference(new).collect();
        if released.is_empty() {
            return;
        }
        tracing::warn!(files = ?released, "Releasing unreferenced chat files");
        self.delete(released).await;
    }
}
