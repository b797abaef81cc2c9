use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::ArtifactStore;
use crate::error::CallError;
use crate::model::ArtifactRef;

/// Artifact store on the local filesystem (or any mounted share).
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, CallError> {
        let rel = Path::new(relative);
        let safe = !relative.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(CallError::permanent(format!(
                "invalid artifact path '{relative}'"
            )));
        }
        Ok(self.root.join(rel))
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> CallError {
    let message = format!("failed to {action} {}: {err}", path.display());
    match err.kind() {
        ErrorKind::NotFound
        | ErrorKind::PermissionDenied
        | ErrorKind::InvalidInput
        | ErrorKind::InvalidFilename => CallError::permanent(message),
        _ => CallError::transient(message),
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<ArtifactRef, CallError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory", parent, e))?;
        }

        // Write next to the target and rename so readers never see a partial file.
        let tmp = target.with_file_name(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));

        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error("write", &tmp, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error("rename into", &target, e));
        }

        debug!("Stored artifact {} ({} bytes)", path, bytes.len());
        Ok(ArtifactRef::new(path))
    }

    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, CallError> {
        let path = self.resolve(artifact.as_str())?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| io_error("read", &path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        let reference = store
            .put("transcripts/a/b/2026-01-01/b_0900_transcript.vtt", b"WEBVTT")
            .await
            .unwrap();
        assert_eq!(reference.as_str(), "transcripts/a/b/2026-01-01/b_0900_transcript.vtt");
        assert_eq!(store.get(&reference).await.unwrap(), b"WEBVTT");
    }

    #[tokio::test]
    async fn test_put_overwrites_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        store.put("notes/x.md", b"first").await.unwrap();
        let reference = store.put("notes/x.md", b"second").await.unwrap();
        assert_eq!(store.get(&reference).await.unwrap(), b"second");

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("notes"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        for bad in ["../outside.txt", "/etc/passwd", ""] {
            let err = store.put(bad, b"x").await.unwrap_err();
            assert_eq!(err.class, ErrorClass::Permanent, "{bad}");
        }
    }

    #[tokio::test]
    async fn test_oversized_file_name_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let name = format!("notes/{}.md", "n".repeat(300));
        let err = store.put(&name, b"x").await.unwrap_err();
        assert_eq!(err.class, ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let err = store
            .get(&ArtifactRef::new("notes/missing.md"))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
