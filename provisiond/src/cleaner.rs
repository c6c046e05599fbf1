//! Workspace removal

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::{debug, info};

/// Deletes per-request workspace trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceCleaner;

impl WorkspaceCleaner {
    /// Remove `path` depth-first. A missing path is not an error; symlinks
    /// are removed without following them.
    pub async fn delete(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "workspace already absent");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        remove_tree(path.to_path_buf()).await?;
        info!(path = %path.display(), "workspace deleted");
        Ok(())
    }
}

fn remove_tree(path: PathBuf) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send>> {
    Box::pin(async move {
        let metadata = tokio::fs::symlink_metadata(&path).await?;
        if !metadata.is_dir() {
            return tokio::fs::remove_file(&path).await;
        }

        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            remove_tree(entry.path()).await?;
        }
        tokio::fs::remove_dir(&path).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_path_is_noop() {
        let root = TempDir::new().unwrap();
        let cleaner = WorkspaceCleaner;
        cleaner.delete(&root.path().join("never-created")).await.unwrap();
    }

    #[tokio::test]
    async fn test_deletes_nested_tree() {
        let root = TempDir::new().unwrap();
        let workspace = root.path().join("rec-1");
        std::fs::create_dir_all(workspace.join("force-app/main/default")).unwrap();
        std::fs::write(workspace.join("orgInit.sh"), "sf org display").unwrap();
        std::fs::write(workspace.join("force-app/main/default/a.xml"), "<a/>").unwrap();
        std::fs::create_dir_all(workspace.join(".git/objects")).unwrap();

        WorkspaceCleaner.delete(&workspace).await.unwrap();
        assert!(!workspace.exists());
        assert!(root.path().exists());

        // Second call on the now-absent path is still fine.
        WorkspaceCleaner.delete(&workspace).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_are_not_followed() {
        let root = TempDir::new().unwrap();
        let outside = root.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("keep.txt"), "keep").unwrap();

        let workspace = root.path().join("rec-2");
        std::fs::create_dir_all(&workspace).unwrap();
        std::os::unix::fs::symlink(&outside, workspace.join("link")).unwrap();

        WorkspaceCleaner.delete(&workspace).await.unwrap();
        assert!(!workspace.exists());
        assert!(outside.join("keep.txt").exists());
    }
}
