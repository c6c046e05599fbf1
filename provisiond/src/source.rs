//! Repository fetching into per-request workspaces

use crate::error::FetchError;
use crate::process::ProcessRunner;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Clones a repository into a destination directory.
#[async_trait]
pub trait SourceControlClient: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<PathBuf, FetchError>;
}

/// Clones with the `git` CLI through a [`ProcessRunner`].
pub struct GitSourceFetcher {
    runner: Arc<dyn ProcessRunner>,
}

impl GitSourceFetcher {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl SourceControlClient for GitSourceFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<PathBuf, FetchError> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|source| FetchError::Workspace {
                path: dest.to_path_buf(),
                source,
            })?;

        let command = format!(
            "git clone {} {}",
            shell_quote(url),
            shell_quote(&dest.to_string_lossy())
        );
        let output = self
            .runner
            .run(&command, None)
            .await
            .map_err(|source| FetchError::Clone {
                url: url.to_string(),
                source,
            })?;

        info!(url = %url, dest = %dest.display(), "repository cloned");
        // git reports progress on stderr even when the clone succeeds
        if !output.stderr.trim().is_empty() {
            warn!(url = %url, stderr = %output.stderr.trim(), "clone produced warnings");
        }

        Ok(dest.to_path_buf())
    }
}

/// Single-quote a value for `sh -c`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
