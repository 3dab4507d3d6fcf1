use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, warn};
use unikit_core::{Result, UnikitError};

/// A generated temp file removed on drop unless persisted, kept, or
/// created with `no_cleanup`.
///
/// File names follow `<purpose>.<random-suffix>`, so concurrent operations
/// never share a path.
pub struct TempArtifact {
    path: PathBuf,
    guard: Option<TempPath>,
    no_cleanup: bool,
}

impl TempArtifact {
    pub fn new_in(dir: &Path, purpose: &str, no_cleanup: bool) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{purpose}."))
            .tempfile_in(dir)
            .map_err(|e| {
                UnikitError::external("storage", format!("create temp file for {purpose}"), e)
            })?;
        let guard = file.into_temp_path();
        let path = guard.to_path_buf();
        debug!("Created temp artifact {}", path.display());

        Ok(Self {
            path,
            guard: Some(guard),
            no_cleanup,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves the file to `destination`; it is no longer removed on drop.
    pub async fn persist(mut self, destination: &Path) -> Result<()> {
        move_file(&self.path, destination).await?;
        self.disarm();
        Ok(())
    }

    /// Hands ownership of the file to the caller without moving it.
    pub fn keep(mut self) -> PathBuf {
        self.disarm();
        self.path.clone()
    }

    fn disarm(&mut self) {
        if let Some(guard) = self.guard.take() {
            let _ = guard.keep();
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.no_cleanup {
            if self.guard.is_some() {
                debug!("Leaving temp artifact {} in place", self.path.display());
            }
            self.disarm();
        } else if let Some(guard) = self.guard.take() {
            if let Err(e) = guard.close() {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove temp artifact {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

/// Renames `from` to `to`, falling back to copy-and-remove across filesystems.
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Err(rename_err) = tokio::fs::rename(from, to).await {
        debug!(
            "Rename {} -> {} failed ({}), copying instead",
            from.display(),
            to.display(),
            rename_err
        );
        tokio::fs::copy(from, to).await.map_err(|e| {
            UnikitError::external(
                "storage",
                format!("move {} to {}", from.display(), to.display()),
                e,
            )
        })?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}
