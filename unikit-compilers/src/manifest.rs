use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use unikit_core::{Result, UnikitError};

pub const MANIFEST_FILE: &str = "manifest.yaml";

/// Project manifest for Node.js sources. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeManifest {
    pub main_file: String,
}

impl NodeManifest {
    pub async fn load(sources_dir: &Path) -> Result<Self> {
        let manifest: NodeManifest = load_manifest(sources_dir).await?;
        if manifest.main_file.trim().is_empty() {
            return Err(UnikitError::InvalidInput(format!(
                "{MANIFEST_FILE} in {} has an empty main_file",
                sources_dir.display()
            )));
        }
        Ok(manifest)
    }
}

/// Reads and parses `manifest.yaml` from the root of `sources_dir`.
pub async fn load_manifest<T: DeserializeOwned>(sources_dir: &Path) -> Result<T> {
    let path = sources_dir.join(MANIFEST_FILE);
    let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
        UnikitError::InvalidInput(format!("failed to read {}: {e}", path.display()))
    })?;

    serde_yaml::from_str(&content).map_err(|e| {
        UnikitError::InvalidInput(format!("failed to parse {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use unikit_core::ErrorKind;

    #[tokio::test]
    async fn test_main_file_is_read_and_extra_keys_ignored() -> Result<()> {
        let dir = tempfile::tempdir()?;
        tokio::fs::write(
            dir.path().join(MANIFEST_FILE),
            "main_file: app.js\nruntime_args: --harmony\n",
        )
        .await?;

        let manifest = NodeManifest::load(dir.path()).await?;
        assert_eq!(manifest.main_file, "app.js");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_main_file_is_invalid_input() -> Result<()> {
        let dir = tempfile::tempdir()?;
        tokio::fs::write(dir.path().join(MANIFEST_FILE), "name: app\n").await?;

        let err = NodeManifest::load(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_main_file_is_invalid_input() -> Result<()> {
        let dir = tempfile::tempdir()?;
        tokio::fs::write(dir.path().join(MANIFEST_FILE), "main_file: '  '\n").await?;

        let err = NodeManifest::load(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_yaml_is_invalid_input() -> Result<()> {
        let dir = tempfile::tempdir()?;
        tokio::fs::write(dir.path().join(MANIFEST_FILE), "main_file: [app.js\n").await?;

        let err = NodeManifest::load(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        Ok(())
    }
}
