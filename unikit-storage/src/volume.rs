use crate::partition::wrap_in_partition_table;
use crate::temp::TempArtifact;
use std::path::Path;
use tokio::fs;
use tracing::info;
use unikit_core::{Result, UnikitError, VolumeSource};

const MB: u64 = 1024 * 1024;

/// Materializes a volume's backing file at `path` and returns its size in bytes.
///
/// Image sources are copied; with `partitioned` they are additionally wrapped
/// in a single-partition MBR so they match how the provider lays out disks.
pub async fn write_volume_file(path: &Path, source: &VolumeSource, partitioned: bool) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    match source {
        VolumeSource::Empty { size_mb } => {
            if *size_mb == 0 {
                return Err(UnikitError::InvalidInput(
                    "volume size must be greater than zero".to_string(),
                ));
            }
            let size_bytes = size_mb.checked_mul(MB).ok_or_else(|| {
                UnikitError::InvalidInput(format!("volume size of {size_mb}MB is too large"))
            })?;
            info!("Creating empty {}MB volume at {}", size_mb, path.display());
            let file = fs::File::create(path).await?;
            file.set_len(size_bytes).await?;
        }
        VolumeSource::Image(image) => {
            let metadata = fs::metadata(image).await.map_err(|e| {
                UnikitError::InvalidInput(format!(
                    "volume image {} is not accessible: {e}",
                    image.display()
                ))
            })?;
            if !metadata.is_file() {
                return Err(UnikitError::InvalidInput(format!(
                    "volume image {} is not a regular file",
                    image.display()
                )));
            }

            info!("Creating volume at {} from {}", path.display(), image.display());
            if partitioned {
                let dir = path.parent().unwrap_or(Path::new("."));
                let staged = TempArtifact::new_in(dir, "volume", false)?;
                wrap_in_partition_table(image, staged.path()).await?;
                staged.persist(path).await?;
            } else {
                fs::copy(image, path).await?;
            }
        }
    }

    Ok(fs::metadata(path).await?.len())
}

/// Removes a volume's backing file, tolerating one that is already gone.
pub async fn remove_volume_file(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
