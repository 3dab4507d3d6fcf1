use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};
use unikit_core::{ImageFormat, Result, UnikitError};

/// Converts disk images between on-disk formats.
#[async_trait]
pub trait DiskConverter: Send + Sync {
    async fn convert(
        &self,
        input: &Path,
        input_format: ImageFormat,
        output: &Path,
        output_format: ImageFormat,
    ) -> Result<()>;
}

/// `DiskConverter` backed by the `qemu-img` binary.
pub struct QemuImgConverter {
    binary: PathBuf,
}

impl QemuImgConverter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn format_arg(format: ImageFormat) -> &'static str {
        match format {
            ImageFormat::Raw => "raw",
            ImageFormat::Qcow2 => "qcow2",
            ImageFormat::Vmdk => "vmdk",
        }
    }
}

impl Default for QemuImgConverter {
    fn default() -> Self {
        Self::new("qemu-img")
    }
}

#[async_trait]
impl DiskConverter for QemuImgConverter {
    async fn convert(
        &self,
        input: &Path,
        input_format: ImageFormat,
        output: &Path,
        output_format: ImageFormat,
    ) -> Result<()> {
        info!(
            "Converting {} ({}) to {} ({})",
            input.display(),
            input_format,
            output.display(),
            output_format
        );

        let result = Command::new(&self.binary)
            .arg("convert")
            .args(["-f", Self::format_arg(input_format)])
            .args(["-O", Self::format_arg(output_format)])
            .arg(input)
            .arg(output)
            .output()
            .await
            .map_err(|e| UnikitError::external("qemu-img", "convert", e))?;

        if !result.status.success() {
            return Err(UnikitError::external(
                "qemu-img",
                "convert",
                String::from_utf8_lossy(&result.stderr).trim(),
            ));
        }

        debug!("Converted {}", output.display());
        Ok(())
    }
}

const QCOW2_MAGIC: &[u8] = b"QFI\xfb";
const VMDK_SPARSE_MAGIC: &[u8] = b"KDMV";
const VMDK_DESCRIPTOR_MAGIC: &[u8] = b"# Disk DescriptorFile";

/// Sniffs the container format from the file header. Anything unrecognized is raw.
pub async fn detect_format(path: &Path) -> Result<ImageFormat> {
    let mut file = File::open(path).await?;
    let mut header = [0u8; 32];
    let mut filled = 0;
    while filled < header.len() {
        let read = file.read(&mut header[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }

    Ok(format_from_header(&header[..filled]))
}

fn format_from_header(header: &[u8]) -> ImageFormat {
    if header.starts_with(QCOW2_MAGIC) {
        ImageFormat::Qcow2
    } else if header.starts_with(VMDK_SPARSE_MAGIC) || header.starts_with(VMDK_DESCRIPTOR_MAGIC) {
        ImageFormat::Vmdk
    } else {
        ImageFormat::Raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_sniffing() {
        assert_eq!(format_from_header(b"QFI\xfb\x00\x00\x00\x03"), ImageFormat::Qcow2);
        assert_eq!(format_from_header(b"KDMV\x01\x00\x00\x00"), ImageFormat::Vmdk);
        assert_eq!(
            format_from_header(b"# Disk DescriptorFile\nversion=1"),
            ImageFormat::Vmdk
        );
        assert_eq!(format_from_header(b"\x00\x00\x00\x00"), ImageFormat::Raw);
        assert_eq!(format_from_header(b""), ImageFormat::Raw);
    }

    #[tokio::test]
    async fn test_detect_format_on_short_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tiny.img");
        tokio::fs::write(&path, b"QFI\xfb").await?;
        assert_eq!(detect_format(&path).await?, ImageFormat::Qcow2);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_binary_is_external_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in.img");
        tokio::fs::write(&input, vec![0u8; 512]).await?;

        let converter = QemuImgConverter::new(dir.path().join("no-such-qemu-img"));
        let err = converter
            .convert(
                &input,
                ImageFormat::Raw,
                &dir.path().join("out.qcow2"),
                ImageFormat::Qcow2,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), unikit_core::ErrorKind::ExternalFailure);
        Ok(())
    }
}
