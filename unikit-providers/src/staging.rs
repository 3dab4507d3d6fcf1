use std::path::Path;
use tracing::debug;
use unikit_core::{DeviceMapping, ImageFormat, RawImage, Result, RunSpec};
use unikit_storage::{
    DiskConverter, TempArtifact, detect_format, extract_first_partition, read_mbr,
    wrap_in_partition_table,
};

/// Re-encodes a compiler artifact into `target_format`, applying the
/// partition layout the provider expects.
///
/// Every intermediate file lives in `work_dir` and is removed when this
/// returns, unless `no_cleanup`. The returned artifact is the final disk.
pub async fn prepare_disk(
    converter: &dyn DiskConverter,
    raw_image: &RawImage,
    use_partition_tables: bool,
    target_format: ImageFormat,
    work_dir: &Path,
    no_cleanup: bool,
) -> Result<TempArtifact> {
    tokio::fs::create_dir_all(work_dir).await?;
    let source = raw_image.local_image_path.as_path();

    let source_format = detect_format(source).await?;
    let converted = if source_format == ImageFormat::Raw {
        None
    } else {
        let raw = TempArtifact::new_in(work_dir, "stage-raw", no_cleanup)?;
        converter
            .convert(source, source_format, raw.path(), ImageFormat::Raw)
            .await?;
        Some(raw)
    };
    let raw_path = converted.as_ref().map_or(source, |t| t.path());

    let has_table = read_mbr(raw_path).await?.is_some();
    let laid_out = match (use_partition_tables, has_table) {
        (true, false) => {
            debug!("Adding partition table to {}", raw_path.display());
            let wrapped = TempArtifact::new_in(work_dir, "stage-partitioned", no_cleanup)?;
            wrap_in_partition_table(raw_path, wrapped.path()).await?;
            Some(wrapped)
        }
        (false, true) => {
            debug!("Extracting first partition of {}", raw_path.display());
            let bare = TempArtifact::new_in(work_dir, "stage-bare", no_cleanup)?;
            extract_first_partition(raw_path, bare.path()).await?;
            Some(bare)
        }
        _ => None,
    };
    let layout_path = laid_out.as_ref().map_or(raw_path, |t| t.path());

    let target = TempArtifact::new_in(work_dir, &format!("stage-{target_format}"), no_cleanup)?;
    converter
        .convert(layout_path, ImageFormat::Raw, target.path(), target_format)
        .await?;

    Ok(target)
}

/// Rewrites device names for the disk layout: `/dev/vda1` on partitioned
/// disks, `/dev/vda` on bare ones.
pub fn device_name_for_layout(device_name: &str, partitioned: bool) -> String {
    let base = device_name.trim_end_matches(|c: char| c.is_ascii_digit());
    if partitioned {
        format!("{base}1")
    } else {
        base.to_string()
    }
}

pub fn run_spec_for_layout(run_spec: &RunSpec, partitioned: bool) -> RunSpec {
    RunSpec {
        device_mappings: run_spec
            .device_mappings
            .iter()
            .map(|m| {
                DeviceMapping::new(
                    m.mount_point.clone(),
                    device_name_for_layout(&m.device_name, partitioned),
                )
            })
            .collect(),
        ..run_spec.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_names_follow_layout() {
        assert_eq!(device_name_for_layout("/dev/vda1", true), "/dev/vda1");
        assert_eq!(device_name_for_layout("/dev/vda", true), "/dev/vda1");
        assert_eq!(device_name_for_layout("/dev/sda1", false), "/dev/sda");
        assert_eq!(device_name_for_layout("/dev/sdb", false), "/dev/sdb");
    }
}
