use super::selected;
use crate::output::{OutputFormat, OutputFormatter, format_size, print_info, print_success};
use crate::utils::parse_size_mb;
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;
use unikit_core::{Providers, Result, UnikitError, Volume, VolumeSource};

#[derive(Serialize, Tabled)]
struct VolumeRow {
    id: String,
    name: String,
    provider: String,
    size: String,
    attached_to: String,
}

impl From<Volume> for VolumeRow {
    fn from(volume: Volume) -> Self {
        let attached_to = match &volume.attachment {
            Some(a) => format!("{} at {}", a.instance_id, a.mount_point),
            None => "-".to_string(),
        };
        VolumeRow {
            id: volume.id,
            name: volume.name,
            provider: volume.provider,
            size: format_size(volume.size_bytes),
            attached_to,
        }
    }
}

pub async fn create(
    name: String,
    provider: String,
    size: Option<String>,
    data: Option<PathBuf>,
    providers: &Providers,
    format: OutputFormat,
) -> Result<()> {
    let source = match (size, data) {
        (_, Some(path)) => VolumeSource::Image(path),
        (Some(size), None) => VolumeSource::Empty {
            size_mb: parse_size_mb(&size)?,
        },
        (None, None) => {
            return Err(UnikitError::InvalidInput(
                "either --size or --data is required".to_string(),
            ));
        }
    };

    let volume = providers.get(&provider)?.create_volume(&name, source).await?;
    if format.is_table() {
        print_success(&format!(
            "Volume {} ({}) created, {}",
            volume.name,
            volume.id,
            format_size(volume.size_bytes)
        ));
    } else {
        println!("{}", format.format(&volume));
    }
    Ok(())
}

pub async fn list(provider: Option<String>, providers: &Providers, format: OutputFormat) -> Result<()> {
    let mut volumes = Vec::new();
    for provider in selected(providers, provider.as_deref())? {
        volumes.extend(provider.list_volumes().await?);
    }

    if !format.is_table() {
        println!("{}", format.format(&volumes));
    } else if volumes.is_empty() {
        print_info("No volumes found. Run 'unikit create-volume <name> --size 1GB' to create one.");
    } else {
        let rows: Vec<VolumeRow> = volumes.into_iter().map(VolumeRow::from).collect();
        println!("{}", format.format_table(rows));
    }
    Ok(())
}

pub async fn attach(
    volume: String,
    instance: String,
    mount_point: String,
    providers: &Providers,
) -> Result<()> {
    let provider = providers.provider_for_volume(&volume).await?;
    // Volumes never move between backends.
    if providers.provider_for_instance(&instance).await?.name() != provider.name() {
        return Err(UnikitError::InvalidInput(format!(
            "volume {volume} and instance {instance} belong to different providers"
        )));
    }
    provider
        .attach_volume(&volume, &instance, &mount_point)
        .await?;
    print_success(&format!("Volume {volume} attached to {instance} at {mount_point}"));
    Ok(())
}

pub async fn detach(volume: String, providers: &Providers) -> Result<()> {
    let provider = providers.provider_for_volume(&volume).await?;
    provider.detach_volume(&volume).await?;
    print_success(&format!("Volume {volume} detached"));
    Ok(())
}
