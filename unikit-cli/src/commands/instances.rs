use super::selected;
use crate::output::{OutputFormat, OutputFormatter, print_info, state_cell};
use serde::Serialize;
use tabled::Tabled;
use unikit_core::{Instance, Providers, Result};

#[derive(Serialize, Tabled)]
struct InstanceRow {
    id: String,
    name: String,
    provider: String,
    state: String,
    image: String,
    mounts: String,
    uptime: String,
}

impl InstanceRow {
    fn new(instance: Instance, format: OutputFormat) -> Self {
        let uptime = if instance.state == unikit_core::InstanceState::Running {
            let duration = chrono::Utc::now() - instance.created_at;
            format_duration(duration.to_std().unwrap_or_default())
        } else {
            "-".to_string()
        };
        let mounts = if instance.mounts.is_empty() {
            "-".to_string()
        } else {
            instance
                .mounts
                .iter()
                .map(|(mount, volume)| format!("{mount}:{volume}"))
                .collect::<Vec<_>>()
                .join(", ")
        };

        InstanceRow {
            id: instance.id,
            name: instance.name,
            provider: instance.provider,
            state: state_cell(instance.state, format),
            image: instance.image_id,
            mounts,
            uptime,
        }
    }
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

pub async fn execute(
    provider: Option<String>,
    providers: &Providers,
    format: OutputFormat,
) -> Result<()> {
    let mut instances = Vec::new();
    for provider in selected(providers, provider.as_deref())? {
        instances.extend(provider.list_instances().await?);
    }

    if !format.is_table() {
        println!("{}", format.format(&instances));
    } else if instances.is_empty() {
        print_info("No instances found. Run 'unikit run <image> --name <name>' to start one.");
    } else {
        let rows: Vec<InstanceRow> = instances
            .into_iter()
            .map(|i| InstanceRow::new(i, format))
            .collect();
        println!("{}", format.format_table(rows));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(3 * 60)), "3m");
        assert_eq!(format_duration(Duration::from_secs(3600 + 120)), "1h 2m");
        assert_eq!(format_duration(Duration::from_secs(2 * 86400 + 3600)), "2d 1h");
    }
}
