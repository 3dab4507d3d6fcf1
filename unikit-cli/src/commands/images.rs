use super::selected;
use crate::output::{OutputFormat, OutputFormatter, format_size, print_info};
use serde::Serialize;
use tabled::Tabled;
use unikit_core::{Image, Providers, Result};

#[derive(Serialize, Tabled)]
struct ImageRow {
    id: String,
    name: String,
    provider: String,
    size: String,
    created: String,
}

impl From<Image> for ImageRow {
    fn from(image: Image) -> Self {
        ImageRow {
            id: image.id,
            name: image.name,
            provider: image.provider,
            size: format_size(image.size_bytes),
            created: image.created_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

pub async fn execute(
    provider: Option<String>,
    providers: &Providers,
    format: OutputFormat,
) -> Result<()> {
    let mut images = Vec::new();
    for provider in selected(providers, provider.as_deref())? {
        images.extend(provider.list_images().await?);
    }

    if !format.is_table() {
        println!("{}", format.format(&images));
    } else if images.is_empty() {
        print_info("No images found. Run 'unikit build <name>' to create one.");
    } else {
        let rows: Vec<ImageRow> = images.into_iter().map(ImageRow::from).collect();
        println!("{}", format.format_table(rows));
    }
    Ok(())
}
