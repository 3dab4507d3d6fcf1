use crate::output::print_success;
use unikit_core::{Providers, Result};

pub async fn image(image: String, force: bool, providers: &Providers) -> Result<()> {
    let provider = providers.provider_for_image(&image).await?;
    provider.delete_image(&image, force).await?;
    print_success(&format!("Image {image} deleted"));
    Ok(())
}

pub async fn instance(instance: String, providers: &Providers) -> Result<()> {
    let provider = providers.provider_for_instance(&instance).await?;
    provider.delete_instance(&instance).await?;
    print_success(&format!("Instance {instance} deleted"));
    Ok(())
}

pub async fn volume(volume: String, force: bool, providers: &Providers) -> Result<()> {
    let provider = providers.provider_for_volume(&volume).await?;
    provider.delete_volume(&volume, force).await?;
    print_success(&format!("Volume {volume} deleted"));
    Ok(())
}
