use crate::output::print_success;
use unikit_core::{Providers, Result};

pub async fn execute(instance: String, providers: &Providers) -> Result<()> {
    let provider = providers.provider_for_instance(&instance).await?;
    provider.stop_instance(&instance).await?;
    print_success(&format!("Instance {instance} stopped"));
    Ok(())
}
