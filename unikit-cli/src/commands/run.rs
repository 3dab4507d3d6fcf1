use crate::output::{OutputFormat, OutputFormatter, print_progress, print_success};
use crate::utils::{parse_env_vars, parse_mounts};
use unikit_core::{Providers, Result, RunInstanceParams};

pub async fn execute(
    image: String,
    name: String,
    mounts: Vec<String>,
    env: Vec<String>,
    providers: &Providers,
    format: OutputFormat,
) -> Result<()> {
    let params = RunInstanceParams {
        name,
        image_id: image,
        mounts: parse_mounts(&mounts)?,
        env: parse_env_vars(&env)?,
    };

    let provider = providers.provider_for_image(&params.image_id).await?;
    print_progress(&format!(
        "Starting {} from image {} on {}",
        params.name,
        params.image_id,
        provider.name()
    ));
    let instance = provider.run_instance(params).await?;

    if format.is_table() {
        print_success(&format!("Instance {} ({}) is {}", instance.name, instance.id, instance.state));
    } else {
        println!("{}", format.format(&instance));
    }
    Ok(())
}
