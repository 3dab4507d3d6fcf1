use crate::output::{OutputFormat, OutputFormatter, format_size, print_progress, print_success};
use std::path::PathBuf;
use unikit_core::{BuildRequest, CompilerKey, Config, Providers, Result, build_image};

pub struct BuildArgs {
    pub name: String,
    pub sources: PathBuf,
    pub provider: String,
    pub base: String,
    pub language: String,
    pub args: Vec<String>,
    pub force: bool,
    pub no_cleanup: bool,
}

pub async fn execute(
    args: BuildArgs,
    config: &Config,
    providers: &Providers,
    format: OutputFormat,
) -> Result<()> {
    let provider = providers.get(&args.provider)?;
    let compilers = unikit_compilers::default_compilers(&config.build);
    // Compilers are keyed by the backend they target.
    let compiler = CompilerKey::new(args.base, args.language, provider.name());

    print_progress(&format!(
        "Building {} from {} with {}",
        args.name,
        args.sources.display(),
        compiler
    ));

    let image = build_image(
        &compilers,
        provider.as_ref(),
        BuildRequest {
            name: args.name,
            compiler,
            sources_dir: args.sources,
            args: args.args,
            force: args.force,
            no_cleanup: args.no_cleanup,
        },
    )
    .await?;

    if format.is_table() {
        print_success(&format!(
            "Image {} ({}) staged on {}, {}",
            image.name,
            image.id,
            image.provider,
            format_size(image.size_bytes)
        ));
    } else {
        println!("{}", format.format(&image));
    }
    Ok(())
}
