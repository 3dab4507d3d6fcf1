use crate::compiler::{CompileParams, CompilerKey, Compilers};
use crate::error::Result;
use crate::provider::{Provider, StageOptions};
use crate::types::Image;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub name: String,
    pub compiler: CompilerKey,
    pub sources_dir: PathBuf,
    pub args: Vec<String>,
    pub force: bool,
    pub no_cleanup: bool,
}

/// Compiles `request.sources_dir` and stages the result on `provider`.
///
/// The compiler's artifact is removed afterwards whether or not staging
/// succeeded, unless `no_cleanup` is set.
pub async fn build_image(
    compilers: &Compilers,
    provider: &dyn Provider,
    request: BuildRequest,
) -> Result<Image> {
    let compiler = compilers.get(&request.compiler)?;

    info!(
        "Compiling {} with {} for provider {}",
        request.sources_dir.display(),
        request.compiler,
        provider.name()
    );
    let raw_image = compiler
        .compile(&CompileParams {
            sources_dir: request.sources_dir.clone(),
            args: request.args.clone(),
            no_cleanup: request.no_cleanup,
        })
        .await?;

    let artifact_path = raw_image.local_image_path.clone();
    let staged = provider
        .stage(
            &request.name,
            raw_image,
            StageOptions {
                force: request.force,
                no_cleanup: request.no_cleanup,
            },
        )
        .await;

    if request.no_cleanup {
        info!("Keeping build artifact {}", artifact_path.display());
    } else if let Err(e) = tokio::fs::remove_file(&artifact_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(
                "Failed to remove build artifact {}: {}",
                artifact_path.display(),
                e
            );
        }
    }

    staged
}
