mod build;
mod delete;
mod images;
mod instances;
mod logs;
mod providers;
mod run;
mod start;
mod stop;
mod volumes;

use clap::Subcommand;
use std::path::PathBuf;
use std::sync::Arc;
use unikit_core::{Config, Provider, Providers, Result};

use crate::output::OutputFormat;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a source directory and stage it as an image
    Build {
        /// Name of the image
        name: String,

        /// Directory containing the application sources and manifest
        #[arg(short, long, default_value = ".")]
        sources: PathBuf,

        /// Provider to stage the image on
        #[arg(short, long, default_value = "qemu")]
        provider: String,

        /// Unikernel base
        #[arg(long, default_value = "osv")]
        base: String,

        /// Language runtime
        #[arg(short, long, default_value = "nodejs")]
        language: String,

        /// Extra arguments for the build job
        #[arg(long = "arg")]
        args: Vec<String>,

        /// Replace an existing image with the same name
        #[arg(short, long)]
        force: bool,

        /// Keep intermediate build and staging files
        #[arg(long)]
        no_cleanup: bool,
    },

    /// List images
    Images {
        /// Only show images of this provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Delete an image
    Rmi {
        /// Image name, id or id prefix
        image: String,

        /// Also delete instances running the image
        #[arg(short, long)]
        force: bool,
    },

    /// Run an instance from an image
    Run {
        /// Image name, id or id prefix
        image: String,

        /// Name of the instance
        #[arg(short, long)]
        name: String,

        /// Volume mounts (format: /mount/point:volume)
        #[arg(short, long = "mount")]
        mounts: Vec<String>,

        /// Environment variables (format: KEY=VALUE)
        #[arg(short, long = "env")]
        env: Vec<String>,
    },

    /// List instances
    Instances {
        /// Only show instances of this provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Start a stopped instance
    Start {
        /// Instance name, id or id prefix
        instance: String,
    },

    /// Stop a running instance
    Stop {
        /// Instance name, id or id prefix
        instance: String,
    },

    /// Delete an instance
    Rm {
        /// Instance name, id or id prefix
        instance: String,
    },

    /// Show logs of an instance
    Logs {
        /// Instance name, id or id prefix
        instance: String,

        /// Number of lines to show from the end
        #[arg(short, long)]
        tail: Option<usize>,
    },

    /// Create a volume
    CreateVolume {
        /// Name of the volume
        name: String,

        /// Provider to create the volume on
        #[arg(short, long, default_value = "qemu")]
        provider: String,

        /// Size of an empty volume (e.g., 512MB, 2GB)
        #[arg(short, long, conflicts_with = "data")]
        size: Option<String>,

        /// Filesystem image to copy into the volume
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// List volumes
    Volumes {
        /// Only show volumes of this provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Delete a volume
    Rmv {
        /// Volume name, id or id prefix
        volume: String,

        /// Detach the volume first if it is attached
        #[arg(short, long)]
        force: bool,
    },

    /// Attach a volume to an instance
    Attach {
        /// Volume name, id or id prefix
        volume: String,

        /// Instance name, id or id prefix
        instance: String,

        /// Mount point declared by the instance's image
        #[arg(short, long)]
        mount_point: String,
    },

    /// Detach a volume from its instance
    Detach {
        /// Volume name, id or id prefix
        volume: String,
    },

    /// List configured providers and available compilers
    Providers,
}

pub async fn execute(command: Command, config: Config, format: OutputFormat) -> Result<()> {
    let providers = unikit_providers::build_providers(&config).await?;

    match command {
        Command::Build {
            name,
            sources,
            provider,
            base,
            language,
            args,
            force,
            no_cleanup,
        } => {
            let request = build::BuildArgs {
                name,
                sources,
                provider,
                base,
                language,
                args,
                force,
                no_cleanup: no_cleanup || config.build.no_cleanup,
            };
            build::execute(request, &config, &providers, format).await
        }
        Command::Images { provider } => images::execute(provider, &providers, format).await,
        Command::Rmi { image, force } => delete::image(image, force, &providers).await,
        Command::Run {
            image,
            name,
            mounts,
            env,
        } => run::execute(image, name, mounts, env, &providers, format).await,
        Command::Instances { provider } => instances::execute(provider, &providers, format).await,
        Command::Start { instance } => start::execute(instance, &providers).await,
        Command::Stop { instance } => stop::execute(instance, &providers).await,
        Command::Rm { instance } => delete::instance(instance, &providers).await,
        Command::Logs { instance, tail } => logs::execute(instance, tail, &providers).await,
        Command::CreateVolume {
            name,
            provider,
            size,
            data,
        } => volumes::create(name, provider, size, data, &providers, format).await,
        Command::Volumes { provider } => volumes::list(provider, &providers, format).await,
        Command::Rmv { volume, force } => delete::volume(volume, force, &providers).await,
        Command::Attach {
            volume,
            instance,
            mount_point,
        } => volumes::attach(volume, instance, mount_point, &providers).await,
        Command::Detach { volume } => volumes::detach(volume, &providers).await,
        Command::Providers => providers::execute(&config, &providers, format),
    }
}

/// Providers to query for a listing: one if named, otherwise all.
fn selected(providers: &Providers, name: Option<&str>) -> Result<Vec<Arc<dyn Provider>>> {
    match name {
        Some(name) => Ok(vec![providers.get(name)?]),
        None => Ok(providers.iter().cloned().collect()),
    }
}
