pub mod build_job;
pub mod manifest;
pub mod osv;

pub use build_job::{BuildJob, BuildJobRunner, DockerBuildJobRunner, PROJECT_MOUNT};
pub use manifest::{MANIFEST_FILE, NodeManifest, load_manifest};
pub use osv::{OsvNodeCompiler, OsvTarget, register_osv_compilers};

use std::sync::Arc;
use unikit_core::{BuildConfig, Compilers};

/// Every compiler this crate ships, with build jobs run through docker.
pub fn default_compilers(build: &BuildConfig) -> Compilers {
    let runner = Arc::new(DockerBuildJobRunner::new(
        build.docker_binary.clone(),
        build.job_timeout(),
    ));
    let mut compilers = Compilers::new();
    register_osv_compilers(&mut compilers, runner);
    compilers
}
