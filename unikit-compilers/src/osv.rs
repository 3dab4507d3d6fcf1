//! OSv unikernel compilers.
//!
//! The heavy lifting happens inside a build job image; this side validates the
//! manifest, runs the job and wraps its `boot.qcow2` output into a `RawImage`
//! carrying the run defaults of the selected target.

use crate::build_job::{BuildJob, BuildJobRunner};
use crate::manifest::NodeManifest;
use async_trait::async_trait;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use unikit_core::{
    CompileParams, Compiler, CompilerKey, Compilers, DeviceMapping, ImageFormat, RawImage, Result,
    RunSpec, StageSpec, StorageDriver, UnikitError,
};
use unikit_storage::{TempArtifact, move_file};

pub const OSV_BASE: &str = "osv";
pub const NODEJS_LANGUAGE: &str = "nodejs";
pub const OSV_NODEJS_JOB: &str = "compilers-osv-nodejs";
/// File the build job leaves at the root of the mounted sources.
pub const OSV_OUTPUT_FILE: &str = "boot.qcow2";
pub const OSV_DEFAULT_MEMORY_MB: u64 = 512;

/// Backend an OSv image is compiled for. Decides the run defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsvTarget {
    Virtualbox,
    Qemu,
    Photon,
}

impl OsvTarget {
    pub const ALL: [OsvTarget; 3] = [OsvTarget::Virtualbox, OsvTarget::Qemu, OsvTarget::Photon];

    pub fn as_str(&self) -> &'static str {
        match self {
            OsvTarget::Virtualbox => "virtualbox",
            OsvTarget::Qemu => "qemu",
            OsvTarget::Photon => "photon",
        }
    }

    fn root_device(&self) -> &'static str {
        match self {
            OsvTarget::Qemu => "/dev/vda1",
            OsvTarget::Virtualbox | OsvTarget::Photon => "/dev/sda1",
        }
    }

    fn storage_driver(&self) -> StorageDriver {
        match self {
            OsvTarget::Virtualbox => StorageDriver::Sata,
            OsvTarget::Qemu => StorageDriver::Virtio,
            OsvTarget::Photon => StorageDriver::Scsi,
        }
    }

    pub fn run_spec(&self) -> RunSpec {
        RunSpec {
            device_mappings: vec![DeviceMapping::new("/", self.root_device())],
            storage_driver: self.storage_driver(),
            default_instance_memory: OSV_DEFAULT_MEMORY_MB,
        }
    }

    /// The build job always produces qcow2; providers re-encode as they need.
    pub fn stage_spec(&self) -> StageSpec {
        StageSpec {
            image_format: ImageFormat::Qcow2,
        }
    }
}

impl FromStr for OsvTarget {
    type Err = UnikitError;

    fn from_str(s: &str) -> Result<Self> {
        OsvTarget::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnikitError::InvalidInput(format!("unknown OSv target: {s}")))
    }
}

pub struct OsvNodeCompiler {
    runner: Arc<dyn BuildJobRunner>,
    target: OsvTarget,
    artifact_dir: PathBuf,
}

impl OsvNodeCompiler {
    pub fn new(runner: Arc<dyn BuildJobRunner>, target: OsvTarget) -> Self {
        Self {
            runner,
            target,
            artifact_dir: std::env::temp_dir(),
        }
    }

    /// Directory the `osv-boot.*` artifacts are created in. Defaults to the
    /// system temp directory.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    pub fn key(&self) -> CompilerKey {
        CompilerKey::new(OSV_BASE, NODEJS_LANGUAGE, self.target.as_str())
    }
}

#[async_trait]
impl Compiler for OsvNodeCompiler {
    async fn compile(&self, params: &CompileParams) -> Result<RawImage> {
        let sources_dir = &params.sources_dir;
        let manifest = NodeManifest::load(sources_dir).await?;

        let job = BuildJob::new(OSV_NODEJS_JOB, sources_dir.clone())
            .with_env("NODE_MAIN_FILE", manifest.main_file.clone())
            .with_args(params.args.iter().cloned());
        info!(
            "Compiling {} ({}) for {}",
            sources_dir.display(),
            manifest.main_file,
            self.target.as_str()
        );
        self.runner.run_build_job(&job).await?;

        let output = sources_dir.join(OSV_OUTPUT_FILE);
        if !tokio::fs::try_exists(&output).await? {
            return Err(UnikitError::external(
                OSV_NODEJS_JOB,
                "compile",
                format!("build job produced no {}", output.display()),
            ));
        }

        let artifact = TempArtifact::new_in(&self.artifact_dir, "osv-boot", params.no_cleanup)?;
        move_file(&output, artifact.path()).await?;
        let local_image_path = artifact.keep();
        debug!("OSv image ready at {}", local_image_path.display());

        Ok(RawImage {
            local_image_path,
            stage_spec: self.target.stage_spec(),
            run_spec: self.target.run_spec(),
        })
    }
}

/// Registers the OSv Node.js compiler for every supported target.
pub fn register_osv_compilers(compilers: &mut Compilers, runner: Arc<dyn BuildJobRunner>) {
    for target in OsvTarget::ALL {
        let compiler = OsvNodeCompiler::new(runner.clone(), target);
        compilers.register(compiler.key(), Arc::new(compiler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_defaults() {
        let qemu = OsvTarget::Qemu.run_spec();
        assert_eq!(qemu.storage_driver, StorageDriver::Virtio);
        assert_eq!(qemu.root_device().unwrap().device_name, "/dev/vda1");
        assert_eq!(qemu.default_instance_memory, 512);

        let vbox = OsvTarget::Virtualbox.run_spec();
        assert_eq!(vbox.storage_driver, StorageDriver::Sata);
        assert_eq!(vbox.root_device().unwrap().device_name, "/dev/sda1");

        assert_eq!(OsvTarget::Photon.run_spec().storage_driver, StorageDriver::Scsi);
        assert_eq!(OsvTarget::Photon.run_spec().device_mappings.len(), 1);
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("qemu".parse::<OsvTarget>().unwrap(), OsvTarget::Qemu);
        assert!("xen".parse::<OsvTarget>().is_err());
    }
}
