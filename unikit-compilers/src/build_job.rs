use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};
use unikit_core::{Result, UnikitError, with_deadline};

/// Where the sources directory appears inside a build job.
pub const PROJECT_MOUNT: &str = "/project_directory";

/// One invocation of an external build job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
    pub name: String,
    /// Host directory mounted at `PROJECT_MOUNT`. Outputs land here too.
    pub mounted_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub args: Vec<String>,
}

impl BuildJob {
    pub fn new(name: impl Into<String>, mounted_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            mounted_dir: mounted_dir.into(),
            env: BTreeMap::new(),
            args: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }
}

#[async_trait]
pub trait BuildJobRunner: Send + Sync {
    async fn run_build_job(&self, job: &BuildJob) -> Result<()>;
}

/// Runs build jobs as throwaway docker containers named after the job.
pub struct DockerBuildJobRunner {
    docker_binary: PathBuf,
    timeout: Option<Duration>,
}

impl DockerBuildJobRunner {
    pub fn new(docker_binary: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            docker_binary: docker_binary.into(),
            timeout,
        }
    }

    fn command_args(job: &BuildJob) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:{}", job.mounted_dir.display(), PROJECT_MOUNT),
        ];
        for (key, value) in &job.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(job.name.clone());
        args.extend(job.args.iter().cloned());
        args
    }
}

#[async_trait]
impl BuildJobRunner for DockerBuildJobRunner {
    async fn run_build_job(&self, job: &BuildJob) -> Result<()> {
        let args = Self::command_args(job);
        info!("Running build job {} on {}", job.name, job.mounted_dir.display());
        debug!("{} {}", self.docker_binary.display(), args.join(" "));

        let operation = format!("build job {}", job.name);
        let output = with_deadline(&operation, self.timeout, async {
            Command::new(&self.docker_binary)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| UnikitError::external("docker", &operation, e))
        })
        .await?;

        debug!(
            "Build job {} output:\n{}",
            job.name,
            String::from_utf8_lossy(&output.stdout)
        );

        if !output.status.success() {
            return Err(UnikitError::external(
                "docker",
                operation,
                format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_arguments() {
        let job = BuildJob::new("compilers-osv-nodejs", "/src/app")
            .with_env("NODE_MAIN_FILE", "app.js")
            .with_args(vec!["--verbose".to_string()]);

        assert_eq!(
            DockerBuildJobRunner::command_args(&job),
            vec![
                "run",
                "--rm",
                "-v",
                "/src/app:/project_directory",
                "-e",
                "NODE_MAIN_FILE=app.js",
                "compilers-osv-nodejs",
                "--verbose",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_docker_is_external_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = DockerBuildJobRunner::new(dir.path().join("no-docker"), None);
        let err = runner
            .run_build_job(&BuildJob::new("compilers-osv-nodejs", dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), unikit_core::ErrorKind::ExternalFailure);
    }
}
