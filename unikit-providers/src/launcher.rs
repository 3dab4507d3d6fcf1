use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use unikit_core::{ImageFormat, Result, StorageDriver, UnikitError};

/// A disk handed to the hypervisor, in boot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpec {
    pub path: PathBuf,
    pub format: ImageFormat,
}

/// Everything needed to boot one instance.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub instance_id: String,
    pub name: String,
    /// Root disk first, then attached volumes.
    pub disks: Vec<DiskSpec>,
    pub storage_driver: StorageDriver,
    pub memory_mb: u64,
    pub env: BTreeMap<String, String>,
    pub log_file: PathBuf,
    pub work_dir: PathBuf,
}

/// Starts and stops hypervisor processes.
#[async_trait]
pub trait VmLauncher: Send + Sync {
    /// Boots the instance and returns the hypervisor pid.
    async fn launch(&self, spec: &LaunchSpec) -> Result<u32>;
    async fn terminate(&self, pid: u32) -> Result<()>;
    fn is_alive(&self, pid: u32) -> bool;
}

const ENV_FW_CFG_NAME: &str = "opt/unikit/env";
const STARTUP_GRACE: Duration = Duration::from_millis(300);
const SHUTDOWN_POLLS: u32 = 50;
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launches `qemu-system-*` processes detached from the caller.
pub struct QemuLauncher {
    qemu_binary: PathBuf,
    accel: Option<String>,
}

impl QemuLauncher {
    pub fn new(qemu_binary: PathBuf, accel: Option<String>) -> Self {
        let qemu_binary = which::which(&qemu_binary).unwrap_or(qemu_binary);
        Self { qemu_binary, accel }
    }

    fn env_file_contents(env: &BTreeMap<String, String>) -> String {
        env.iter().map(|(k, v)| format!("{k}={v}\n")).collect()
    }

    pub fn command_args(&self, spec: &LaunchSpec, env_file: Option<&PathBuf>) -> Vec<String> {
        let mut args = vec![
            "-name".to_string(),
            spec.name.clone(),
            "-m".to_string(),
            spec.memory_mb.to_string(),
            "-display".to_string(),
            "none".to_string(),
            "-no-reboot".to_string(),
            "-chardev".to_string(),
            format!("file,id=serial0,path={},append=on", spec.log_file.display()),
            "-serial".to_string(),
            "chardev:serial0".to_string(),
        ];
        if let Some(accel) = &self.accel {
            args.push("-accel".to_string());
            args.push(accel.clone());
        }
        args.extend(drive_args(spec.storage_driver, &spec.disks));
        if let Some(env_file) = env_file {
            args.push("-fw_cfg".to_string());
            args.push(format!("name={ENV_FW_CFG_NAME},file={}", env_file.display()));
        }
        args
    }
}

/// Maps disks onto qemu drive options for the given storage driver.
pub fn drive_args(driver: StorageDriver, disks: &[DiskSpec]) -> Vec<String> {
    let mut args = Vec::new();
    match driver {
        StorageDriver::Virtio | StorageDriver::Ide => {
            let interface = if driver == StorageDriver::Virtio {
                "virtio"
            } else {
                "ide"
            };
            for disk in disks {
                args.push("-drive".to_string());
                args.push(format!(
                    "file={},format={},if={interface}",
                    disk.path.display(),
                    disk.format
                ));
            }
        }
        StorageDriver::Sata | StorageDriver::Scsi => {
            let (controller, device, bus) = if driver == StorageDriver::Sata {
                ("ahci,id=ahci0", "ide-hd", "ahci0")
            } else {
                ("virtio-scsi-pci,id=scsi0", "scsi-hd", "scsi0")
            };
            args.push("-device".to_string());
            args.push(controller.to_string());
            for (index, disk) in disks.iter().enumerate() {
                args.push("-drive".to_string());
                args.push(format!(
                    "file={},format={},if=none,id=disk{index}",
                    disk.path.display(),
                    disk.format
                ));
                let bus_slot = if driver == StorageDriver::Sata {
                    format!("{bus}.{index}")
                } else {
                    format!("{bus}.0")
                };
                args.push("-device".to_string());
                args.push(format!("{device},drive=disk{index},bus={bus_slot}"));
            }
        }
    }
    args
}

#[async_trait]
impl VmLauncher for QemuLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        tokio::fs::create_dir_all(&spec.work_dir).await?;

        let env_file = if spec.env.is_empty() {
            None
        } else {
            let path = spec.work_dir.join("env");
            tokio::fs::write(&path, Self::env_file_contents(&spec.env)).await?;
            Some(path)
        };

        let args = self.command_args(spec, env_file.as_ref());
        info!("Starting {} for instance {}", self.qemu_binary.display(), spec.name);
        debug!("{} {}", self.qemu_binary.display(), args.join(" "));

        // qemu outlives this call; its stderr joins the serial log.
        let stderr = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_file)?;
        let mut child = Command::new(&self.qemu_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| UnikitError::external("qemu", "launch", e))?;

        let pid = child
            .id()
            .ok_or_else(|| UnikitError::external("qemu", "launch", "process exited immediately"))?;

        // Argument and disk errors make qemu exit right away.
        tokio::time::sleep(STARTUP_GRACE).await;
        if let Some(status) = child
            .try_wait()
            .map_err(|e| UnikitError::external("qemu", "launch", e))?
        {
            return Err(UnikitError::external(
                "qemu",
                "launch",
                format!("exited with {status}, see {}", spec.log_file.display()),
            ));
        }

        Ok(pid)
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        let target = Pid::from_raw(pid as i32);
        match signal::kill(target, Signal::SIGTERM) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => return Ok(()),
            Err(e) => return Err(UnikitError::external("qemu", "terminate", e)),
        }

        for _ in 0..SHUTDOWN_POLLS {
            if !self.is_alive(pid) {
                return Ok(());
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        warn!("qemu process {} ignored SIGTERM, killing", pid);
        match signal::kill(target, Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(UnikitError::external("qemu", "terminate", e)),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        signal::kill(Pid::from_raw(pid as i32), None::<Signal>).is_ok()
    }
}
