use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub state_dir: PathBuf,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub docker_binary: PathBuf,
    /// Upper bound for a single external build job, in seconds.
    pub job_timeout_secs: Option<u64>,
    pub no_cleanup: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub qemu: Option<QemuConfig>,
    pub photon: Option<PhotonConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QemuConfig {
    pub qemu_binary: PathBuf,
    pub qemu_img_binary: PathBuf,
    pub use_partition_tables: bool,
    /// Accelerator passed to qemu, e.g. "kvm".
    pub accel: Option<String>,
    /// Overrides the image's default instance memory, in megabytes.
    pub memory_mb: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotonConfig {
    pub endpoint: String,
    pub project_id: String,
    pub access_token: Option<String>,
    pub vm_flavor: String,
    pub disk_flavor: String,
    pub task_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl BuildConfig {
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

impl PhotonConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> crate::Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)
                .map_err(|e| crate::UnikitError::ConfigError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> crate::Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> crate::Result<()> {
        if let Some(config_dir) = config_path.parent() {
            std::fs::create_dir_all(config_dir)?;
        }

        let content = serde_yaml::to_string(self)
            .map_err(|e| crate::UnikitError::ConfigError(e.to_string()))?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    fn config_path() -> crate::Result<PathBuf> {
        Ok(unikit_home()?.join("config.yaml"))
    }

    pub fn qemu_state_dir(&self) -> PathBuf {
        self.state_dir.join("qemu")
    }

    pub fn photon_state_dir(&self) -> PathBuf {
        self.state_dir.join("photon")
    }
}

fn unikit_home() -> crate::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| {
        crate::UnikitError::ConfigError("Cannot determine home directory".to_string())
    })?;
    Ok(home.join(".unikit"))
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            docker_binary: PathBuf::from("docker"),
            job_timeout_secs: Some(1800),
            no_cleanup: false,
        }
    }
}

impl Default for QemuConfig {
    fn default() -> Self {
        Self {
            qemu_binary: PathBuf::from("qemu-system-x86_64"),
            qemu_img_binary: PathBuf::from("qemu-img"),
            use_partition_tables: true,
            accel: None,
            memory_mb: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = unikit_home()
            .unwrap_or_else(|_| PathBuf::from(".unikit"))
            .join("state");

        Self {
            version: "1.0".to_string(),
            state_dir,
            build: BuildConfig::default(),
            providers: ProvidersConfig {
                qemu: Some(QemuConfig::default()),
                photon: None,
            },
        }
    }
}
