use crate::error::{EntityKind, Result, UnikitError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const ROOT_MOUNT_POINT: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Raw,
    Qcow2,
    Vmdk,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Raw => "img",
            ImageFormat::Qcow2 => "qcow2",
            ImageFormat::Vmdk => "vmdk",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::Raw => write!(f, "raw"),
            ImageFormat::Qcow2 => write!(f, "qcow2"),
            ImageFormat::Vmdk => write!(f, "vmdk"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    Sata,
    Ide,
    Virtio,
    Scsi,
}

impl std::fmt::Display for StorageDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageDriver::Sata => write!(f, "sata"),
            StorageDriver::Ide => write!(f, "ide"),
            StorageDriver::Virtio => write!(f, "virtio"),
            StorageDriver::Scsi => write!(f, "scsi"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMapping {
    pub mount_point: String,
    pub device_name: String,
}

impl DeviceMapping {
    pub fn new(mount_point: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            mount_point: mount_point.into(),
            device_name: device_name.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.mount_point == ROOT_MOUNT_POINT
    }
}

/// Hints for the staging step. Providers may re-encode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub image_format: ImageFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub device_mappings: Vec<DeviceMapping>,
    pub storage_driver: StorageDriver,
    /// Megabytes.
    pub default_instance_memory: u64,
}

impl RunSpec {
    pub fn root_device(&self) -> Option<&DeviceMapping> {
        self.device_mappings.iter().find(|m| m.is_root())
    }

    pub fn device_for(&self, mount_point: &str) -> Option<&DeviceMapping> {
        self.device_mappings
            .iter()
            .find(|m| m.mount_point == mount_point)
    }

    /// Mount points a volume may be attached to, i.e. everything but the root.
    pub fn volume_mount_points(&self) -> impl Iterator<Item = &str> {
        self.device_mappings
            .iter()
            .filter(|m| !m.is_root())
            .map(|m| m.mount_point.as_str())
    }
}

/// Output of a compiler plugin, consumed once by a provider's staging step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawImage {
    pub local_image_path: PathBuf,
    pub stage_spec: StageSpec,
    pub run_spec: RunSpec,
}

impl RawImage {
    /// Checks the hand-off invariant: the artifact is a regular, readable file.
    pub fn validate(&self) -> Result<()> {
        let metadata = std::fs::metadata(&self.local_image_path).map_err(|e| {
            UnikitError::InvalidInput(format!(
                "artifact {} is not accessible: {e}",
                self.local_image_path.display()
            ))
        })?;

        if !metadata.is_file() {
            return Err(UnikitError::InvalidInput(format!(
                "artifact {} is not a regular file",
                self.local_image_path.display()
            )));
        }

        std::fs::File::open(&self.local_image_path).map_err(|e| {
            UnikitError::InvalidInput(format!(
                "artifact {} is not readable: {e}",
                self.local_image_path.display()
            ))
        })?;

        if self.run_spec.root_device().is_none() {
            return Err(UnikitError::InvalidInput(
                "artifact run spec has no root device mapping".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub size_bytes: u64,
    /// Provider-specific storage handle (file path, remote image id, ...).
    pub location: String,
    pub run_spec: RunSpec,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Pending,
    Running,
    Stopped,
    Terminated,
    Unknown,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Pending => write!(f, "pending"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Terminated => write!(f, "terminated"),
            InstanceState::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub image_id: String,
    pub state: InstanceState,
    /// Mount point -> volume id. The root device is implicit and never listed.
    pub mounts: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttachment {
    pub instance_id: String,
    pub mount_point: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub size_bytes: u64,
    pub source_image: Option<PathBuf>,
    pub attachment: Option<VolumeAttachment>,
    pub created_at: DateTime<Utc>,
}

impl Volume {
    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }
}

/// Entities that can be looked up by id, name or an unambiguous prefix of either.
pub trait Resolvable {
    const KIND: EntityKind;

    fn id(&self) -> &str;
    fn name(&self) -> &str;
}

impl Resolvable for Image {
    const KIND: EntityKind = EntityKind::Image;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Resolvable for Instance {
    const KIND: EntityKind = EntityKind::Instance;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Resolvable for Volume {
    const KIND: EntityKind = EntityKind::Volume;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}
