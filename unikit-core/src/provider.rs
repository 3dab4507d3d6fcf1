use crate::error::Result;
use crate::types::{Image, Instance, RawImage, Volume};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Capability flags fixed when a provider is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub use_partition_tables: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageOptions {
    /// Replace an existing image with the same name.
    pub force: bool,
    /// Keep intermediate conversion files around for debugging.
    pub no_cleanup: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunInstanceParams {
    pub name: String,
    pub image_id: String,
    /// Mount point -> volume name or id.
    pub mounts: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum VolumeSource {
    /// Filesystem image copied into the volume.
    Image(PathBuf),
    /// Zeroed volume of the given size in megabytes.
    Empty { size_mb: u64 },
}

/// Lifecycle contract every backend implements.
///
/// Query operations accept a full id, a full name or an unambiguous prefix
/// of either.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn config(&self) -> ProviderConfig;

    // Images
    async fn stage(&self, name: &str, raw_image: RawImage, options: StageOptions) -> Result<Image>;
    async fn list_images(&self) -> Result<Vec<Image>>;
    async fn get_image(&self, name_or_id_prefix: &str) -> Result<Image>;
    async fn delete_image(&self, id: &str, force: bool) -> Result<()>;

    // Instances
    async fn run_instance(&self, params: RunInstanceParams) -> Result<Instance>;
    async fn list_instances(&self) -> Result<Vec<Instance>>;
    async fn get_instance(&self, name_or_id_prefix: &str) -> Result<Instance>;
    async fn delete_instance(&self, id: &str) -> Result<()>;
    async fn start_instance(&self, id: &str) -> Result<()>;
    async fn stop_instance(&self, id: &str) -> Result<()>;
    async fn get_instance_logs(&self, id: &str) -> Result<String>;

    // Volumes
    async fn create_volume(&self, name: &str, source: VolumeSource) -> Result<Volume>;
    async fn list_volumes(&self) -> Result<Vec<Volume>>;
    async fn get_volume(&self, name_or_id_prefix: &str) -> Result<Volume>;
    async fn delete_volume(&self, id: &str, force: bool) -> Result<()>;
    async fn attach_volume(&self, id: &str, instance_id: &str, mount_point: &str) -> Result<()>;
    async fn detach_volume(&self, id: &str) -> Result<()>;
}
