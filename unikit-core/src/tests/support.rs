use crate::{
    DeviceMapping, EntityKind, Image, ImageFormat, Instance, InstanceState, Provider,
    ProviderConfig, RawImage, Result, RunInstanceParams, RunSpec, StageOptions, StageSpec,
    StorageDriver, UnikitError, Volume, VolumeSource, resolve,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// In-memory provider used to exercise routing and the build pipeline.
pub struct MemoryProvider {
    name: String,
    images: Mutex<Vec<Image>>,
    instances: Mutex<Vec<Instance>>,
    volumes: Mutex<Vec<Volume>>,
    pub fail_stage: bool,
}

impl MemoryProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            images: Mutex::new(Vec::new()),
            instances: Mutex::new(Vec::new()),
            volumes: Mutex::new(Vec::new()),
            fail_stage: false,
        }
    }

    pub fn with_image(self, id: &str, name: &str) -> Self {
        self.images.lock().unwrap().push(Image {
            id: id.to_string(),
            name: name.to_string(),
            provider: self.name.clone(),
            size_bytes: 0,
            location: String::new(),
            run_spec: sample_run_spec(),
            created_at: Utc::now(),
        });
        self
    }

    pub fn with_instance(self, id: &str, name: &str) -> Self {
        self.instances.lock().unwrap().push(Instance {
            id: id.to_string(),
            name: name.to_string(),
            provider: self.name.clone(),
            image_id: String::new(),
            state: InstanceState::Running,
            mounts: BTreeMap::new(),
            env: BTreeMap::new(),
            ip_address: None,
            created_at: Utc::now(),
        });
        self
    }

    pub fn with_volume(self, id: &str, name: &str) -> Self {
        self.volumes.lock().unwrap().push(Volume {
            id: id.to_string(),
            name: name.to_string(),
            provider: self.name.clone(),
            size_bytes: 0,
            source_image: None,
            attachment: None,
            created_at: Utc::now(),
        });
        self
    }
}

pub fn sample_run_spec() -> RunSpec {
    RunSpec {
        device_mappings: vec![DeviceMapping::new("/", "/dev/sda1")],
        storage_driver: StorageDriver::Sata,
        default_instance_memory: 512,
    }
}

pub fn sample_raw_image(path: &Path) -> RawImage {
    RawImage {
        local_image_path: path.to_path_buf(),
        stage_spec: StageSpec {
            image_format: ImageFormat::Raw,
        },
        run_spec: sample_run_spec(),
    }
}

fn unsupported(operation: &str) -> UnikitError {
    UnikitError::external("memory", operation, "not supported by the memory provider")
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> ProviderConfig {
        ProviderConfig {
            use_partition_tables: true,
        }
    }

    async fn stage(&self, name: &str, raw_image: RawImage, options: StageOptions) -> Result<Image> {
        raw_image.validate()?;
        if self.fail_stage {
            return Err(unsupported("stage"));
        }
        let mut images = self.images.lock().unwrap();
        if let Some(pos) = images.iter().position(|i| i.name == name) {
            if !options.force {
                return Err(UnikitError::already_exists(EntityKind::Image, name));
            }
            images.remove(pos);
        }
        let image = Image {
            id: format!("mem-{}", images.len() + 1),
            name: name.to_string(),
            provider: self.name.clone(),
            size_bytes: std::fs::metadata(&raw_image.local_image_path)?.len(),
            location: String::new(),
            run_spec: raw_image.run_spec,
            created_at: Utc::now(),
        };
        images.push(image.clone());
        Ok(image)
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        Ok(self.images.lock().unwrap().clone())
    }

    async fn get_image(&self, name_or_id_prefix: &str) -> Result<Image> {
        resolve(self.list_images().await?, name_or_id_prefix)
    }

    async fn delete_image(&self, _id: &str, _force: bool) -> Result<()> {
        Err(unsupported("delete_image"))
    }

    async fn run_instance(&self, _params: RunInstanceParams) -> Result<Instance> {
        Err(unsupported("run_instance"))
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn get_instance(&self, name_or_id_prefix: &str) -> Result<Instance> {
        resolve(self.list_instances().await?, name_or_id_prefix)
    }

    async fn delete_instance(&self, _id: &str) -> Result<()> {
        Err(unsupported("delete_instance"))
    }

    async fn start_instance(&self, _id: &str) -> Result<()> {
        Err(unsupported("start_instance"))
    }

    async fn stop_instance(&self, _id: &str) -> Result<()> {
        Err(unsupported("stop_instance"))
    }

    async fn get_instance_logs(&self, _id: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn create_volume(&self, _name: &str, _source: VolumeSource) -> Result<Volume> {
        Err(unsupported("create_volume"))
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        Ok(self.volumes.lock().unwrap().clone())
    }

    async fn get_volume(&self, name_or_id_prefix: &str) -> Result<Volume> {
        resolve(self.list_volumes().await?, name_or_id_prefix)
    }

    async fn delete_volume(&self, _id: &str, _force: bool) -> Result<()> {
        Err(unsupported("delete_volume"))
    }

    async fn attach_volume(&self, _id: &str, _instance_id: &str, _mount_point: &str) -> Result<()> {
        Err(unsupported("attach_volume"))
    }

    async fn detach_volume(&self, _id: &str) -> Result<()> {
        Err(unsupported("detach_volume"))
    }
}
