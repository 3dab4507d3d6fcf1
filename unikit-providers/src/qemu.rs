//! Bare-hypervisor backend: images and volumes are files under the state
//! directory, instances are qemu processes.
//!
//! ```text
//! <state>/qemu/images.json
//! <state>/qemu/instances.json
//! <state>/qemu/volumes.json
//! <state>/qemu/images/<id>/boot.qcow2
//! <state>/qemu/instances/<id>/serial.log
//! <state>/qemu/volumes/<id>.img
//! <state>/qemu/tmp/
//! ```

use crate::launcher::{DiskSpec, LaunchSpec, QemuLauncher, VmLauncher};
use crate::staging::{prepare_disk, run_spec_for_layout};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use unikit_core::{
    EntityKind, Image, ImageFormat, Instance, InstanceLogger, InstanceState, Provider,
    ProviderConfig, QemuConfig, RawImage, Result, RunInstanceParams, StageOptions, UnikitError,
    Volume, VolumeAttachment, VolumeSource, resolve,
};
use unikit_storage::{DiskConverter, JsonStore, QemuImgConverter, remove_volume_file, write_volume_file};
use uuid::Uuid;

pub const QEMU_PROVIDER: &str = "qemu";
const BOOT_DISK: &str = "boot.qcow2";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceRecord {
    #[serde(flatten)]
    instance: Instance,
    pid: Option<u32>,
}

pub struct QemuProvider {
    state_dir: PathBuf,
    config: QemuConfig,
    converter: Arc<dyn DiskConverter>,
    launcher: Arc<dyn VmLauncher>,
    images: JsonStore<Image>,
    instances: JsonStore<InstanceRecord>,
    volumes: JsonStore<Volume>,
}

impl QemuProvider {
    /// Provider using the real `qemu-img` and `qemu-system-*` binaries.
    pub async fn new(state_dir: PathBuf, config: QemuConfig) -> Result<Self> {
        let converter = Arc::new(QemuImgConverter::new(config.qemu_img_binary.clone()));
        let launcher = Arc::new(QemuLauncher::new(
            config.qemu_binary.clone(),
            config.accel.clone(),
        ));
        Self::with_backends(state_dir, config, converter, launcher).await
    }

    pub async fn with_backends(
        state_dir: PathBuf,
        config: QemuConfig,
        converter: Arc<dyn DiskConverter>,
        launcher: Arc<dyn VmLauncher>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&state_dir).await?;
        let images = JsonStore::open(state_dir.join("images.json")).await?;
        let instances = JsonStore::open(state_dir.join("instances.json")).await?;
        let volumes = JsonStore::open(state_dir.join("volumes.json")).await?;
        debug!("QEMU provider state at {}", state_dir.display());

        Ok(Self {
            state_dir,
            config,
            converter,
            launcher,
            images,
            instances,
            volumes,
        })
    }

    fn image_dir(&self, id: &str) -> PathBuf {
        self.state_dir.join("images").join(id)
    }

    fn instance_dir(&self, id: &str) -> PathBuf {
        self.state_dir.join("instances").join(id)
    }

    fn volume_path(&self, id: &str) -> PathBuf {
        self.state_dir.join("volumes").join(format!("{id}.img"))
    }

    fn work_dir(&self) -> PathBuf {
        self.state_dir.join("tmp")
    }

    fn logger(&self, instance: &Instance) -> InstanceLogger {
        InstanceLogger::new(
            instance.name.clone(),
            self.instance_dir(&instance.id).join("serial.log"),
        )
    }

    /// Current view of a record: a running instance whose process is gone
    /// is reported as stopped.
    fn observed(&self, record: &InstanceRecord) -> Instance {
        let mut instance = record.instance.clone();
        if instance.state == InstanceState::Running
            && !record.pid.is_some_and(|pid| self.launcher.is_alive(pid))
        {
            instance.state = InstanceState::Stopped;
        }
        instance
    }

    async fn instance_record(&self, name_or_id_prefix: &str) -> Result<InstanceRecord> {
        let instance = self.get_instance(name_or_id_prefix).await?;
        self.instances
            .get(&instance.id)
            .await
            .ok_or_else(|| UnikitError::not_found(EntityKind::Instance, name_or_id_prefix))
    }

    fn running_pid(&self, record: &InstanceRecord) -> Option<u32> {
        record.pid.filter(|pid| self.launcher.is_alive(*pid))
    }

    async fn launch_spec(&self, instance: &Instance) -> Result<LaunchSpec> {
        let image = self
            .images
            .get(&instance.image_id)
            .await
            .ok_or_else(|| UnikitError::not_found(EntityKind::Image, &instance.image_id))?;

        let mut disks = vec![DiskSpec {
            path: PathBuf::from(&image.location),
            format: ImageFormat::Qcow2,
        }];
        for mapping in &image.run_spec.device_mappings {
            if let Some(volume_id) = instance.mounts.get(&mapping.mount_point) {
                disks.push(DiskSpec {
                    path: self.volume_path(volume_id),
                    format: ImageFormat::Raw,
                });
            }
        }

        Ok(LaunchSpec {
            instance_id: instance.id.clone(),
            name: instance.name.clone(),
            disks,
            storage_driver: image.run_spec.storage_driver,
            memory_mb: self
                .config
                .memory_mb
                .unwrap_or(image.run_spec.default_instance_memory),
            env: instance.env.clone(),
            log_file: self.logger(instance).path().to_path_buf(),
            work_dir: self.instance_dir(&instance.id),
        })
    }

    /// Boots `instance` and records it as running.
    async fn boot(&self, instance: &Instance) -> Result<()> {
        let logger = self.logger(instance);
        logger.init().await?;
        logger.info("Starting instance").await?;

        let spec = self.launch_spec(instance).await?;
        let pid = self.launcher.launch(&spec).await?;
        info!("Instance {} running as pid {}", instance.name, pid);

        let recorded = self
            .instances
            .update(|records| {
                let record = records
                    .get_mut(&instance.id)
                    .ok_or_else(|| UnikitError::not_found(EntityKind::Instance, &instance.id))?;
                record.instance.state = InstanceState::Running;
                record.pid = Some(pid);
                Ok(())
            })
            .await;

        if let Err(e) = recorded {
            if let Err(kill_err) = self.launcher.terminate(pid).await {
                warn!("Failed to terminate unrecorded pid {}: {}", pid, kill_err);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn set_stopped(&self, id: &str) -> Result<()> {
        self.instances
            .update(|records| {
                if let Some(record) = records.get_mut(id) {
                    record.instance.state = InstanceState::Stopped;
                    record.pid = None;
                }
                Ok(())
            })
            .await
    }

    /// Marks `volume_id` attached, failing if it already is.
    async fn record_attachment(&self, volume_id: &str, instance_id: &str, mount_point: &str) -> Result<()> {
        self.volumes
            .update(|volumes| {
                let volume = volumes
                    .get_mut(volume_id)
                    .ok_or_else(|| UnikitError::not_found(EntityKind::Volume, volume_id))?;
                if let Some(attachment) = &volume.attachment {
                    return Err(UnikitError::conflict(
                        EntityKind::Volume,
                        volume_id,
                        format!("already attached to instance {}", attachment.instance_id),
                    ));
                }
                volume.attachment = Some(VolumeAttachment {
                    instance_id: instance_id.to_string(),
                    mount_point: mount_point.to_string(),
                });
                Ok(())
            })
            .await
    }

    /// A running qemu process keeps its volume files open until it exits.
    async fn ensure_not_in_use(&self, volume: &Volume, attachment: &VolumeAttachment) -> Result<()> {
        let Some(record) = self.instances.get(&attachment.instance_id).await else {
            return Ok(());
        };
        if self.running_pid(&record).is_some() {
            return Err(UnikitError::conflict(
                EntityKind::Volume,
                &volume.id,
                format!(
                    "in use by running instance {}; stop it first",
                    record.instance.name
                ),
            ));
        }
        Ok(())
    }

    async fn clear_attachment(&self, volume_id: &str) -> Result<()> {
        self.volumes
            .update(|volumes| {
                if let Some(volume) = volumes.get_mut(volume_id) {
                    volume.attachment = None;
                }
                Ok(())
            })
            .await
    }

    /// Undoes a partially created instance. Failures are logged only.
    async fn roll_back_instance(&self, instance_id: &str, attached: &[String]) {
        for volume_id in attached {
            if let Err(e) = self.clear_attachment(volume_id).await {
                warn!("Failed to roll back attachment of volume {}: {}", volume_id, e);
            }
        }
        if let Err(e) = self.instances.remove(instance_id).await {
            warn!("Failed to remove instance record {}: {}", instance_id, e);
        }
        if let Err(e) = tokio::fs::remove_dir_all(self.instance_dir(instance_id)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove instance dir {}: {}", instance_id, e);
            }
        }
    }

    async fn attach_all(&self, instance: &Instance, attached: &mut Vec<String>) -> Result<()> {
        for (mount_point, volume_id) in &instance.mounts {
            self.record_attachment(volume_id, &instance.id, mount_point)
                .await?;
            attached.push(volume_id.clone());
        }
        Ok(())
    }

    async fn persist_image(&self, image: &Image, disk: unikit_storage::TempArtifact) -> Result<()> {
        let image_dir = self.image_dir(&image.id);
        tokio::fs::create_dir_all(&image_dir).await?;
        disk.persist(Path::new(&image.location)).await?;
        self.images.insert(&image.id, image.clone()).await
    }

    async fn remove_image_dir(&self, id: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.image_dir(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Provider for QemuProvider {
    fn name(&self) -> &str {
        QEMU_PROVIDER
    }

    fn config(&self) -> ProviderConfig {
        ProviderConfig {
            use_partition_tables: self.config.use_partition_tables,
        }
    }

    async fn stage(&self, name: &str, raw_image: RawImage, options: StageOptions) -> Result<Image> {
        if name.is_empty() {
            return Err(UnikitError::InvalidInput("image name must not be empty".to_string()));
        }
        raw_image.validate()?;

        let existing = self
            .images
            .values()
            .await
            .into_iter()
            .find(|image| image.name == name);
        if let Some(existing) = existing {
            if !options.force {
                return Err(UnikitError::already_exists(EntityKind::Image, name));
            }
            info!("Replacing image {} ({})", name, existing.id);
            self.delete_image(&existing.id, true).await?;
        }

        let partitioned = self.config.use_partition_tables;
        let disk = prepare_disk(
            self.converter.as_ref(),
            &raw_image,
            partitioned,
            ImageFormat::Qcow2,
            &self.work_dir(),
            options.no_cleanup,
        )
        .await?;

        let id = Uuid::new_v4().to_string();
        let location = self.image_dir(&id).join(BOOT_DISK);
        let size_bytes = tokio::fs::metadata(disk.path()).await?.len();
        let image = Image {
            id: id.clone(),
            name: name.to_string(),
            provider: QEMU_PROVIDER.to_string(),
            size_bytes,
            location: location.display().to_string(),
            run_spec: run_spec_for_layout(&raw_image.run_spec, partitioned),
            created_at: Utc::now(),
        };

        if let Err(e) = self.persist_image(&image, disk).await {
            if let Err(cleanup_err) = self.remove_image_dir(&id).await {
                warn!("Failed to clean up image dir {}: {}", id, cleanup_err);
            }
            return Err(e);
        }

        info!("Staged image {} ({})", image.name, image.id);
        Ok(image)
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        Ok(self.images.values().await)
    }

    async fn get_image(&self, name_or_id_prefix: &str) -> Result<Image> {
        resolve(self.images.values().await, name_or_id_prefix)
    }

    async fn delete_image(&self, id: &str, force: bool) -> Result<()> {
        let image = self.get_image(id).await?;

        let dependents: Vec<Instance> = self
            .instances
            .values()
            .await
            .into_iter()
            .map(|record| record.instance)
            .filter(|instance| instance.image_id == image.id)
            .collect();
        if !dependents.is_empty() {
            if !force {
                let names: Vec<&str> = dependents.iter().map(|i| i.name.as_str()).collect();
                return Err(UnikitError::conflict(
                    EntityKind::Image,
                    &image.id,
                    format!("used by instances: {}", names.join(", ")),
                ));
            }
            for instance in &dependents {
                self.delete_instance(&instance.id).await?;
            }
        }

        self.remove_image_dir(&image.id).await?;
        self.images.remove(&image.id).await?;
        info!("Deleted image {} ({})", image.name, image.id);
        Ok(())
    }

    async fn run_instance(&self, params: RunInstanceParams) -> Result<Instance> {
        if params.name.is_empty() {
            return Err(UnikitError::InvalidInput(
                "instance name must not be empty".to_string(),
            ));
        }
        let image = self.get_image(&params.image_id).await?;
        if self
            .instances
            .values()
            .await
            .iter()
            .any(|record| record.instance.name == params.name)
        {
            return Err(UnikitError::already_exists(EntityKind::Instance, &params.name));
        }

        let mut mounts = BTreeMap::new();
        for (mount_point, volume_query) in &params.mounts {
            let allowed = image
                .run_spec
                .volume_mount_points()
                .any(|m| m == mount_point);
            if !allowed {
                return Err(UnikitError::InvalidInput(format!(
                    "image {} has no volume mount point {}",
                    image.name, mount_point
                )));
            }
            let volume = self.get_volume(volume_query).await?;
            if let Some(attachment) = &volume.attachment {
                return Err(UnikitError::conflict(
                    EntityKind::Volume,
                    &volume.id,
                    format!("already attached to instance {}", attachment.instance_id),
                ));
            }
            if mounts.values().any(|id| id == &volume.id) {
                return Err(UnikitError::conflict(
                    EntityKind::Volume,
                    &volume.id,
                    "requested at more than one mount point",
                ));
            }
            mounts.insert(mount_point.clone(), volume.id);
        }

        let instance = Instance {
            id: Uuid::new_v4().to_string(),
            name: params.name.clone(),
            provider: QEMU_PROVIDER.to_string(),
            image_id: image.id.clone(),
            state: InstanceState::Pending,
            mounts,
            env: params.env,
            ip_address: None,
            created_at: Utc::now(),
        };
        self.instances
            .insert(
                &instance.id,
                InstanceRecord {
                    instance: instance.clone(),
                    pid: None,
                },
            )
            .await?;

        let mut attached = Vec::new();
        let started = match self.attach_all(&instance, &mut attached).await {
            Ok(()) => self.boot(&instance).await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            warn!("Instance {} failed to start: {}", instance.name, e);
            self.roll_back_instance(&instance.id, &attached).await;
            return Err(e);
        }

        info!("Instance {} ({}) is running", instance.name, instance.id);
        self.get_instance(&instance.id).await
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        Ok(self
            .instances
            .values()
            .await
            .iter()
            .map(|record| self.observed(record))
            .collect())
    }

    async fn get_instance(&self, name_or_id_prefix: &str) -> Result<Instance> {
        resolve(self.list_instances().await?, name_or_id_prefix)
    }

    async fn delete_instance(&self, id: &str) -> Result<()> {
        let record = self.instance_record(id).await?;
        let instance = &record.instance;

        if let Some(pid) = self.running_pid(&record) {
            self.launcher.terminate(pid).await?;
        }

        let volume_ids: Vec<String> = self
            .volumes
            .values()
            .await
            .into_iter()
            .filter(|v| {
                v.attachment
                    .as_ref()
                    .is_some_and(|a| a.instance_id == instance.id)
            })
            .map(|v| v.id)
            .collect();
        for volume_id in &volume_ids {
            self.clear_attachment(volume_id).await?;
        }

        self.instances.remove(&instance.id).await?;
        if let Err(e) = tokio::fs::remove_dir_all(self.instance_dir(&instance.id)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove instance dir {}: {}", instance.id, e);
            }
        }
        info!("Deleted instance {} ({})", instance.name, instance.id);
        Ok(())
    }

    async fn start_instance(&self, id: &str) -> Result<()> {
        let record = self.instance_record(id).await?;
        if self.running_pid(&record).is_some() {
            debug!("Instance {} is already running", record.instance.name);
            return Ok(());
        }
        self.boot(&record.instance).await
    }

    async fn stop_instance(&self, id: &str) -> Result<()> {
        let record = self.instance_record(id).await?;
        match self.running_pid(&record) {
            Some(pid) => {
                self.launcher.terminate(pid).await?;
                self.logger(&record.instance).info("Stopped instance").await?;
                info!("Stopped instance {}", record.instance.name);
            }
            None => debug!("Instance {} is not running", record.instance.name),
        }
        self.set_stopped(&record.instance.id).await
    }

    async fn get_instance_logs(&self, id: &str) -> Result<String> {
        let instance = self.get_instance(id).await?;
        self.logger(&instance).read().await
    }

    async fn create_volume(&self, name: &str, source: VolumeSource) -> Result<Volume> {
        if name.is_empty() {
            return Err(UnikitError::InvalidInput("volume name must not be empty".to_string()));
        }
        if self.volumes.values().await.iter().any(|v| v.name == name) {
            return Err(UnikitError::already_exists(EntityKind::Volume, name));
        }

        let id = Uuid::new_v4().to_string();
        let path = self.volume_path(&id);
        let size_bytes = write_volume_file(&path, &source, self.config.use_partition_tables).await?;

        let volume = Volume {
            id: id.clone(),
            name: name.to_string(),
            provider: QEMU_PROVIDER.to_string(),
            size_bytes,
            source_image: match &source {
                VolumeSource::Image(image) => Some(image.clone()),
                VolumeSource::Empty { .. } => None,
            },
            attachment: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.volumes.insert(&id, volume.clone()).await {
            if let Err(cleanup_err) = remove_volume_file(&path).await {
                warn!("Failed to remove volume file {}: {}", path.display(), cleanup_err);
            }
            return Err(e);
        }

        info!("Created volume {} ({})", volume.name, volume.id);
        Ok(volume)
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        Ok(self.volumes.values().await)
    }

    async fn get_volume(&self, name_or_id_prefix: &str) -> Result<Volume> {
        resolve(self.volumes.values().await, name_or_id_prefix)
    }

    async fn delete_volume(&self, id: &str, force: bool) -> Result<()> {
        let volume = self.get_volume(id).await?;
        if let Some(attachment) = &volume.attachment {
            if !force {
                return Err(UnikitError::conflict(
                    EntityKind::Volume,
                    &volume.id,
                    format!("attached to instance {}", attachment.instance_id),
                ));
            }
            self.detach_volume(&volume.id).await?;
        }

        remove_volume_file(&self.volume_path(&volume.id)).await?;
        self.volumes.remove(&volume.id).await?;
        info!("Deleted volume {} ({})", volume.name, volume.id);
        Ok(())
    }

    async fn attach_volume(&self, id: &str, instance_id: &str, mount_point: &str) -> Result<()> {
        let volume = self.get_volume(id).await?;
        let instance = self.get_instance(instance_id).await?;
        let image = self
            .images
            .get(&instance.image_id)
            .await
            .ok_or_else(|| UnikitError::not_found(EntityKind::Image, &instance.image_id))?;

        if !image.run_spec.volume_mount_points().any(|m| m == mount_point) {
            return Err(UnikitError::InvalidInput(format!(
                "image {} has no volume mount point {}",
                image.name, mount_point
            )));
        }
        if let Some(existing) = instance.mounts.get(mount_point) {
            return Err(UnikitError::conflict(
                EntityKind::Instance,
                &instance.id,
                format!("volume {existing} is already mounted at {mount_point}"),
            ));
        }

        self.record_attachment(&volume.id, &instance.id, mount_point)
            .await?;
        let mounted = self
            .instances
            .update(|records| {
                let record = records
                    .get_mut(&instance.id)
                    .ok_or_else(|| UnikitError::not_found(EntityKind::Instance, &instance.id))?;
                if record.instance.mounts.contains_key(mount_point) {
                    return Err(UnikitError::conflict(
                        EntityKind::Instance,
                        &instance.id,
                        format!("a volume is already mounted at {mount_point}"),
                    ));
                }
                record
                    .instance
                    .mounts
                    .insert(mount_point.to_string(), volume.id.clone());
                Ok(())
            })
            .await;
        if let Err(e) = mounted {
            if let Err(rollback_err) = self.clear_attachment(&volume.id).await {
                warn!("Failed to roll back attachment of {}: {}", volume.id, rollback_err);
            }
            return Err(e);
        }

        info!(
            "Attached volume {} to {} at {} (effective at next boot)",
            volume.name, instance.name, mount_point
        );
        Ok(())
    }

    async fn detach_volume(&self, id: &str) -> Result<()> {
        let volume = self.get_volume(id).await?;
        let attachment = volume.attachment.clone().ok_or_else(|| {
            UnikitError::InvalidInput(format!("volume {} is not attached", volume.name))
        })?;
        self.ensure_not_in_use(&volume, &attachment).await?;

        self.instances
            .update(|records| {
                if let Some(record) = records.get_mut(&attachment.instance_id) {
                    record.instance.mounts.remove(&attachment.mount_point);
                }
                Ok(())
            })
            .await?;
        self.clear_attachment(&volume.id).await?;

        info!(
            "Detached volume {} from instance {}",
            volume.name, attachment.instance_id
        );
        Ok(())
    }
}
