//! Backend for a Photon-Controller-style cloud VM service.
//!
//! Mutating calls return a task that is polled until it settles. Run specs
//! are not known to the service, so they are kept in a local JSON store keyed
//! by the remote image id; instance mounts and env live in VM metadata.

use crate::staging::{prepare_disk, run_spec_for_layout};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use unikit_core::{
    EntityKind, Image, ImageFormat, Instance, InstanceState, PhotonConfig, Provider,
    ProviderConfig, RawImage, Result, RunInstanceParams, RunSpec, StageOptions, UnikitError,
    Volume, VolumeAttachment, VolumeSource, resolve, with_deadline,
};
use unikit_storage::{DiskConverter, JsonStore, QemuImgConverter};

pub const PHOTON_PROVIDER: &str = "photon";

const META_IMAGE: &str = "unikit-image";
const META_MOUNTS: &str = "unikit-mounts";
const META_ENV: &str = "unikit-env";
const META_CREATED: &str = "unikit-created";
const PERSISTENT_DISK: &str = "persistent-disk";
const VM_STARTED: &str = "STARTED";
const VM_STOPPED: &str = "STOPPED";
const GB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Task {
    pub id: String,
    pub state: String,
    #[serde(default)]
    pub entity: Option<EntityRef>,
    #[serde(default)]
    pub errors: Vec<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EntityRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ResourceList<T> {
    items: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PhotonVm {
    pub id: String,
    pub name: String,
    pub state: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PhotonDisk {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub capacity_gb: u64,
    #[serde(default)]
    pub vms: Vec<String>,
}

/// What the service cannot tell us about an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageRecord {
    name: String,
    size_bytes: u64,
    run_spec: RunSpec,
    created_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Pending,
    Completed,
}

pub(crate) fn task_outcome(task: &Task, operation: &str) -> Result<TaskOutcome> {
    match task.state.as_str() {
        "QUEUED" | "STARTED" => Ok(TaskOutcome::Pending),
        "COMPLETED" => Ok(TaskOutcome::Completed),
        "ERROR" => {
            let messages: Vec<String> = task
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect();
            Err(UnikitError::external(
                PHOTON_PROVIDER,
                operation,
                format!("task {} failed: {}", task.id, messages.join("; ")),
            ))
        }
        other => Err(UnikitError::external(
            PHOTON_PROVIDER,
            operation,
            format!("task {} in unexpected state {other}", task.id),
        )),
    }
}

pub(crate) fn instance_state(vm_state: &str) -> InstanceState {
    match vm_state {
        VM_STARTED => InstanceState::Running,
        VM_STOPPED => InstanceState::Stopped,
        "CREATING" => InstanceState::Pending,
        "DELETED" => InstanceState::Terminated,
        _ => InstanceState::Unknown,
    }
}

/// Maps a non-success response onto the error taxonomy.
pub(crate) fn status_error(
    status: StatusCode,
    body: &str,
    operation: &str,
    entity: Option<(EntityKind, &str)>,
) -> UnikitError {
    match entity {
        Some((kind, id)) if status == StatusCode::NOT_FOUND => UnikitError::not_found(kind, id),
        _ => UnikitError::external(
            PHOTON_PROVIDER,
            operation,
            format!("HTTP {status}: {}", body.trim()),
        ),
    }
}

fn decode_metadata<T: DeserializeOwned + Default>(metadata: &BTreeMap<String, String>, key: &str) -> T {
    metadata
        .get(key)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

pub(crate) fn instance_from_vm(vm: &PhotonVm) -> Instance {
    Instance {
        id: vm.id.clone(),
        name: vm.name.clone(),
        provider: PHOTON_PROVIDER.to_string(),
        image_id: vm.metadata.get(META_IMAGE).cloned().unwrap_or_default(),
        state: instance_state(&vm.state),
        mounts: decode_metadata(&vm.metadata, META_MOUNTS),
        env: decode_metadata(&vm.metadata, META_ENV),
        ip_address: None,
        created_at: vm
            .metadata
            .get(META_CREATED)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    }
}

pub(crate) fn volume_from_disk(disk: &PhotonDisk, instances: &[Instance]) -> Result<Volume> {
    let size_bytes = disk.capacity_gb.checked_mul(GB).ok_or_else(|| {
        UnikitError::external(
            PHOTON_PROVIDER,
            "list disks",
            format!("disk {} reports an impossible capacity of {}GB", disk.id, disk.capacity_gb),
        )
    })?;
    let attachment = disk.vms.first().map(|vm_id| {
        let mount_point = instances
            .iter()
            .find(|i| &i.id == vm_id)
            .and_then(|i| {
                i.mounts
                    .iter()
                    .find(|(_, volume_id)| *volume_id == &disk.id)
                    .map(|(mount, _)| mount.clone())
            })
            .unwrap_or_default();
        VolumeAttachment {
            instance_id: vm_id.clone(),
            mount_point,
        }
    });

    Ok(Volume {
        id: disk.id.clone(),
        name: disk.name.clone(),
        provider: PHOTON_PROVIDER.to_string(),
        size_bytes,
        source_image: None,
        attachment,
        created_at: Utc::now(),
    })
}

/// Whole gigabytes needed to hold `size_mb`, never less than one.
pub(crate) fn capacity_gb(size_mb: u64) -> u64 {
    size_mb.div_ceil(1024).max(1)
}

pub(crate) fn vm_metadata(
    image_id: &str,
    mounts: &BTreeMap<String, String>,
    env: &BTreeMap<String, String>,
    created_at: DateTime<Utc>,
) -> Result<BTreeMap<String, String>> {
    Ok(BTreeMap::from([
        (META_IMAGE.to_string(), image_id.to_string()),
        (META_MOUNTS.to_string(), serde_json::to_string(mounts)?),
        (META_ENV.to_string(), serde_json::to_string(env)?),
        (META_CREATED.to_string(), created_at.to_rfc3339()),
    ]))
}

pub struct PhotonProvider {
    http: reqwest::Client,
    config: PhotonConfig,
    converter: Arc<dyn DiskConverter>,
    images: JsonStore<ImageRecord>,
    work_dir: PathBuf,
}

impl PhotonProvider {
    pub async fn new(state_dir: PathBuf, config: PhotonConfig, qemu_img_binary: PathBuf) -> Result<Self> {
        Self::with_converter(state_dir, config, Arc::new(QemuImgConverter::new(qemu_img_binary))).await
    }

    pub async fn with_converter(
        state_dir: PathBuf,
        config: PhotonConfig,
        converter: Arc<dyn DiskConverter>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&state_dir).await?;
        let images = JsonStore::open(state_dir.join("images.json")).await?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| UnikitError::external(PHOTON_PROVIDER, "create http client", e))?;
        debug!("Photon provider talking to {}", config.endpoint);

        Ok(Self {
            http,
            config,
            converter,
            images,
            work_dir: state_dir.join("tmp"),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.endpoint.trim_end_matches('/'), path);
        let builder = self.http.request(method, url);
        match &self.config.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        operation: &str,
        entity: Option<(EntityKind, &str)>,
    ) -> Result<T> {
        let response = builder
            .send()
            .await
            .map_err(|e| UnikitError::external(PHOTON_PROVIDER, operation, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, operation, entity));
        }
        response
            .json()
            .await
            .map_err(|e| UnikitError::external(PHOTON_PROVIDER, operation, e))
    }

    /// Sends a mutating request and waits for its task to complete.
    async fn run_task(
        &self,
        builder: RequestBuilder,
        operation: &str,
        entity: Option<(EntityKind, &str)>,
    ) -> Result<Task> {
        let task: Task = self.send(builder, operation, entity).await?;
        self.wait_for_task(task, operation).await
    }

    async fn wait_for_task(&self, task: Task, operation: &str) -> Result<Task> {
        let timeout = Some(self.config.task_timeout());
        with_deadline(operation, timeout, async {
            let mut task = task;
            loop {
                if task_outcome(&task, operation)? == TaskOutcome::Completed {
                    return Ok::<Task, UnikitError>(task);
                }
                tokio::time::sleep(self.config.poll_interval()).await;
                let path = format!("/tasks/{}", task.id);
                task = self.send(self.request(Method::GET, &path), operation, None).await?;
            }
        })
        .await
    }

    fn created_id(task: &Task, operation: &str) -> Result<String> {
        task.entity
            .as_ref()
            .map(|e| e.id.clone())
            .ok_or_else(|| {
                UnikitError::external(PHOTON_PROVIDER, operation, "task has no entity")
            })
    }

    async fn fetch_vm(&self, id: &str) -> Result<PhotonVm> {
        self.send(
            self.request(Method::GET, &format!("/vms/{id}")),
            "get vm",
            Some((EntityKind::Instance, id)),
        )
        .await
    }

    async fn fetch_vms(&self) -> Result<Vec<PhotonVm>> {
        let path = format!("/projects/{}/vms", self.config.project_id);
        let list: ResourceList<PhotonVm> =
            self.send(self.request(Method::GET, &path), "list vms", None).await?;
        Ok(list.items)
    }

    async fn vm_operation(&self, vm_id: &str, operation: &str, body: Option<serde_json::Value>) -> Result<()> {
        let mut builder = self.request(Method::POST, &format!("/vms/{vm_id}/{operation}"));
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        self.run_task(builder, operation, Some((EntityKind::Instance, vm_id)))
            .await?;
        Ok(())
    }

    async fn set_mounts(&self, instance: &Instance, mounts: &BTreeMap<String, String>) -> Result<()> {
        let metadata = vm_metadata(&instance.image_id, mounts, &instance.env, instance.created_at)?;
        self.vm_operation(&instance.id, "set_metadata", Some(json!({ "metadata": metadata })))
            .await
    }

    async fn delete_vm(&self, vm_id: &str) -> Result<()> {
        self.run_task(
            self.request(Method::DELETE, &format!("/vms/{vm_id}")),
            "delete vm",
            Some((EntityKind::Instance, vm_id)),
        )
        .await?;
        Ok(())
    }

    async fn upload_image(&self, name: &str, disk: &std::path::Path) -> Result<String> {
        let file = tokio::fs::File::open(disk).await?;
        let len = file.metadata().await?.len();
        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(ReaderStream::new(file)),
            len,
        )
        .file_name(format!("{name}.vmdk"));
        let form = reqwest::multipart::Form::new()
            .text("imageReplication", "EAGER")
            .part("file", part);

        info!("Uploading image {} ({} bytes)", name, len);
        let task = self
            .run_task(
                self.request(Method::POST, "/images").multipart(form),
                "upload image",
                None,
            )
            .await?;
        Self::created_id(&task, "upload image")
    }

    fn check_mount_point(image: &Image, mount_point: &str) -> Result<()> {
        if image.run_spec.volume_mount_points().any(|m| m == mount_point) {
            Ok(())
        } else {
            Err(UnikitError::InvalidInput(format!(
                "image {} has no volume mount point {}",
                image.name, mount_point
            )))
        }
    }

    /// Undoes a partially created VM. Failures are logged only.
    async fn roll_back_vm(&self, vm_id: &str, attached: &[String]) {
        for disk_id in attached {
            if let Err(e) = self
                .vm_operation(vm_id, "detach_disk", Some(json!({ "diskId": disk_id })))
                .await
            {
                warn!("Failed to detach disk {} during rollback: {}", disk_id, e);
            }
        }
        if let Err(e) = self.delete_vm(vm_id).await {
            warn!("Failed to delete vm {} during rollback: {}", vm_id, e);
        }
    }

    async fn boot_vm(&self, vm_id: &str, mounts: &BTreeMap<String, String>, attached: &mut Vec<String>) -> Result<()> {
        for disk_id in mounts.values() {
            self.vm_operation(vm_id, "attach_disk", Some(json!({ "diskId": disk_id })))
                .await?;
            attached.push(disk_id.clone());
        }
        self.vm_operation(vm_id, "start", None).await
    }
}

#[async_trait]
impl Provider for PhotonProvider {
    fn name(&self) -> &str {
        PHOTON_PROVIDER
    }

    fn config(&self) -> ProviderConfig {
        ProviderConfig {
            use_partition_tables: true,
        }
    }

    async fn stage(&self, name: &str, raw_image: RawImage, options: StageOptions) -> Result<Image> {
        if name.is_empty() {
            return Err(UnikitError::InvalidInput("image name must not be empty".to_string()));
        }
        raw_image.validate()?;

        let existing = self
            .list_images()
            .await?
            .into_iter()
            .find(|image| image.name == name);
        if let Some(existing) = existing {
            if !options.force {
                return Err(UnikitError::already_exists(EntityKind::Image, name));
            }
            self.delete_image(&existing.id, true).await?;
        }

        let disk = prepare_disk(
            self.converter.as_ref(),
            &raw_image,
            true,
            ImageFormat::Vmdk,
            &self.work_dir,
            options.no_cleanup,
        )
        .await?;
        let size_bytes = tokio::fs::metadata(disk.path()).await?.len();
        let id = self.upload_image(name, disk.path()).await?;

        let record = ImageRecord {
            name: name.to_string(),
            size_bytes,
            run_spec: run_spec_for_layout(&raw_image.run_spec, true),
            created_at: Utc::now(),
        };
        if let Err(e) = self.images.insert(&id, record.clone()).await {
            if let Err(cleanup_err) = self
                .run_task(
                    self.request(Method::DELETE, &format!("/images/{id}")),
                    "delete image",
                    Some((EntityKind::Image, &id)),
                )
                .await
            {
                warn!("Failed to remove uploaded image {}: {}", id, cleanup_err);
            }
            return Err(e);
        }

        info!("Staged image {} ({})", name, id);
        Ok(image_from_record(&id, record))
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        let list: ResourceList<EntityRef> = self
            .send(self.request(Method::GET, "/images"), "list images", None)
            .await?;
        let mut images = Vec::new();
        for remote in list.items {
            if let Some(record) = self.images.get(&remote.id).await {
                images.push(image_from_record(&remote.id, record));
            }
        }
        Ok(images)
    }

    async fn get_image(&self, name_or_id_prefix: &str) -> Result<Image> {
        resolve(self.list_images().await?, name_or_id_prefix)
    }

    async fn delete_image(&self, id: &str, force: bool) -> Result<()> {
        let image = self.get_image(id).await?;
        let dependents: Vec<Instance> = self
            .list_instances()
            .await?
            .into_iter()
            .filter(|i| i.image_id == image.id)
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

        self.run_task(
            self.request(Method::DELETE, &format!("/images/{}", image.id)),
            "delete image",
            Some((EntityKind::Image, &image.id)),
        )
        .await?;
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
            .list_instances()
            .await?
            .iter()
            .any(|i| i.name == params.name)
        {
            return Err(UnikitError::already_exists(EntityKind::Instance, &params.name));
        }

        let mut mounts = BTreeMap::new();
        for (mount_point, volume_query) in &params.mounts {
            Self::check_mount_point(&image, mount_point)?;
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

        let metadata = vm_metadata(&image.id, &mounts, &params.env, Utc::now())?;
        let body = json!({
            "name": params.name,
            "flavor": self.config.vm_flavor,
            "sourceImageId": image.id,
            "attachedDisks": [{
                "name": "boot-disk",
                "kind": "ephemeral-disk",
                "flavor": self.config.disk_flavor,
                "bootDisk": true,
            }],
            "metadata": metadata,
        });
        let path = format!("/projects/{}/vms", self.config.project_id);
        let task = self
            .run_task(self.request(Method::POST, &path).json(&body), "create vm", None)
            .await?;
        let vm_id = Self::created_id(&task, "create vm")?;

        let mut attached = Vec::new();
        if let Err(e) = self.boot_vm(&vm_id, &mounts, &mut attached).await {
            warn!("VM {} failed to start: {}", params.name, e);
            self.roll_back_vm(&vm_id, &attached).await;
            return Err(e);
        }

        info!("Instance {} ({}) is running", params.name, vm_id);
        Ok(instance_from_vm(&self.fetch_vm(&vm_id).await?))
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.fetch_vms().await?.iter().map(instance_from_vm).collect())
    }

    async fn get_instance(&self, name_or_id_prefix: &str) -> Result<Instance> {
        resolve(self.list_instances().await?, name_or_id_prefix)
    }

    async fn delete_instance(&self, id: &str) -> Result<()> {
        let instance = self.get_instance(id).await?;
        let vm = self.fetch_vm(&instance.id).await?;
        if vm.state == VM_STARTED {
            self.vm_operation(&vm.id, "stop", None).await?;
        }
        for disk_id in instance.mounts.values() {
            self.vm_operation(&vm.id, "detach_disk", Some(json!({ "diskId": disk_id })))
                .await?;
        }
        self.delete_vm(&vm.id).await?;
        info!("Deleted instance {} ({})", instance.name, instance.id);
        Ok(())
    }

    async fn start_instance(&self, id: &str) -> Result<()> {
        let instance = self.get_instance(id).await?;
        let vm = self.fetch_vm(&instance.id).await?;
        if vm.state == VM_STARTED {
            debug!("VM {} is already started", vm.name);
            return Ok(());
        }
        self.vm_operation(&vm.id, "start", None).await
    }

    async fn stop_instance(&self, id: &str) -> Result<()> {
        let instance = self.get_instance(id).await?;
        let vm = self.fetch_vm(&instance.id).await?;
        if vm.state == VM_STOPPED {
            debug!("VM {} is already stopped", vm.name);
            return Ok(());
        }
        self.vm_operation(&vm.id, "stop", None).await
    }

    async fn get_instance_logs(&self, id: &str) -> Result<String> {
        self.get_instance(id).await?;
        Ok(String::new())
    }

    async fn create_volume(&self, name: &str, source: VolumeSource) -> Result<Volume> {
        if name.is_empty() {
            return Err(UnikitError::InvalidInput("volume name must not be empty".to_string()));
        }
        let size_mb = match source {
            VolumeSource::Empty { size_mb } if size_mb > 0 => size_mb,
            VolumeSource::Empty { .. } => {
                return Err(UnikitError::InvalidInput(
                    "volume size must be greater than zero".to_string(),
                ));
            }
            VolumeSource::Image(path) => {
                return Err(UnikitError::InvalidInput(format!(
                    "photon volumes cannot be created from {}; create an empty volume instead",
                    path.display()
                )));
            }
        };
        if self.list_volumes().await?.iter().any(|v| v.name == name) {
            return Err(UnikitError::already_exists(EntityKind::Volume, name));
        }

        let body = json!({
            "name": name,
            "kind": PERSISTENT_DISK,
            "flavor": self.config.disk_flavor,
            "capacityGb": capacity_gb(size_mb),
        });
        let path = format!("/projects/{}/disks", self.config.project_id);
        let task = self
            .run_task(self.request(Method::POST, &path).json(&body), "create disk", None)
            .await?;
        let id = Self::created_id(&task, "create disk")?;

        info!("Created volume {} ({})", name, id);
        self.get_volume(&id).await
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        let path = format!("/projects/{}/disks", self.config.project_id);
        let disks: ResourceList<PhotonDisk> =
            self.send(self.request(Method::GET, &path), "list disks", None).await?;
        let instances = self.list_instances().await?;
        disks
            .items
            .iter()
            .filter(|d| d.kind == PERSISTENT_DISK)
            .map(|d| volume_from_disk(d, &instances))
            .collect()
    }

    async fn get_volume(&self, name_or_id_prefix: &str) -> Result<Volume> {
        resolve(self.list_volumes().await?, name_or_id_prefix)
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

        self.run_task(
            self.request(Method::DELETE, &format!("/disks/{}", volume.id)),
            "delete disk",
            Some((EntityKind::Volume, &volume.id)),
        )
        .await?;
        info!("Deleted volume {} ({})", volume.name, volume.id);
        Ok(())
    }

    async fn attach_volume(&self, id: &str, instance_id: &str, mount_point: &str) -> Result<()> {
        let volume = self.get_volume(id).await?;
        let instance = self.get_instance(instance_id).await?;
        let image = self.get_image(&instance.image_id).await?;
        Self::check_mount_point(&image, mount_point)?;

        if let Some(attachment) = &volume.attachment {
            return Err(UnikitError::conflict(
                EntityKind::Volume,
                &volume.id,
                format!("already attached to instance {}", attachment.instance_id),
            ));
        }
        if let Some(existing) = instance.mounts.get(mount_point) {
            return Err(UnikitError::conflict(
                EntityKind::Instance,
                &instance.id,
                format!("volume {existing} is already mounted at {mount_point}"),
            ));
        }

        self.vm_operation(&instance.id, "attach_disk", Some(json!({ "diskId": volume.id })))
            .await?;
        let mut mounts = instance.mounts.clone();
        mounts.insert(mount_point.to_string(), volume.id.clone());
        if let Err(e) = self.set_mounts(&instance, &mounts).await {
            if let Err(rollback_err) = self
                .vm_operation(&instance.id, "detach_disk", Some(json!({ "diskId": volume.id })))
                .await
            {
                warn!("Failed to roll back attachment of {}: {}", volume.id, rollback_err);
            }
            return Err(e);
        }

        info!("Attached volume {} to {} at {}", volume.name, instance.name, mount_point);
        Ok(())
    }

    async fn detach_volume(&self, id: &str) -> Result<()> {
        let volume = self.get_volume(id).await?;
        let attachment = volume.attachment.clone().ok_or_else(|| {
            UnikitError::InvalidInput(format!("volume {} is not attached", volume.name))
        })?;
        let instance = self.get_instance(&attachment.instance_id).await?;

        self.vm_operation(&instance.id, "detach_disk", Some(json!({ "diskId": volume.id })))
            .await?;
        let mut mounts = instance.mounts.clone();
        mounts.retain(|_, volume_id| volume_id != &volume.id);
        self.set_mounts(&instance, &mounts).await?;

        info!("Detached volume {} from {}", volume.name, instance.name);
        Ok(())
    }
}

fn image_from_record(id: &str, record: ImageRecord) -> Image {
    Image {
        id: id.to_string(),
        name: record.name,
        provider: PHOTON_PROVIDER.to_string(),
        size_bytes: record.size_bytes,
        location: id.to_string(),
        run_spec: record.run_spec,
        created_at: record.created_at,
    }
}
