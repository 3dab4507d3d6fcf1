use std::path::PathBuf;
use std::time::Duration;
use unikit_core::{
    Config, DeviceMapping, ImageFormat, PhotonConfig, Provider, ProvidersConfig, QemuConfig,
    RawImage, Result, RunInstanceParams, RunSpec, StageOptions, StageSpec, StorageDriver,
    VolumeSource,
};
use unikit_providers::{QemuProvider, build_providers};
use unikit_storage::{DiskConverter, QemuImgConverter, detect_format};

fn config_in(state_dir: PathBuf, photon: bool) -> Config {
    Config {
        version: "1.0".to_string(),
        state_dir,
        build: Default::default(),
        providers: ProvidersConfig {
            qemu: Some(QemuConfig::default()),
            photon: photon.then(|| PhotonConfig {
                endpoint: "http://127.0.0.1:9".to_string(),
                project_id: "proj-1".to_string(),
                access_token: None,
                vm_flavor: "unikit-vm".to_string(),
                disk_flavor: "unikit-disk".to_string(),
                task_timeout_secs: 5,
                poll_interval_ms: 100,
            }),
        },
    }
}

#[tokio::test]
async fn test_providers_follow_configuration() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let providers = build_providers(&config_in(dir.path().to_path_buf(), false)).await?;
    assert_eq!(providers.keys(), vec!["qemu"]);

    let providers = build_providers(&config_in(dir.path().to_path_buf(), true)).await?;
    assert_eq!(providers.keys(), vec!["qemu", "photon"]);
    assert!(dir.path().join("qemu").join("images.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_unowned_entities_are_not_found() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let providers = build_providers(&config_in(dir.path().to_path_buf(), false)).await?;

    let err = providers.provider_for_instance("missing").await.err().unwrap();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
#[ignore = "Requires qemu-img"]
async fn test_qemu_img_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let raw = dir.path().join("disk.img");
    tokio::fs::write(&raw, vec![0u8; 1024 * 1024]).await?;

    let converter = QemuImgConverter::default();
    let qcow2 = dir.path().join("disk.qcow2");
    converter
        .convert(&raw, ImageFormat::Raw, &qcow2, ImageFormat::Qcow2)
        .await?;
    assert_eq!(detect_format(&qcow2).await?, ImageFormat::Qcow2);

    let vmdk = dir.path().join("disk.vmdk");
    converter
        .convert(&qcow2, ImageFormat::Qcow2, &vmdk, ImageFormat::Vmdk)
        .await?;
    assert_eq!(detect_format(&vmdk).await?, ImageFormat::Vmdk);
    Ok(())
}

#[tokio::test]
#[ignore = "Requires qemu-img and qemu-system-x86_64"]
async fn test_qemu_full_lifecycle() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let provider = QemuProvider::new(dir.path().join("qemu"), QemuConfig::default()).await?;

    let artifact = dir.path().join("fs.img");
    tokio::fs::write(&artifact, vec![0u8; 4 * 1024 * 1024]).await?;
    let raw = RawImage {
        local_image_path: artifact,
        stage_spec: StageSpec {
            image_format: ImageFormat::Qcow2,
        },
        run_spec: RunSpec {
            device_mappings: vec![
                DeviceMapping::new("/", "/dev/vda1"),
                DeviceMapping::new("/data", "/dev/vdb1"),
            ],
            storage_driver: StorageDriver::Virtio,
            default_instance_memory: 128,
        },
    };

    println!("Staging image");
    let image = provider.stage("lifecycle", raw, StageOptions::default()).await?;
    provider
        .create_volume("lifecycle-data", VolumeSource::Empty { size_mb: 8 })
        .await?;

    println!("Running instance");
    let instance = provider
        .run_instance(RunInstanceParams {
            name: "lifecycle-1".to_string(),
            image_id: image.id.clone(),
            mounts: [("/data".to_string(), "lifecycle-data".to_string())].into(),
            env: Default::default(),
        })
        .await?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("Logs:\n{}", provider.get_instance_logs(&instance.id).await?);

    provider.stop_instance(&instance.id).await?;
    provider.delete_image(&image.id, true).await?;
    provider.delete_volume("lifecycle-data", false).await?;
    assert!(provider.list_instances().await?.is_empty());
    Ok(())
}
