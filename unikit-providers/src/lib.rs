pub mod launcher;
pub mod photon;
pub mod qemu;
pub mod staging;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use tracing::info;
use unikit_core::{Config, Providers, Result};

pub use launcher::{DiskSpec, LaunchSpec, QemuLauncher, VmLauncher};
pub use photon::{PHOTON_PROVIDER, PhotonProvider};
pub use qemu::{QEMU_PROVIDER, QemuProvider};

/// Registers a provider for every configured backend, QEMU first.
pub async fn build_providers(config: &Config) -> Result<Providers> {
    let mut providers = Providers::new();

    if let Some(qemu) = &config.providers.qemu {
        let provider = QemuProvider::new(config.qemu_state_dir(), qemu.clone()).await?;
        providers.register(Arc::new(provider))?;
    }

    if let Some(photon) = &config.providers.photon {
        let qemu_img = config
            .providers
            .qemu
            .as_ref()
            .map(|q| q.qemu_img_binary.clone())
            .unwrap_or_else(|| "qemu-img".into());
        let provider = PhotonProvider::new(config.photon_state_dir(), photon.clone(), qemu_img).await?;
        providers.register(Arc::new(provider))?;
    }

    info!("Registered providers: {}", providers.keys().join(", "));
    Ok(providers)
}
