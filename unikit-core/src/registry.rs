use crate::error::{EntityKind, Result, UnikitError};
use crate::provider::Provider;
use std::sync::Arc;
use tracing::debug;

/// Configured providers, keyed by provider type name.
///
/// Built once at startup and read-only afterwards. Ownership lookups fan out
/// over every provider in registration order and return the first one whose
/// `get_*` succeeds; if two backends report the same id the first hit wins.
#[derive(Clone, Default)]
pub struct Providers {
    providers: Vec<(String, Arc<dyn Provider>)>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under its own name. Names must be unique.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<()> {
        let name = provider.name().to_string();
        if self.providers.iter().any(|(key, _)| *key == name) {
            return Err(UnikitError::already_exists(EntityKind::Provider, name));
        }
        debug!("Registered provider {}", name);
        self.providers.push((name, provider));
        Ok(())
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Result<Self> {
        self.register(provider)?;
        Ok(self)
    }

    pub fn keys(&self) -> Vec<String> {
        self.providers.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn get(&self, provider_type: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|(key, _)| key == provider_type)
            .map(|(_, provider)| provider.clone())
            .ok_or_else(|| UnikitError::not_found(EntityKind::Provider, provider_type))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter().map(|(_, provider)| provider)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn provider_for_image(&self, image_id: &str) -> Result<Arc<dyn Provider>> {
        for (key, provider) in &self.providers {
            match provider.get_image(image_id).await {
                Ok(_) => return Ok(provider.clone()),
                Err(e) => debug!("Provider {} does not own image {}: {}", key, image_id, e),
            }
        }
        Err(UnikitError::not_found(
            EntityKind::Provider,
            format!("no provider owns image {image_id}"),
        ))
    }

    pub async fn provider_for_instance(&self, instance_id: &str) -> Result<Arc<dyn Provider>> {
        for (key, provider) in &self.providers {
            match provider.get_instance(instance_id).await {
                Ok(_) => return Ok(provider.clone()),
                Err(e) => debug!(
                    "Provider {} does not own instance {}: {}",
                    key, instance_id, e
                ),
            }
        }
        Err(UnikitError::not_found(
            EntityKind::Provider,
            format!("no provider owns instance {instance_id}"),
        ))
    }

    pub async fn provider_for_volume(&self, volume_id: &str) -> Result<Arc<dyn Provider>> {
        for (key, provider) in &self.providers {
            match provider.get_volume(volume_id).await {
                Ok(_) => return Ok(provider.clone()),
                Err(e) => debug!("Provider {} does not own volume {}: {}", key, volume_id, e),
            }
        }
        Err(UnikitError::not_found(
            EntityKind::Provider,
            format!("no provider owns volume {volume_id}"),
        ))
    }
}
