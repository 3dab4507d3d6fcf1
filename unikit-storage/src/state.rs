use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;
use unikit_core::Result;

/// A map of records persisted as pretty-printed JSON, rewritten on every change.
pub struct JsonStore<T> {
    path: PathBuf,
    records: RwLock<BTreeMap<String, T>>,
}

impl<T> JsonStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub async fn open(path: PathBuf) -> Result<Self> {
        let records = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            let records: BTreeMap<String, T> = serde_json::from_str(&content)?;
            debug!("Loaded {} records from {}", records.len(), path.display());
            records
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn values(&self) -> Vec<T> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn insert(&self, id: &str, record: T) -> Result<()> {
        self.update(|records| {
            records.insert(id.to_string(), record);
            Ok(())
        })
        .await
    }

    pub async fn remove(&self, id: &str) -> Result<Option<T>> {
        self.update(|records| Ok(records.remove(id))).await
    }

    /// Applies `f` under the write lock and persists the result. Nothing is
    /// written if `f` fails.
    pub async fn update<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut BTreeMap<String, T>) -> Result<R>,
    {
        let mut records = self.records.write().await;
        let mut working = records.clone();
        let result = f(&mut working)?;
        self.save(&working).await?;
        *records = working;
        Ok(result)
    }

    async fn save(&self, records: &BTreeMap<String, T>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(records)?;
        fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unikit_core::UnikitError;

    #[tokio::test]
    async fn test_records_survive_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state").join("images.json");

        let store: JsonStore<String> = JsonStore::open(path.clone()).await?;
        store.insert("a", "alpha".to_string()).await?;
        store.insert("b", "beta".to_string()).await?;
        store.remove("a").await?;

        let reopened: JsonStore<String> = JsonStore::open(path).await?;
        assert_eq!(reopened.values().await, vec!["beta".to_string()]);
        assert_eq!(reopened.get("b").await.as_deref(), Some("beta"));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_update_changes_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store: JsonStore<u32> = JsonStore::open(dir.path().join("n.json")).await?;
        store.insert("x", 1).await?;

        let err = store
            .update(|records| {
                records.insert("y".to_string(), 2);
                Err::<(), _>(UnikitError::InvalidInput("nope".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), unikit_core::ErrorKind::InvalidInput);
        assert_eq!(store.values().await, vec![1]);
        Ok(())
    }
}
