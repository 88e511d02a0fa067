use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::KeyValueStore;
use crate::error::{Error, Result};

/// JSON-file-backed store.
///
/// The whole map is kept in memory and rewritten on every change through a
/// temporary file and a rename, so readers of the file see either the old or
/// the new contents.
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::storage(&format!("failed to read {:?}", path), e))?;
            serde_json::from_str(&content)
                .map_err(|e| Error::storage(&format!("failed to parse {:?}", path), e))?
        } else {
            tracing::info!("Settings store does not exist yet: {:?}", path);
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: BTreeMap<String, String>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &entries))
            .await
            .map_err(|e| Error::storage("settings writer task failed", e))?
    }
}

fn write_atomic(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::storage(&format!("failed to create {:?}", parent), e))?;
    }

    let content = serde_json::to_string_pretty(entries)
        .map_err(|e| Error::storage("failed to serialize settings", e))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| Error::storage(&format!("failed to write {:?}", tmp), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::storage(&format!("failed to restrict {:?}", tmp), e))?;
    }

    fs::rename(&tmp, path).map_err(|e| Error::storage(&format!("failed to replace {:?}", path), e))
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        // Holding the write guard across the flush keeps writers ordered
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(next.clone()).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.persist(next.clone()).await?;
        *entries = next;
        Ok(())
    }
}
