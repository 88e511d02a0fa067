//! Plain and secure key/value storage.
//!
//! Both sides share one primitive surface ([`KeyValueStore`]). The
//! [`Storage`] facade keeps them apart: nothing written through the secure
//! half is ever readable through the plain half, and secure reads come back
//! as zeroizing strings.

mod file;
mod keychain;
mod memory;

pub use file::FileStore;
pub use keychain::KeychainStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// String key/value primitives. Each `set` replaces the value atomically.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// The plain store and the secure store, side by side.
#[derive(Clone)]
pub struct Storage {
    plain: Arc<dyn KeyValueStore>,
    secure: Arc<dyn KeyValueStore>,
}

impl Storage {
    pub fn new(plain: Arc<dyn KeyValueStore>, secure: Arc<dyn KeyValueStore>) -> Self {
        Self { plain, secure }
    }

    /// Two independent in-memory stores
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.plain.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.plain.set(key, value).await?;
        tracing::debug!(key, "plain store write");
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.plain.remove(key).await
    }

    pub async fn get_secure(&self, key: &str) -> Result<Option<Zeroizing<String>>> {
        Ok(self.secure.get(key).await?.map(Zeroizing::new))
    }

    pub async fn set_secure(&self, key: &str, value: &str) -> Result<()> {
        self.secure.set(key, value).await?;
        tracing::debug!(key, "secure store write");
        Ok(())
    }

    pub async fn remove_secure(&self, key: &str) -> Result<()> {
        self.secure.remove(key).await
    }

    /// Read and decode a plain value. Absent and unparseable both yield `None`.
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = self.get(key).await?;
        Ok(decode_typed(key, raw.as_deref()))
    }

    pub async fn set_typed<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = encode_typed(key, value)?;
        self.set(key, &encoded).await
    }

    /// Read and decode a secure value. Absent and unparseable both yield `None`.
    pub async fn get_secure_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = self.get_secure(key).await?;
        Ok(decode_typed(key, raw.as_ref().map(|s| s.as_str())))
    }

    pub async fn set_secure_typed<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = Zeroizing::new(encode_typed(key, value)?);
        self.set_secure(key, &encoded).await
    }
}

fn decode_typed<T: DeserializeOwned>(key: &str, raw: Option<&str>) -> Option<T> {
    let raw = raw?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            // The value itself may be sensitive; log only the key and position
            tracing::warn!(key, line = e.line(), column = e.column(), "ignoring unparseable stored value");
            None
        }
    }
}

fn encode_typed<T: Serialize>(key: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::storage(&format!("failed to encode {}", key), e))
}
