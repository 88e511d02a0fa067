use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::{ChainKind, ChainRegistry, TargetKey};
use crate::storage::Storage;

/// User-entered provider settings for one target, kept in the plain store.
///
/// The custom API key itself lives in the secure store; this record only
/// carries the flag saying one was entered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProviderOverride {
    pub chain: Option<ChainKind>,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub has_custom_api_key: bool,
    #[serde(default)]
    pub name: Option<String>,
}

impl UserProviderOverride {
    pub fn for_target(key: &TargetKey) -> Self {
        Self {
            chain: Some(key.chain),
            network: key.network.clone(),
            ..Default::default()
        }
    }

    /// The endpoint override, if one is set and not blank
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

/// Cache eviction hook called after an override changes.
pub trait Invalidate: Send + Sync {
    fn invalidate(&self, key: &TargetKey);
}

/// Editing surface for provider overrides.
///
/// Keeps the flag and the stored secret consistent: the secret is written
/// before the flag is raised and the flag is lowered before the secret is
/// removed, so `has_custom_api_key == true` always has a secret behind it.
pub struct ProviderOverrides {
    storage: Storage,
    registry: Arc<ChainRegistry>,
    invalidator: Option<Arc<dyn Invalidate>>,
}

impl ProviderOverrides {
    pub fn new(storage: Storage, registry: Arc<ChainRegistry>) -> Self {
        Self {
            storage,
            registry,
            invalidator: None,
        }
    }

    pub fn with_invalidator(mut self, invalidator: Arc<dyn Invalidate>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    fn check(&self, key: &TargetKey) -> Result<()> {
        if self.registry.contains(key) {
            Ok(())
        } else {
            Err(key.unsupported())
        }
    }

    fn changed(&self, key: &TargetKey) {
        if let Some(invalidator) = &self.invalidator {
            invalidator.invalidate(key);
        }
    }

    pub async fn load(&self, key: &TargetKey) -> Result<Option<UserProviderOverride>> {
        self.check(key)?;
        self.storage.get_typed(&key.override_key()).await
    }

    async fn load_or_default(&self, key: &TargetKey) -> Result<UserProviderOverride> {
        Ok(self
            .load(key)
            .await?
            .unwrap_or_else(|| UserProviderOverride::for_target(key)))
    }

    async fn store(&self, key: &TargetKey, record: &UserProviderOverride) -> Result<()> {
        self.storage.set_typed(&key.override_key(), record).await?;
        self.changed(key);
        Ok(())
    }

    /// Write a whole override record for `key`.
    ///
    /// Blank endpoint and name are stored as unset and the endpoint must be
    /// an http(s) URL. The flag can only be raised when a custom key is
    /// already stored; lowering it removes that key after the record is
    /// written.
    pub async fn save(&self, key: &TargetKey, record: &UserProviderOverride) -> Result<()> {
        self.check(key)?;
        let endpoint = record.endpoint();
        if let Some(url) = endpoint {
            validate_endpoint(url)?;
        }
        if record.has_custom_api_key && self.storage.get_secure(&key.secret_key()).await?.is_none() {
            return Err(Error::MissingSecret {
                chain: key.chain,
                network: key.network.clone(),
            });
        }

        let previous = self.load(key).await?;
        let normalized = UserProviderOverride {
            chain: Some(key.chain),
            network: key.network.clone(),
            endpoint: endpoint.map(str::to_string),
            has_custom_api_key: record.has_custom_api_key,
            name: record
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        };
        self.store(key, &normalized).await?;

        if previous.is_some_and(|p| p.has_custom_api_key) && !normalized.has_custom_api_key {
            self.storage.remove_secure(&key.secret_key()).await?;
        }
        Ok(())
    }

    /// Set or clear the endpoint override. Endpoints must be http(s) URLs.
    pub async fn set_endpoint(&self, key: &TargetKey, endpoint: Option<&str>) -> Result<()> {
        self.check(key)?;
        let mut record = self.load_or_default(key).await?;
        record.endpoint = endpoint.map(str::to_string);
        self.save(key, &record).await?;

        tracing::info!("Endpoint override for {} {}", key, if record.endpoint().is_some() { "set" } else { "cleared" });
        Ok(())
    }

    pub async fn set_name(&self, key: &TargetKey, name: Option<&str>) -> Result<()> {
        self.check(key)?;
        let mut record = self.load_or_default(key).await?;
        record.name = name.map(str::to_string);
        self.save(key, &record).await
    }

    /// Store a custom API key for the target and switch the override to it.
    ///
    /// A failed secure write aborts before the flag is touched.
    pub async fn set_custom_api_key(&self, key: &TargetKey, api_key: &str) -> Result<()> {
        self.check(key)?;
        self.storage.set_secure(&key.secret_key(), api_key).await?;

        let mut record = self.load_or_default(key).await?;
        record.has_custom_api_key = true;
        self.store(key, &record).await?;

        tracing::info!("Custom API key enabled for {}", key);
        Ok(())
    }

    /// Go back to the default API key and delete the custom one
    pub async fn clear_custom_api_key(&self, key: &TargetKey) -> Result<()> {
        self.check(key)?;
        if let Some(mut record) = self.load(key).await? {
            if record.has_custom_api_key {
                record.has_custom_api_key = false;
                self.store(key, &record).await?;
            }
        }
        self.storage.remove_secure(&key.secret_key()).await?;
        self.changed(key);

        tracing::info!("Custom API key cleared for {}", key);
        Ok(())
    }

    /// Drop every user setting for the target
    pub async fn reset(&self, key: &TargetKey) -> Result<()> {
        self.check(key)?;
        self.storage.remove(&key.override_key()).await?;
        self.storage.remove_secure(&key.secret_key()).await?;
        self.changed(key);

        tracing::info!("Provider settings reset for {}", key);
        Ok(())
    }
}

/// Check that an endpoint is an absolute http(s) URL with a host
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    match url::Url::parse(endpoint) {
        Ok(parsed)
            if matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some() =>
        {
            Ok(())
        }
        _ => Err(Error::InvalidEndpoint(endpoint.to_string())),
    }
}
