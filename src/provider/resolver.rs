use std::sync::Arc;

use serde::Serialize;

use super::overrides::UserProviderOverride;
use crate::config::CompiledDefaults;
use crate::error::{Error, Result};
use crate::registry::{ChainKind, ChainRegistry, TargetKey};
use crate::secret::Secret;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointSource {
    Override,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    Custom,
    Default,
    /// No key at all; requests go out unauthenticated
    None,
}

/// Endpoint and credentials for one target, assembled on demand.
#[derive(Debug, Clone)]
pub struct ResolvedProviderConfig {
    pub chain: ChainKind,
    pub network: String,
    pub endpoint: String,
    pub api_key: Option<Secret>,
    pub display_name: Option<String>,
    pub endpoint_source: EndpointSource,
    pub key_source: KeySource,
}

impl ResolvedProviderConfig {
    pub fn key(&self) -> TargetKey {
        TargetKey::new(self.chain, self.network.clone())
    }

    /// A summary safe to show or log
    pub fn status(&self) -> ProviderStatus {
        ProviderStatus {
            target: self.key(),
            endpoint: self.endpoint.clone(),
            display_name: self.display_name.clone(),
            endpoint_source: self.endpoint_source,
            key_source: self.key_source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub target: TargetKey,
    pub endpoint: String,
    pub display_name: Option<String>,
    pub endpoint_source: EndpointSource,
    pub key_source: KeySource,
}

/// Merges compiled defaults, user overrides and stored secrets.
///
/// Precedence, highest first: override endpoint, default endpoint; custom
/// key (when the override asks for one), default key. A custom key that was
/// requested but is missing is an error, never a silent fallback.
pub struct ProviderResolver {
    registry: Arc<ChainRegistry>,
    defaults: Arc<CompiledDefaults>,
    storage: Storage,
}

impl ProviderResolver {
    pub fn new(registry: Arc<ChainRegistry>, defaults: Arc<CompiledDefaults>, storage: Storage) -> Self {
        Self {
            registry,
            defaults,
            storage,
        }
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub async fn resolve(&self, chain: ChainKind, network: &str) -> Result<ResolvedProviderConfig> {
        self.resolve_key(&TargetKey::new(chain, network)).await
    }

    pub async fn resolve_key(&self, key: &TargetKey) -> Result<ResolvedProviderConfig> {
        if !self.registry.contains(key) {
            return Err(key.unsupported());
        }

        let user: Option<UserProviderOverride> = self.storage.get_typed(&key.override_key()).await?;
        let defaults = self.defaults.get(key);

        let (endpoint, endpoint_source) = match user.as_ref().and_then(|o| o.endpoint()) {
            Some(endpoint) => (endpoint.to_string(), EndpointSource::Override),
            None => match defaults.map(|d| d.endpoint.trim()).filter(|e| !e.is_empty()) {
                Some(endpoint) => (endpoint.to_string(), EndpointSource::Default),
                None => {
                    return Err(Error::MissingEndpoint {
                        chain: key.chain,
                        network: key.network.clone(),
                    });
                }
            },
        };

        let custom_key = user.as_ref().is_some_and(|o| o.has_custom_api_key);
        let (api_key, key_source) = if custom_key {
            match self.storage.get_secure(&key.secret_key()).await? {
                Some(secret) => (Some(Secret::from(secret)), KeySource::Custom),
                None => {
                    tracing::warn!("Custom API key for {} is enabled but missing from secure storage", key);
                    return Err(Error::MissingSecret {
                        chain: key.chain,
                        network: key.network.clone(),
                    });
                }
            }
        } else {
            match defaults.map(|d| &d.api_key).filter(|k| !k.is_empty()) {
                Some(secret) => (Some(secret.clone()), KeySource::Default),
                None => (None, KeySource::None),
            }
        };

        tracing::debug!(
            target_key = %key,
            endpoint_source = ?endpoint_source,
            key_source = ?key_source,
            "resolved provider configuration"
        );

        Ok(ResolvedProviderConfig {
            chain: key.chain,
            network: key.network.clone(),
            endpoint,
            api_key,
            display_name: user.and_then(|o| o.name),
            endpoint_source,
            key_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn mainnet() -> TargetKey {
        TargetKey::new(ChainKind::Cardano, "mainnet")
    }

    fn defaults() -> Arc<CompiledDefaults> {
        Arc::new(
            CompiledDefaults::default()
                .insert(mainnet(), "https://a", "K1")
                .insert(TargetKey::new(ChainKind::Cardano, "preprod"), "https://b", "")
                .insert(TargetKey::new(ChainKind::Cardano, "preview"), "", ""),
        )
    }

    fn resolver(storage: &Storage) -> ProviderResolver {
        ProviderResolver::new(ChainRegistry::builtin(), defaults(), storage.clone())
    }

    fn api_key(config: &ResolvedProviderConfig) -> Option<&str> {
        config.api_key.as_ref().map(|k| k.expose())
    }

    #[tokio::test]
    async fn test_defaults_without_override() {
        let storage = Storage::in_memory();
        let config = resolver(&storage)
            .resolve(ChainKind::Cardano, "mainnet")
            .await
            .unwrap();

        assert_eq!(config.endpoint, "https://a");
        assert_eq!(api_key(&config), Some("K1"));
        assert_eq!(config.endpoint_source, EndpointSource::Default);
        assert_eq!(config.key_source, KeySource::Default);
    }

    #[tokio::test]
    async fn test_empty_default_key_means_unauthenticated() {
        let storage = Storage::in_memory();
        let config = resolver(&storage)
            .resolve(ChainKind::Cardano, "preprod")
            .await
            .unwrap();

        assert_eq!(config.endpoint, "https://b");
        assert!(config.api_key.is_none());
        assert_eq!(config.key_source, KeySource::None);
    }

    #[tokio::test]
    async fn test_override_endpoint_keeps_default_key() {
        let storage = Storage::in_memory();
        storage
            .set(
                "provider:cardano:mainnet",
                r#"{"endpoint":"https://custom","has_custom_api_key":false}"#,
            )
            .await
            .unwrap();

        let config = resolver(&storage)
            .resolve(ChainKind::Cardano, "mainnet")
            .await
            .unwrap();
        assert_eq!(config.endpoint, "https://custom");
        assert_eq!(api_key(&config), Some("K1"));
        assert_eq!(config.endpoint_source, EndpointSource::Override);
    }

    #[tokio::test]
    async fn test_custom_key_wins() {
        let storage = Storage::in_memory();
        storage
            .set_typed(
                &mainnet().override_key(),
                &UserProviderOverride {
                    has_custom_api_key: true,
                    ..UserProviderOverride::for_target(&mainnet())
                },
            )
            .await
            .unwrap();
        storage.set_secure(&mainnet().secret_key(), "K2").await.unwrap();

        let config = resolver(&storage)
            .resolve(ChainKind::Cardano, "mainnet")
            .await
            .unwrap();
        assert_eq!(config.endpoint, "https://a");
        assert_eq!(api_key(&config), Some("K2"));
        assert_eq!(config.key_source, KeySource::Custom);
    }

    #[tokio::test]
    async fn test_custom_key_wins_with_endpoint_override() {
        let storage = Storage::in_memory();
        storage
            .set(
                &mainnet().override_key(),
                r#"{"endpoint":"https://custom","has_custom_api_key":true,"name":"Own node"}"#,
            )
            .await
            .unwrap();
        storage.set_secure(&mainnet().secret_key(), "K2").await.unwrap();

        let config = resolver(&storage)
            .resolve(ChainKind::Cardano, "mainnet")
            .await
            .unwrap();
        assert_eq!(config.endpoint, "https://custom");
        assert_eq!(api_key(&config), Some("K2"));
        assert_eq!(config.display_name.as_deref(), Some("Own node"));
    }

    #[tokio::test]
    async fn test_missing_custom_key_is_an_error() {
        let storage = Storage::in_memory();
        storage
            .set(&mainnet().override_key(), r#"{"has_custom_api_key":true}"#)
            .await
            .unwrap();

        let err = resolver(&storage)
            .resolve(ChainKind::Cardano, "mainnet")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingSecret { .. }));
    }

    #[tokio::test]
    async fn test_stray_secret_without_flag_is_ignored() {
        let storage = Storage::in_memory();
        storage.set_secure(&mainnet().secret_key(), "K2").await.unwrap();

        let config = resolver(&storage)
            .resolve(ChainKind::Cardano, "mainnet")
            .await
            .unwrap();
        assert_eq!(api_key(&config), Some("K1"));
    }

    #[tokio::test]
    async fn test_missing_endpoint() {
        let storage = Storage::in_memory();
        let err = resolver(&storage)
            .resolve(ChainKind::Cardano, "preview")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingEndpoint { .. }));

        storage
            .set(
                "provider:cardano:preview",
                r#"{"endpoint":"https://mine"}"#,
            )
            .await
            .unwrap();
        let config = resolver(&storage)
            .resolve(ChainKind::Cardano, "preview")
            .await
            .unwrap();
        assert_eq!(config.endpoint, "https://mine");
    }

    #[tokio::test]
    async fn test_corrupt_override_is_treated_as_absent() {
        let storage = Storage::in_memory();
        storage.set(&mainnet().override_key(), "{{{{").await.unwrap();

        let config = resolver(&storage)
            .resolve(ChainKind::Cardano, "mainnet")
            .await
            .unwrap();
        assert_eq!(config.endpoint, "https://a");
    }

    #[tokio::test]
    async fn test_unsupported_target_touches_no_storage() {
        let plain = Arc::new(MemoryStore::new());
        let secure = Arc::new(MemoryStore::new());
        let storage = Storage::new(plain.clone(), secure.clone());

        let err = resolver(&storage)
            .resolve(ChainKind::Cardano, "testnet99")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedTarget { .. }));
        assert!(plain.is_empty().await);
        assert!(secure.is_empty().await);
    }

    #[tokio::test]
    async fn test_debug_output_hides_key() {
        let storage = Storage::in_memory();
        let config = resolver(&storage)
            .resolve(ChainKind::Cardano, "mainnet")
            .await
            .unwrap();
        let printed = format!("{:?}", config);
        assert!(!printed.contains("K1"));
        assert!(printed.contains("https://a"));
    }
}
