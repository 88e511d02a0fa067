use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::overrides::Invalidate;
use super::resolver::{ProviderResolver, ResolvedProviderConfig};
use crate::error::{Error, Result};
use crate::registry::{ChainDescriptor, ChainKind, TargetKey};

/// A ready-to-use connection to one target.
pub trait ProviderHandle: Send + Sync + 'static {
    fn target(&self) -> &TargetKey;

    /// A handle that returns `false` is dropped from the cache and rebuilt
    /// on the next request.
    fn is_valid(&self) -> bool {
        true
    }
}

/// Builds provider handles from resolved configuration
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Provider: ProviderHandle;

    async fn connect(
        &self,
        descriptor: &ChainDescriptor,
        config: &ResolvedProviderConfig,
    ) -> Result<Self::Provider>;
}

type Slot<P> = Arc<OnceCell<Arc<P>>>;

const MAX_ATTEMPTS: usize = 2;

/// Hands out one cached provider per (chain, network).
///
/// Each target gets its own once-cell, so concurrent requests for the same
/// target share a single construction while different targets never wait on
/// each other. The map lock is only held to look up or swap cells.
///
/// A failed or cancelled construction leaves its cell empty; the next request
/// runs construction again.
pub struct ProviderFactory<C: Connector> {
    resolver: Arc<ProviderResolver>,
    connector: C,
    cache: Mutex<HashMap<TargetKey, Slot<C::Provider>>>,
}

impl<C: Connector> ProviderFactory<C> {
    pub fn new(resolver: Arc<ProviderResolver>, connector: C) -> Self {
        Self {
            resolver,
            connector,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &Arc<ProviderResolver> {
        &self.resolver
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<TargetKey, Slot<C::Provider>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn get_provider(&self, chain: ChainKind, network: &str) -> Result<Arc<C::Provider>> {
        self.get(&TargetKey::new(chain, network)).await
    }

    pub async fn get(&self, key: &TargetKey) -> Result<Arc<C::Provider>> {
        // Reject unknown targets before a cache slot is created for them
        if !self.resolver.registry().contains(key) {
            return Err(key.unsupported());
        }

        for attempt in 1..=MAX_ATTEMPTS {
            let slot = self.cache().entry(key.clone()).or_default().clone();

            let provider = slot.get_or_try_init(|| self.build(key)).await?.clone();
            if !provider.is_valid() {
                tracing::info!("Dropping invalid provider for {}", key);
                self.evict_slot(key, &slot);
                continue;
            }

            // Invalidated while it was being built: the handle may carry the
            // old configuration, so build again from the current one.
            if !self.is_current(key, &slot) && attempt < MAX_ATTEMPTS {
                tracing::debug!("Provider for {} was invalidated during construction", key);
                continue;
            }
            return Ok(provider);
        }

        Err(Error::ProviderConstructionFailed(format!(
            "provider for {} became invalid right after construction",
            key
        )))
    }

    async fn build(&self, key: &TargetKey) -> Result<Arc<C::Provider>> {
        let config = self.resolver.resolve_key(key).await?;
        let descriptor = self.resolver.registry().lookup(key).ok_or_else(|| key.unsupported())?;

        tracing::info!("Connecting provider for {} ({})", key, config.endpoint);
        match self.connector.connect(descriptor, &config).await {
            Ok(provider) => Ok(Arc::new(provider)),
            Err(e) => {
                tracing::warn!("Provider construction for {} failed: {}", key, e);
                Err(e)
            }
        }
    }

    fn is_current(&self, key: &TargetKey, slot: &Slot<C::Provider>) -> bool {
        self.cache()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Remove `slot` only if it is still the cached one for `key`
    fn evict_slot(&self, key: &TargetKey, slot: &Slot<C::Provider>) {
        let mut cache = self.cache();
        if cache.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            cache.remove(key);
        }
    }

    /// Forget the cached provider so the next request resolves again
    pub fn invalidate(&self, chain: ChainKind, network: &str) {
        self.invalidate_key(&TargetKey::new(chain, network));
    }

    /// Callers already waiting on a construction that started before the
    /// invalidation wait for it to finish, then build once more from the
    /// current configuration. Only an invalidation that keeps arriving during
    /// the rebuild as well can hand out a handle built from older settings.
    pub fn invalidate_key(&self, key: &TargetKey) {
        if self.cache().remove(key).is_some() {
            tracing::info!("Invalidated cached provider for {}", key);
        }
    }

    /// Drop every cached provider, e.g. at session end
    pub fn invalidate_all(&self) {
        let mut cache = self.cache();
        let count = cache.len();
        cache.clear();
        if count > 0 {
            tracing::info!("Cleared {} cached providers", count);
        }
    }

    /// Targets with a finished provider in the cache
    pub fn cached_targets(&self) -> Vec<TargetKey> {
        let mut targets: Vec<TargetKey> = self
            .cache()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        targets.sort();
        targets
    }
}

impl<C: Connector> Invalidate for ProviderFactory<C> {
    fn invalidate(&self, key: &TargetKey) {
        self.invalidate_key(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompiledDefaults;
    use crate::provider::overrides::ProviderOverrides;
    use crate::registry::ChainRegistry;
    use crate::storage::{MemoryStore, Storage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct TestProvider {
        target: TargetKey,
        endpoint: String,
        valid: AtomicBool,
    }

    impl ProviderHandle for TestProvider {
        fn target(&self) -> &TargetKey {
            &self.target
        }

        fn is_valid(&self) -> bool {
            self.valid.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        attempts: AtomicUsize,
        failures_left: AtomicUsize,
        delay_ms: AtomicUsize,
        /// Networks whose construction never finishes
        stalled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Connector for Arc<CountingConnector> {
        type Provider = TestProvider;

        async fn connect(
            &self,
            descriptor: &ChainDescriptor,
            config: &ResolvedProviderConfig,
        ) -> Result<TestProvider> {
            self.attempts.fetch_add(1, Ordering::SeqCst);

            let stalled = self.stalled.lock().unwrap().contains(&descriptor.network);
            if stalled {
                std::future::pending::<()>().await;
            }

            let delay = self.delay_ms.load(Ordering::SeqCst) as u64;
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::ProviderConstructionFailed("endpoint unreachable".into()));
            }

            Ok(TestProvider {
                target: descriptor.key(),
                endpoint: config.endpoint.clone(),
                valid: AtomicBool::new(true),
            })
        }
    }

    fn mainnet() -> TargetKey {
        TargetKey::new(ChainKind::Cardano, "mainnet")
    }

    fn setup(storage: Storage) -> (Arc<ProviderFactory<Arc<CountingConnector>>>, Arc<CountingConnector>) {
        let defaults = CompiledDefaults::default()
            .insert(mainnet(), "https://a", "K1")
            .insert(TargetKey::new(ChainKind::Cardano, "preprod"), "https://b", "")
            .insert(TargetKey::new(ChainKind::Cardano, "preview"), "", "");
        let resolver = Arc::new(ProviderResolver::new(
            ChainRegistry::builtin(),
            Arc::new(defaults),
            storage,
        ));
        let connector = Arc::new(CountingConnector::default());
        let factory = Arc::new(ProviderFactory::new(resolver, connector.clone()));
        (factory, connector)
    }

    #[tokio::test]
    async fn test_concurrent_requests_construct_once() {
        let (factory, connector) = setup(Storage::in_memory());
        connector.delay_ms.store(50, Ordering::SeqCst);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let factory = factory.clone();
                tokio::spawn(async move { factory.get_provider(ChainKind::Cardano, "mainnet").await })
            })
            .collect();

        let mut providers = Vec::new();
        for task in tasks {
            providers.push(task.await.unwrap().unwrap());
        }

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(providers.iter().all(|p| Arc::ptr_eq(p, &providers[0])));
        assert_eq!(providers[0].endpoint, "https://a");
        assert_eq!(factory.cached_targets(), vec![mainnet()]);
    }

    #[tokio::test]
    async fn test_different_targets_do_not_block_each_other() {
        let (factory, connector) = setup(Storage::in_memory());
        connector.stalled.lock().unwrap().push("mainnet".to_string());

        let stuck = {
            let factory = factory.clone();
            tokio::spawn(async move { factory.get_provider(ChainKind::Cardano, "mainnet").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let preprod = tokio::time::timeout(
            Duration::from_secs(2),
            factory.get_provider(ChainKind::Cardano, "preprod"),
        )
        .await
        .expect("preprod must not wait for mainnet")
        .unwrap();
        assert_eq!(preprod.endpoint, "https://b");

        stuck.abort();
    }

    #[tokio::test]
    async fn test_failure_does_not_poison_cache() {
        let (factory, connector) = setup(Storage::in_memory());
        connector.failures_left.store(1, Ordering::SeqCst);

        let err = factory
            .get_provider(ChainKind::Cardano, "mainnet")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::ProviderConstructionFailed(_)));
        assert!(factory.cached_targets().is_empty());

        factory.get_provider(ChainKind::Cardano, "mainnet").await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolver_errors_pass_through() {
        let (factory, connector) = setup(Storage::in_memory());

        let err = factory
            .get_provider(ChainKind::Cardano, "preview")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingEndpoint { .. }));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_target() {
        let plain = Arc::new(MemoryStore::new());
        let secure = Arc::new(MemoryStore::new());
        let (factory, _) = setup(Storage::new(plain.clone(), secure.clone()));

        let err = factory
            .get_provider(ChainKind::Cardano, "testnet99")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedTarget { .. }));
        assert!(plain.is_empty().await);
        assert!(secure.is_empty().await);
        assert!(factory.cached_targets().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_construction_leaves_no_entry() {
        let (factory, connector) = setup(Storage::in_memory());
        connector.delay_ms.store(5_000, Ordering::SeqCst);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            factory.get_provider(ChainKind::Cardano, "mainnet"),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(factory.cached_targets().is_empty());

        connector.delay_ms.store(0, Ordering::SeqCst);
        factory.get_provider(ChainKind::Cardano, "mainnet").await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_picks_up_changed_override() {
        let storage = Storage::in_memory();
        let (factory, connector) = setup(storage.clone());
        let overrides = ProviderOverrides::new(storage.clone(), ChainRegistry::builtin());

        let first = factory.get_provider(ChainKind::Cardano, "mainnet").await.unwrap();
        assert_eq!(first.endpoint, "https://a");

        // Writing without the hook leaves the cached handle in place
        overrides
            .set_endpoint(&mainnet(), Some("https://custom"))
            .await
            .unwrap();
        let cached = factory.get_provider(ChainKind::Cardano, "mainnet").await.unwrap();
        assert!(Arc::ptr_eq(&first, &cached));

        factory.invalidate(ChainKind::Cardano, "mainnet");
        let fresh = factory.get_provider(ChainKind::Cardano, "mainnet").await.unwrap();
        assert_eq!(fresh.endpoint, "https://custom");
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_override_editor_invalidates_through_hook() {
        let storage = Storage::in_memory();
        let (factory, _) = setup(storage.clone());
        let overrides = ProviderOverrides::new(storage, ChainRegistry::builtin())
            .with_invalidator(factory.clone());

        factory.get_provider(ChainKind::Cardano, "mainnet").await.unwrap();
        overrides
            .set_endpoint(&mainnet(), Some("https://custom"))
            .await
            .unwrap();
        assert!(factory.cached_targets().is_empty());

        let fresh = factory.get_provider(ChainKind::Cardano, "mainnet").await.unwrap();
        assert_eq!(fresh.endpoint, "https://custom");
    }

    #[tokio::test]
    async fn test_invalidate_during_construction_rebuilds() {
        let storage = Storage::in_memory();
        let (factory, connector) = setup(storage.clone());
        let overrides = ProviderOverrides::new(storage, ChainRegistry::builtin())
            .with_invalidator(factory.clone());
        connector.delay_ms.store(100, Ordering::SeqCst);

        let pending = {
            let factory = factory.clone();
            tokio::spawn(async move { factory.get_provider(ChainKind::Cardano, "mainnet").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        overrides
            .set_endpoint(&mainnet(), Some("https://custom"))
            .await
            .unwrap();

        let provider = pending.await.unwrap().unwrap();
        assert_eq!(provider.endpoint, "https://custom");
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(factory.cached_targets(), vec![mainnet()]);
    }

    #[tokio::test]
    async fn test_invalid_handle_is_rebuilt() {
        let (factory, connector) = setup(Storage::in_memory());

        let first = factory.get_provider(ChainKind::Cardano, "mainnet").await.unwrap();
        first.valid.store(false, Ordering::SeqCst);

        let second = factory.get_provider(ChainKind::Cardano, "mainnet").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let (factory, _) = setup(Storage::in_memory());
        factory.get_provider(ChainKind::Cardano, "mainnet").await.unwrap();
        factory.get_provider(ChainKind::Cardano, "preprod").await.unwrap();
        assert_eq!(factory.cached_targets().len(), 2);

        factory.invalidate_all();
        assert!(factory.cached_targets().is_empty());
    }
}
