use std::sync::Arc;

use eyre::{Result, WrapErr};

use crate::config::{CompiledDefaults, SecureBackend, Settings};
use crate::provider::{Connector, HttpConnector, ProviderFactory, ProviderOverrides, ProviderResolver};
use crate::registry::ChainRegistry;
use crate::storage::{FileStore, KeyValueStore, KeychainStore, MemoryStore, Storage};
use crate::wallet::{KdfParams, WalletManager};

const SETTINGS_STORE_FILE: &str = "settings.json";

/// How long factories and wallet managers live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// One provider cache and one wallet manager for the whole process
    #[default]
    Shared,
    /// Fresh provider cache and wallet manager per session; stores, registry
    /// and resolver are still shared
    PerSession,
}

/// Per-session services
pub struct Session<C: Connector> {
    pub factory: Arc<ProviderFactory<C>>,
    pub wallets: Arc<WalletManager<C>>,
    pub overrides: Arc<ProviderOverrides>,
}

impl<C: Connector> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            wallets: Arc::clone(&self.wallets),
            overrides: Arc::clone(&self.overrides),
        }
    }
}

impl<C: Connector> Session<C> {
    /// Lock wallets and drop cached providers
    pub async fn end(&self) {
        self.wallets.lock_all().await;
        self.factory.invalidate_all();
    }
}

/// Everything wired together in dependency order: storage, registry,
/// resolver, then factory and wallet manager.
pub struct App<C: Connector + Clone> {
    storage: Storage,
    registry: Arc<ChainRegistry>,
    resolver: Arc<ProviderResolver>,
    connector: C,
    kdf: KdfParams,
    lifetime: Lifetime,
    shared: Session<C>,
}

impl App<HttpConnector> {
    /// Build the application from loaded settings
    pub fn bootstrap(settings: &Settings, lifetime: Lifetime) -> Result<Self> {
        let data_dir = settings.data_dir()?;
        let plain = FileStore::open(data_dir.join(SETTINGS_STORE_FILE))
            .wrap_err("Failed to open settings store")?;

        let secure: Arc<dyn KeyValueStore> = match settings.storage.secure_backend {
            SecureBackend::Keychain => Arc::new(KeychainStore::new()),
            SecureBackend::Memory => {
                tracing::warn!("Secure store is in-memory; secrets will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        tracing::info!("Settings store at {:?}", plain.path());
        Ok(Self::new(
            Storage::new(Arc::new(plain), secure),
            ChainRegistry::builtin(),
            settings.compiled_defaults(),
            HttpConnector::new(&settings.network),
            KdfParams::from(&settings.wallet),
            lifetime,
        ))
    }
}

impl<C: Connector + Clone> App<C> {
    pub fn new(
        storage: Storage,
        registry: Arc<ChainRegistry>,
        defaults: CompiledDefaults,
        connector: C,
        kdf: KdfParams,
        lifetime: Lifetime,
    ) -> Self {
        let resolver = Arc::new(ProviderResolver::new(
            registry.clone(),
            Arc::new(defaults),
            storage.clone(),
        ));
        let shared = build_session(&storage, &registry, &resolver, connector.clone(), kdf);

        Self {
            storage,
            registry,
            resolver,
            connector,
            kdf,
            lifetime,
            shared,
        }
    }

    /// Services for one session. Under [`Lifetime::Shared`] every session
    /// gets the same instances.
    pub fn session(&self) -> Session<C> {
        match self.lifetime {
            Lifetime::Shared => self.shared.clone(),
            Lifetime::PerSession => build_session(
                &self.storage,
                &self.registry,
                &self.resolver,
                self.connector.clone(),
                self.kdf,
            ),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<ProviderResolver> {
        &self.resolver
    }
}

fn build_session<C: Connector>(
    storage: &Storage,
    registry: &Arc<ChainRegistry>,
    resolver: &Arc<ProviderResolver>,
    connector: C,
    kdf: KdfParams,
) -> Session<C> {
    let factory = Arc::new(ProviderFactory::new(resolver.clone(), connector));
    let wallets = Arc::new(WalletManager::new(storage.clone(), factory.clone(), kdf));
    let overrides = Arc::new(
        ProviderOverrides::new(storage.clone(), registry.clone()).with_invalidator(factory.clone()),
    );

    Session {
        factory,
        wallets,
        overrides,
    }
}
