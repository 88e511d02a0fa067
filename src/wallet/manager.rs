use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::crypto::{self, KdfParams, SealedSeed};
use crate::error::{Error, Result};
use crate::provider::{Connector, ProviderFactory};
use crate::registry::TargetKey;
use crate::storage::Storage;

const WALLET_INDEX_KEY: &str = "wallets";
const SEED_LEN: usize = 32;

fn record_key(id: &str) -> String {
    format!("wallet:{}", id)
}

fn secret_key(id: &str) -> String {
    format!("wallet-secret:{}", id)
}

/// Lifecycle state of one wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletState {
    Uninitialized,
    Locked,
    Unlocked,
    Deleted,
}

/// Non-secret wallet metadata, kept in the plain store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub index: u32,
    pub target: TargetKey,
    pub label: Option<String>,
}

enum Slot {
    Locked,
    Unlocked(Zeroizing<Vec<u8>>),
    Deleted,
}

type SlotRef = Arc<tokio::sync::Mutex<Slot>>;

/// Owns wallet lifecycle and seed material.
///
/// Seeds are sealed under the user's passphrase and written only to the
/// secure store. Every operation on a wallet takes that wallet's own lock,
/// so two unlocks of the same wallet never decrypt concurrently while
/// different wallets proceed independently.
pub struct WalletManager<C: Connector> {
    storage: Storage,
    factory: Arc<ProviderFactory<C>>,
    kdf: KdfParams,
    slots: Mutex<HashMap<String, SlotRef>>,
    index_lock: tokio::sync::Mutex<()>,
}

impl<C: Connector> WalletManager<C> {
    pub fn new(storage: Storage, factory: Arc<ProviderFactory<C>>, kdf: KdfParams) -> Self {
        Self {
            storage,
            factory,
            kdf,
            slots: Mutex::new(HashMap::new()),
            index_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, SlotRef>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock slot for a wallet that exists in storage. Unknown ids are
    /// rejected without being tracked.
    async fn slot(&self, id: &str) -> Result<SlotRef> {
        let existing = self.slots().get(id).cloned();
        if let Some(slot) = existing {
            return Ok(slot);
        }

        let known = self.storage.get(&record_key(id)).await?.is_some()
            || self.storage.get_secure(&secret_key(id)).await?.is_some();
        if !known {
            return Err(Error::WalletNotFound(id.to_string()));
        }

        Ok(self
            .slots()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Slot::Locked)))
            .clone())
    }

    /// Create a wallet from a fresh random seed
    pub async fn generate(&self, name: &str, passphrase: &str) -> Result<WalletRecord> {
        let seed = Zeroizing::new(rand::random::<[u8; SEED_LEN]>().to_vec());
        self.create(name, seed, passphrase).await
    }

    /// Create a wallet from existing seed material. The wallet starts locked.
    pub async fn create(
        &self,
        name: &str,
        seed: Zeroizing<Vec<u8>>,
        passphrase: &str,
    ) -> Result<WalletRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let sealed = self.seal(seed, passphrase).await?;

        // The secret goes first; a wallet record never exists without one
        self.storage.set_secure_typed(&secret_key(&id), &sealed).await?;

        let record = WalletRecord {
            id: id.clone(),
            name: name.to_string(),
            created_at: Utc::now(),
            accounts: Vec::new(),
        };
        if let Err(e) = self.save_record(&record).await {
            self.discard(&id).await;
            return Err(e);
        }
        if let Err(e) = self.update_index(|ids| ids.push(id.clone())).await {
            self.discard(&id).await;
            return Err(e);
        }

        self.slots()
            .insert(id.clone(), Arc::new(tokio::sync::Mutex::new(Slot::Locked)));
        tracing::info!(wallet_id = %id, "wallet created");
        Ok(record)
    }

    pub async fn list(&self) -> Result<Vec<WalletRecord>> {
        let ids: Vec<String> = self
            .storage
            .get_typed(WALLET_INDEX_KEY)
            .await?
            .unwrap_or_default();

        let mut wallets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.storage.get_typed(&record_key(&id)).await? {
                wallets.push(record);
            }
        }
        Ok(wallets)
    }

    pub async fn get(&self, id: &str) -> Result<WalletRecord> {
        self.storage
            .get_typed(&record_key(id))
            .await?
            .ok_or_else(|| Error::WalletNotFound(id.to_string()))
    }

    pub async fn state(&self, id: &str) -> Result<WalletState> {
        let slot = self.slots().get(id).cloned();
        if let Some(slot) = slot {
            return Ok(match &*slot.lock().await {
                Slot::Locked => WalletState::Locked,
                Slot::Unlocked(_) => WalletState::Unlocked,
                Slot::Deleted => WalletState::Deleted,
            });
        }

        let stored: Option<WalletRecord> = self.storage.get_typed(&record_key(id)).await?;
        Ok(if stored.is_some() {
            WalletState::Locked
        } else {
            WalletState::Uninitialized
        })
    }

    /// Decrypt the seed into memory.
    ///
    /// Returns `true` if this call decrypted it, `false` if the wallet was
    /// already unlocked. A wrong passphrase leaves the wallet locked.
    pub async fn unlock(&self, id: &str, passphrase: &str) -> Result<bool> {
        let slot = self.slot(id).await?;
        let mut guard = slot.lock().await;

        match &*guard {
            Slot::Unlocked(_) => return Ok(false),
            Slot::Deleted => return Err(Error::WalletDeleted(id.to_string())),
            Slot::Locked => {}
        }

        let sealed: SealedSeed = self
            .storage
            .get_secure_typed(&secret_key(id))
            .await?
            .ok_or_else(|| Error::WalletNotFound(id.to_string()))?;

        let passphrase = Zeroizing::new(passphrase.to_string());
        let opened = tokio::task::spawn_blocking(move || crypto::open(&sealed, &passphrase))
            .await
            .map_err(|e| Error::Sealing(format!("unlock task failed: {}", e)))?;

        match opened {
            Ok(seed) => {
                *guard = Slot::Unlocked(seed);
                tracing::info!(wallet_id = %id, "wallet unlocked");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(wallet_id = %id, "wallet unlock failed: {}", e);
                Err(e)
            }
        }
    }

    /// Drop the in-memory seed
    pub async fn lock(&self, id: &str) -> Result<()> {
        let slot = self.slot(id).await?;
        let mut guard = slot.lock().await;
        match &*guard {
            Slot::Deleted => Err(Error::WalletDeleted(id.to_string())),
            Slot::Locked => Ok(()),
            Slot::Unlocked(_) => {
                *guard = Slot::Locked;
                tracing::info!(wallet_id = %id, "wallet locked");
                Ok(())
            }
        }
    }

    /// Lock every wallet, e.g. when the session ends
    pub async fn lock_all(&self) {
        let slots: Vec<SlotRef> = self.slots().values().cloned().collect();
        for slot in slots {
            let mut guard = slot.lock().await;
            if matches!(&*guard, Slot::Unlocked(_)) {
                *guard = Slot::Locked;
            }
        }
        tracing::info!("all wallets locked");
    }

    /// Erase the wallet's secret and metadata. Works from any state.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let slot = self.slot(id).await?;
        let mut guard = slot.lock().await;

        // A failed secure delete aborts before anything else changes
        self.storage.remove_secure(&secret_key(id)).await?;
        self.storage.remove(&record_key(id)).await?;
        self.update_index(|ids| ids.retain(|known| known != id)).await?;

        *guard = Slot::Deleted;
        tracing::info!(wallet_id = %id, "wallet removed");
        Ok(())
    }

    /// Run `f` with the decrypted seed. The seed never leaves the closure.
    pub async fn with_seed<R>(&self, id: &str, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let slot = self.slot(id).await?;
        let guard = slot.lock().await;
        match &*guard {
            Slot::Unlocked(seed) => Ok(f(seed.as_slice())),
            Slot::Locked => Err(Error::WalletLocked(id.to_string())),
            Slot::Deleted => Err(Error::WalletDeleted(id.to_string())),
        }
    }

    /// Re-seal the seed under a new passphrase. The wallet must be unlocked
    /// and `current` must still open the stored secret.
    pub async fn change_passphrase(&self, id: &str, current: &str, new: &str) -> Result<()> {
        let slot = self.slot(id).await?;
        let guard = slot.lock().await;
        let seed = match &*guard {
            Slot::Unlocked(seed) => seed.clone(),
            Slot::Locked => return Err(Error::WalletLocked(id.to_string())),
            Slot::Deleted => return Err(Error::WalletDeleted(id.to_string())),
        };

        let sealed: SealedSeed = self
            .storage
            .get_secure_typed(&secret_key(id))
            .await?
            .ok_or_else(|| Error::WalletNotFound(id.to_string()))?;
        let current = Zeroizing::new(current.to_string());
        tokio::task::spawn_blocking(move || crypto::open(&sealed, &current))
            .await
            .map_err(|e| Error::Sealing(format!("verify task failed: {}", e)))??;

        let resealed = self.seal(seed, new).await?;
        self.storage.set_secure_typed(&secret_key(id), &resealed).await?;

        tracing::info!(wallet_id = %id, "wallet passphrase changed");
        Ok(())
    }

    /// Add an account on a supported target. Requires an unlocked wallet.
    pub async fn add_account(
        &self,
        id: &str,
        target: TargetKey,
        label: Option<&str>,
    ) -> Result<Account> {
        if !self.factory.resolver().registry().contains(&target) {
            return Err(target.unsupported());
        }

        let slot = self.slot(id).await?;
        let guard = slot.lock().await;
        match &*guard {
            Slot::Unlocked(_) => {}
            Slot::Locked => return Err(Error::WalletLocked(id.to_string())),
            Slot::Deleted => return Err(Error::WalletDeleted(id.to_string())),
        }

        let mut record = self.get(id).await?;
        let account = Account {
            index: record.accounts.len() as u32,
            target,
            label: label.map(str::to_string),
        };
        record.accounts.push(account.clone());
        self.save_record(&record).await?;

        tracing::info!(wallet_id = %id, account = account.index, "account added for {}", account.target);
        Ok(account)
    }

    /// Chain connection for an account, obtained through the provider factory
    pub async fn provider_for(&self, id: &str, account_index: u32) -> Result<Arc<C::Provider>> {
        let record = self.get(id).await?;
        let account = record
            .accounts
            .iter()
            .find(|a| a.index == account_index)
            .ok_or_else(|| Error::WalletNotFound(format!("{} account {}", id, account_index)))?;

        match self.factory.get(&account.target).await {
            Ok(provider) => Ok(provider),
            Err(e @ Error::ProviderConstructionFailed(_)) => {
                tracing::warn!(wallet_id = %id, "endpoint unreachable for {}, check provider settings", account.target);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn seal(&self, seed: Zeroizing<Vec<u8>>, passphrase: &str) -> Result<SealedSeed> {
        let kdf = self.kdf;
        let passphrase = Zeroizing::new(passphrase.to_string());
        tokio::task::spawn_blocking(move || crypto::seal(&seed, &passphrase, kdf))
            .await
            .map_err(|e| Error::Sealing(format!("seal task failed: {}", e)))?
    }

    /// Roll back a half-created wallet
    async fn discard(&self, id: &str) {
        if let Err(e) = self.storage.remove(&record_key(id)).await {
            tracing::warn!("Failed to clean up record of unsaved wallet {}: {}", id, e);
        }
        if let Err(e) = self.storage.remove_secure(&secret_key(id)).await {
            tracing::warn!("Failed to clean up secret of unsaved wallet {}: {}", id, e);
        }
    }

    async fn save_record(&self, record: &WalletRecord) -> Result<()> {
        self.storage.set_typed(&record_key(&record.id), record).await
    }

    async fn update_index(&self, f: impl FnOnce(&mut Vec<String>)) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut ids: Vec<String> = self
            .storage
            .get_typed(WALLET_INDEX_KEY)
            .await?
            .unwrap_or_default();
        f(&mut ids);
        self.storage.set_typed(WALLET_INDEX_KEY, &ids).await
    }
}
