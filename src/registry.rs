use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Supported ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Cardano,
}

impl ChainKind {
    pub const ALL: [ChainKind; 1] = [ChainKind::Cardano];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Cardano => "cardano",
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ChainKind::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown chain: {}", s))
    }
}

/// A (chain, network) pair. Every store key and cache key is derived here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub chain: ChainKind,
    pub network: String,
}

impl TargetKey {
    pub fn new(chain: ChainKind, network: impl Into<String>) -> Self {
        Self {
            chain,
            network: network.into(),
        }
    }

    /// Plain-store key of the user override record
    pub fn override_key(&self) -> String {
        format!("provider:{}:{}", self.chain, self.network)
    }

    /// Secure-store key of the custom API key
    pub fn secret_key(&self) -> String {
        format!("provider-secret:{}:{}", self.chain, self.network)
    }

    /// Prefix of the environment variables overriding compiled defaults,
    /// e.g. `CHAINKEYS_CARDANO_MAINNET`.
    pub fn env_prefix(&self) -> String {
        format!("CHAINKEYS_{}_{}", self.chain, self.network)
            .to_uppercase()
            .replace('-', "_")
    }

    pub(crate) fn unsupported(&self) -> Error {
        Error::UnsupportedTarget {
            chain: self.chain,
            network: self.network.clone(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chain, self.network)
    }
}

/// Descriptive metadata for one supported target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainDescriptor {
    pub chain: ChainKind,
    pub network: String,
    pub symbol: String,
    pub display_name: String,
    pub decimals: u8,
}

impl ChainDescriptor {
    pub fn key(&self) -> TargetKey {
        TargetKey::new(self.chain, self.network.clone())
    }
}

/// Immutable catalog of supported targets.
///
/// Descriptors live in a flat list; lookups go through an index keyed by
/// [`TargetKey`]. Adding a chain means adding rows to the built-in table.
#[derive(Debug)]
pub struct ChainRegistry {
    descriptors: Vec<ChainDescriptor>,
    index: HashMap<TargetKey, usize>,
}

impl ChainRegistry {
    pub fn new(descriptors: Vec<ChainDescriptor>) -> Self {
        let index = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.key(), i))
            .collect();
        Self { descriptors, index }
    }

    /// The compiled-in catalog, built once per process.
    pub fn builtin() -> Arc<ChainRegistry> {
        static BUILTIN: LazyLock<Arc<ChainRegistry>> =
            LazyLock::new(|| Arc::new(ChainRegistry::new(builtin_descriptors())));
        Arc::clone(&BUILTIN)
    }

    /// Look up a target, or `None` if it is not in the catalog
    pub fn lookup(&self, key: &TargetKey) -> Option<&ChainDescriptor> {
        self.index.get(key).map(|&i| &self.descriptors[i])
    }

    pub fn describe(&self, chain: ChainKind, network: &str) -> Result<&ChainDescriptor> {
        let key = TargetKey::new(chain, network);
        self.lookup(&key).ok_or_else(|| key.unsupported())
    }

    pub fn contains(&self, key: &TargetKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn targets(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.descriptors.iter()
    }

    pub fn networks(&self, chain: ChainKind) -> Vec<&str> {
        self.descriptors
            .iter()
            .filter(|d| d.chain == chain)
            .map(|d| d.network.as_str())
            .collect()
    }
}

fn builtin_descriptors() -> Vec<ChainDescriptor> {
    let cardano = |network: &str, symbol: &str, display_name: &str| ChainDescriptor {
        chain: ChainKind::Cardano,
        network: network.to_string(),
        symbol: symbol.to_string(),
        display_name: display_name.to_string(),
        decimals: 6,
    };

    vec![
        cardano("mainnet", "ADA", "Cardano Mainnet"),
        cardano("preprod", "tADA", "Cardano Preprod Testnet"),
        cardano("preview", "tADA", "Cardano Preview Testnet"),
    ]
}
