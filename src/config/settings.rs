use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::registry::{ChainKind, TargetKey};
use crate::secret::Secret;

const CONFIG_DIR: &str = "chainkeys";
const CONFIG_FILE: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// chain -> network -> endpoint settings
    #[serde(default)]
    pub providers: BTreeMap<String, BTreeMap<String, ProviderDefaults>>,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub wallet: WalletSettings,

    #[serde(default)]
    pub network: NetworkSettings,

    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderDefaults {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
}

impl std::fmt::Debug for ProviderDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDefaults")
            .field("endpoint", &self.endpoint)
            .field("api_key", &if self.api_key.is_empty() { "<empty>" } else { "<redacted>" })
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecureBackend {
    #[default]
    Keychain,
    /// Secrets are kept only for the lifetime of the process
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub secure_backend: SecureBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSettings {
    /// Argon2id memory cost in KiB
    pub kdf_memory_kib: u32,
    pub kdf_iterations: u32,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            kdf_memory_kib: 19_456,
            kdf_iterations: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Issue a health request while building a provider
    pub probe_on_connect: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            probe_on_connect: false,
        }
    }
}

impl Settings {
    /// Load configuration from the default location, or built-in defaults.
    /// Environment overrides are applied in both cases.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        let mut settings = if config_path.exists() {
            Self::read(&config_path)?
        } else {
            Self {
                config_path: Some(config_path),
                ..builtin_settings()
            }
        };

        settings.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = Self::read(path)?;
        settings.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {:?}", path))?;

        let mut settings: Settings =
            toml::from_str(&content).wrap_err("Failed to parse config file")?;

        settings.config_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// File the settings came from, or the default location
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config_path.clone().or_else(|| Self::default_config_path().ok())
    }

    fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| eyre::eyre!("Could not determine config directory"))?;

        Ok(config_dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Directory holding the plain settings store
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage.data_dir {
            return Ok(dir.clone());
        }
        let data_dir =
            dirs::data_dir().ok_or_else(|| eyre::eyre!("Could not determine data directory"))?;
        Ok(data_dir.join(CONFIG_DIR))
    }

    /// Apply `CHAINKEYS_<CHAIN>_<NETWORK>_ENDPOINT` / `_API_KEY` overrides for
    /// every configured target.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (chain, networks) in self.providers.iter_mut() {
            let Ok(kind) = chain.parse::<ChainKind>() else {
                continue;
            };
            for (network, defaults) in networks.iter_mut() {
                let prefix = TargetKey::new(kind, network.clone()).env_prefix();

                if let Some(endpoint) = lookup(&format!("{}_ENDPOINT", prefix)) {
                    tracing::debug!("Endpoint for {}/{} taken from environment", chain, network);
                    defaults.endpoint = endpoint;
                }
                if let Some(api_key) = lookup(&format!("{}_API_KEY", prefix)) {
                    tracing::debug!("API key for {}/{} taken from environment", chain, network);
                    defaults.api_key = api_key;
                }
            }
        }
    }

    /// Freeze the provider section into the immutable defaults table
    pub fn compiled_defaults(&self) -> CompiledDefaults {
        let entries = self
            .providers
            .iter()
            .filter_map(|(chain, networks)| match chain.parse::<ChainKind>() {
                Ok(kind) => Some((kind, networks)),
                Err(e) => {
                    tracing::warn!("Ignoring provider defaults: {}", e);
                    None
                }
            })
            .flat_map(|(kind, networks)| {
                networks.iter().map(move |(network, d)| {
                    (
                        TargetKey::new(kind, network.clone()),
                        DefaultEntry {
                            endpoint: d.endpoint.trim().to_string(),
                            api_key: Secret::new(d.api_key.clone()),
                        },
                    )
                })
            })
            .collect();

        CompiledDefaults { entries }
    }
}

/// Built-in configuration used when no config file exists
pub fn builtin_settings() -> Settings {
    let mut cardano = BTreeMap::new();

    for network in ["mainnet", "preprod", "preview"] {
        cardano.insert(
            network.to_string(),
            ProviderDefaults {
                endpoint: format!("https://cardano-{}.blockfrost.io/api/v0", network),
                api_key: String::new(),
            },
        );
    }

    let mut providers = BTreeMap::new();
    providers.insert(ChainKind::Cardano.to_string(), cardano);

    Settings {
        providers,
        ..Default::default()
    }
}

/// Endpoint and API key shipped for one target
#[derive(Debug, Clone)]
pub struct DefaultEntry {
    pub endpoint: String,
    pub api_key: Secret,
}

/// Per-target defaults, fixed at startup
#[derive(Debug, Clone, Default)]
pub struct CompiledDefaults {
    entries: BTreeMap<TargetKey, DefaultEntry>,
}

impl CompiledDefaults {
    pub fn get(&self, key: &TargetKey) -> Option<&DefaultEntry> {
        self.entries.get(key)
    }

    pub fn insert(mut self, key: TargetKey, endpoint: &str, api_key: &str) -> Self {
        self.entries.insert(
            key,
            DefaultEntry {
                endpoint: endpoint.to_string(),
                api_key: Secret::new(api_key),
            },
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_config() {
        let content = r#"
[providers.cardano.mainnet]
endpoint = "https://a"
api_key = "K1"

[providers.cardano.preprod]
endpoint = "https://b"

[storage]
secure_backend = "memory"

[network]
connect_timeout_secs = 5
request_timeout_secs = 15
probe_on_connect = true
"#;

        let settings: Settings = toml::from_str(content).unwrap();
        assert_eq!(settings.providers["cardano"].len(), 2);
        assert_eq!(settings.storage.secure_backend, SecureBackend::Memory);
        assert!(settings.network.probe_on_connect);
        assert_eq!(settings.wallet.kdf_iterations, 2);

        let defaults = settings.compiled_defaults();
        let mainnet = defaults
            .get(&TargetKey::new(ChainKind::Cardano, "mainnet"))
            .unwrap();
        assert_eq!(mainnet.endpoint, "https://a");
        assert_eq!(mainnet.api_key.expose(), "K1");

        let preprod = defaults
            .get(&TargetKey::new(ChainKind::Cardano, "preprod"))
            .unwrap();
        assert!(preprod.api_key.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = builtin_settings();
        let env: HashMap<&str, &str> = [
            ("CHAINKEYS_CARDANO_MAINNET_ENDPOINT", "https://env"),
            ("CHAINKEYS_CARDANO_PREVIEW_API_KEY", "envkey"),
        ]
        .into_iter()
        .collect();

        settings.apply_env_overrides(|name| env.get(name).map(|v| v.to_string()));
        let defaults = settings.compiled_defaults();

        let mainnet = defaults
            .get(&TargetKey::new(ChainKind::Cardano, "mainnet"))
            .unwrap();
        assert_eq!(mainnet.endpoint, "https://env");

        let preview = defaults
            .get(&TargetKey::new(ChainKind::Cardano, "preview"))
            .unwrap();
        assert_eq!(preview.api_key.expose(), "envkey");
        assert!(preview.endpoint.contains("preview"));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let d = ProviderDefaults {
            endpoint: "https://a".into(),
            api_key: "K1".into(),
        };
        assert!(!format!("{:?}", d).contains("K1"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[providers.cardano.preprod]
endpoint = "https://preprod.example"
api_key = "pk"

[storage]
secure_backend = "memory"

[network]
connect_timeout_secs = 3
request_timeout_secs = 5
probe_on_connect = true
"#,
        )
        .unwrap();

        let loaded = Settings::read(&path).unwrap();
        assert_eq!(loaded.providers["cardano"].len(), 1);
        assert_eq!(loaded.storage.secure_backend, SecureBackend::Memory);
        assert_eq!(loaded.network.connect_timeout_secs, 3);
        assert!(loaded.network.probe_on_connect);
        assert_eq!(loaded.config_path(), Some(path));
    }
}
