mod settings;

pub use settings::{
    builtin_settings, CompiledDefaults, DefaultEntry, NetworkSettings, ProviderDefaults,
    SecureBackend, Settings, StorageSettings, WalletSettings,
};
