use thiserror::Error;

use crate::registry::ChainKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the storage, resolution, provider and wallet layers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported target: {chain}/{network}")]
    UnsupportedTarget { chain: ChainKind, network: String },

    #[error("no endpoint configured for {chain}/{network}")]
    MissingEndpoint { chain: ChainKind, network: String },

    #[error("custom API key enabled for {chain}/{network} but no key is stored")]
    MissingSecret { chain: ChainKind, network: String },

    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    #[error("provider construction failed: {0}")]
    ProviderConstructionFailed(String),

    #[error("provider request failed: {0}")]
    RequestFailed(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("wallet {0} is locked")]
    WalletLocked(String),

    #[error("wallet {0} not found")]
    WalletNotFound(String),

    #[error("wallet {0} has been deleted")]
    WalletDeleted(String),

    #[error("invalid passphrase")]
    InvalidPassphrase,

    #[error("secret sealing failed: {0}")]
    Sealing(String),
}

impl Error {
    /// Whether the same call can succeed later once the user fixes settings
    /// or connectivity returns.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::MissingEndpoint { .. }
                | Error::MissingSecret { .. }
                | Error::ProviderConstructionFailed(_)
                | Error::RequestFailed(_)
                | Error::WalletLocked(_)
                | Error::InvalidPassphrase
        )
    }

    /// Configuration problems the user has to fix in provider settings.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedTarget { .. }
                | Error::MissingEndpoint { .. }
                | Error::MissingSecret { .. }
                | Error::InvalidEndpoint(_)
        )
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Error::StorageUnavailable(format!("{}: {}", context, err))
    }
}
