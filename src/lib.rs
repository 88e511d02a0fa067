//! Provider configuration and credential resolution for a multi-chain wallet.
//!
//! Given a (chain, network) target, [`provider::ProviderResolver`] merges
//! compiled-in defaults, user overrides from the plain store and API keys
//! from the secure store; [`provider::ProviderFactory`] turns the result into
//! one cached connection per target; [`wallet::WalletManager`] keeps seed
//! material in the secure store and reaches chains only through the factory.
//! [`app::App`] wires it all together.

pub mod app;
pub mod config;
pub mod error;
pub mod provider;
pub mod registry;
pub mod secret;
pub mod storage;
pub mod wallet;

pub use error::{Error, Result};
pub use registry::{ChainDescriptor, ChainKind, ChainRegistry, TargetKey};
pub use secret::Secret;
