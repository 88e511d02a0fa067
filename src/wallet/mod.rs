mod crypto;
mod manager;

pub use crypto::{open, seal, KdfParams, SealedSeed};
pub use manager::{Account, WalletManager, WalletRecord, WalletState};
