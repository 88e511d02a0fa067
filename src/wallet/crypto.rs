use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::WalletSettings;
use crate::error::{Error, Result};

const AES_NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl From<&WalletSettings> for KdfParams {
    fn from(settings: &WalletSettings) -> Self {
        Self {
            memory_kib: settings.kdf_memory_kib,
            iterations: settings.kdf_iterations,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::from(&WalletSettings::default())
    }
}

/// Seed material encrypted under a passphrase.
///
/// Hex fields; `ciphertext` includes the GCM tag. The KDF parameters are
/// stored alongside so they can change without breaking older wallets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedSeed {
    pub kdf: KdfParams,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

fn derive_key(passphrase: &str, salt: &[u8], kdf: KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, 1, Some(32))
        .map_err(|e| Error::Sealing(format!("invalid KDF parameters: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| Error::Sealing(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

/// Encrypt `seed` with a key derived from `passphrase`
pub fn seal(seed: &[u8], passphrase: &str, kdf: KdfParams) -> Result<SealedSeed> {
    let salt: [u8; SALT_LEN] = rand::random();
    let nonce_bytes: [u8; AES_NONCE_LEN] = rand::random();

    let key = derive_key(passphrase, &salt, kdf)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), seed)
        .map_err(|e| Error::Sealing(format!("encryption failed: {}", e)))?;

    Ok(SealedSeed {
        kdf,
        salt: hex::encode(salt),
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    })
}

/// Decrypt a sealed seed. A wrong passphrase fails GCM authentication and is
/// reported as [`Error::InvalidPassphrase`].
pub fn open(sealed: &SealedSeed, passphrase: &str) -> Result<Zeroizing<Vec<u8>>> {
    let decode = |field: &str, value: &str| {
        hex::decode(value).map_err(|_| Error::Sealing(format!("corrupt {} in sealed seed", field)))
    };
    let salt = decode("salt", &sealed.salt)?;
    let nonce = decode("nonce", &sealed.nonce)?;
    let ciphertext = decode("ciphertext", &sealed.ciphertext)?;
    if nonce.len() != AES_NONCE_LEN {
        return Err(Error::Sealing("corrupt nonce in sealed seed".to_string()));
    }

    let key = derive_key(passphrase, &salt, sealed.kdf)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| Error::InvalidPassphrase)
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        memory_kib: 256,
        iterations: 1,
    }
}
