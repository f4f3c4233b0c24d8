//! Seed vault
//!
//! Custodial family seeds are sealed at rest with Argon2id + AES-256-GCM
//! under the vault master secret. Opening a sealed seed yields a scoped
//! guard backed by page-locked memory; the plaintext never outlives the
//! guard.
//!
//! # Security Notes
//!
//! - Argon2id is memory-hard (resistant to GPU/ASIC attacks)
//! - AES-256-GCM provides authenticated encryption
//! - Each sealing uses a fresh random salt and nonce
//! - The master secret is never stored

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::memory::SecretBuf;
use crate::wallet::{FamilySeed, Keypair, WalletError};

/// Argon2id parameters (OWASP recommendations for 2024+)
/// - m_cost: 64 MiB memory
/// - t_cost: 3 iterations
/// - p_cost: 4 parallel threads
const ARGON2_M_COST: u32 = 65536;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;

/// Salt length for Argon2id
const SALT_LEN: usize = 16;

/// Nonce length for AES-256-GCM
const NONCE_LEN: usize = 12;

/// Plaintext length: the 16-byte seed entropy
const SEED_PLAINTEXT_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Sealing failed: {0}")]
    SealFailed(String),
    #[error("Opening failed: wrong master secret or corrupted data")]
    OpenFailed,
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("Invalid sealed seed format")]
    InvalidFormat,
}

/// Sealed seed layout:
/// `[salt (16 bytes)][nonce (12 bytes)][ciphertext (16 + 16 bytes)]`
/// Total: 60 bytes, stored as 120 hex characters.
pub struct SealedSeed {
    /// Salt used for Argon2id key derivation
    salt: [u8; SALT_LEN],
    /// Nonce used for AES-256-GCM
    nonce: [u8; NONCE_LEN],
    /// Encrypted entropy + authentication tag
    ciphertext: Vec<u8>,
}

impl SealedSeed {
    /// Serialize to bytes: salt || nonce || ciphertext
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SALT_LEN + NONCE_LEN + self.ciphertext.len());
        bytes.extend_from_slice(&self.salt);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        // Minimum: salt + nonce + at least 1 ciphertext byte + 16 byte tag
        if bytes.len() < SALT_LEN + NONCE_LEN + 17 {
            return Err(VaultError::InvalidFormat);
        }

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        salt.copy_from_slice(&bytes[0..SALT_LEN]);
        nonce.copy_from_slice(&bytes[SALT_LEN..SALT_LEN + NONCE_LEN]);
        let ciphertext = bytes[SALT_LEN + NONCE_LEN..].to_vec();

        Ok(Self {
            salt,
            nonce,
            ciphertext,
        })
    }

    /// Hex form used when the sealed seed is embedded in a stored document.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, VaultError> {
        let bytes = hex::decode(s).map_err(|_| VaultError::InvalidFormat)?;
        Self::from_bytes(&bytes)
    }
}

/// Seals and opens family seeds under one master secret.
pub struct SeedVault {
    master: Zeroizing<String>,
}

impl SeedVault {
    pub fn new(master_secret: &str) -> Self {
        Self {
            master: Zeroizing::new(master_secret.to_owned()),
        }
    }

    /// Seal a family seed for storage.
    ///
    /// Each call generates a new random salt and nonce, so sealing the same
    /// seed twice yields different ciphertexts.
    pub fn seal(&self, seed: &FamilySeed) -> Result<SealedSeed, VaultError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let nonce_arr = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&nonce_arr);

        let mut key = derive_key(&self.master, &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), seed.entropy().as_slice())
            .map_err(|e| VaultError::SealFailed(e.to_string()));
        key.zeroize();

        Ok(SealedSeed {
            salt,
            nonce,
            ciphertext: ciphertext?,
        })
    }

    /// Open a sealed seed into a page-locked guard.
    ///
    /// # Errors
    /// Fails if the master secret is wrong or the ciphertext was tampered
    /// with.
    pub fn open(&self, sealed: &SealedSeed) -> Result<SeedGuard, VaultError> {
        let mut key = derive_key(&self.master, &sealed.salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .map_err(|_| VaultError::OpenFailed);
        key.zeroize();
        let mut plaintext = plaintext?;

        if plaintext.len() != SEED_PLAINTEXT_LEN {
            plaintext.zeroize();
            return Err(VaultError::OpenFailed);
        }

        let mut buf = SecretBuf::new(SEED_PLAINTEXT_LEN);
        buf.as_mut_slice().copy_from_slice(&plaintext);
        plaintext.zeroize();

        Ok(SeedGuard { buf })
    }
}

/// Scoped access to a decrypted seed.
///
/// The plaintext lives in an mlocked buffer that is zeroized when the guard
/// drops. Derive keys inside the scope instead of copying the entropy out.
pub struct SeedGuard {
    buf: SecretBuf,
}

impl SeedGuard {
    /// Derive the account keypair for the held seed.
    pub fn keypair(&self) -> Result<Keypair, WalletError> {
        let mut entropy = [0u8; SEED_PLAINTEXT_LEN];
        entropy.copy_from_slice(self.buf.as_slice());
        let seed = FamilySeed::from_entropy(entropy);
        Keypair::derive(&seed)
    }
}

/// Derive an AES key from the master secret using Argon2id.
fn derive_key(
    master: &str,
    salt: &[u8; SALT_LEN],
) -> Result<[u8; ARGON2_OUTPUT_LEN], VaultError> {
    let params = Params::new(
        ARGON2_M_COST,
        ARGON2_T_COST,
        ARGON2_P_COST,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; ARGON2_OUTPUT_LEN];
    argon2
        .hash_password_into(master.as_bytes(), salt, &mut key)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_round_trip() {
        let vault = SeedVault::new("correct horse battery staple");
        let seed = FamilySeed::generate();
        let expected = Keypair::derive(&seed).unwrap().address();

        let sealed = vault.seal(&seed).unwrap();
        let guard = vault.open(&sealed).unwrap();

        assert_eq!(guard.keypair().unwrap().address(), expected);
    }

    #[test]
    fn test_wrong_master_secret_fails() {
        let vault = SeedVault::new("master secret");
        let other = SeedVault::new("another secret");
        let seed = FamilySeed::generate();

        let sealed = vault.seal(&seed).unwrap();
        assert!(matches!(other.open(&sealed), Err(VaultError::OpenFailed)));
    }

    #[test]
    fn test_distinct_ciphertexts_per_sealing() {
        let vault = SeedVault::new("same secret");
        let seed = FamilySeed::generate();

        let a = vault.seal(&seed).unwrap();
        let b = vault.seal(&seed).unwrap();

        // Fresh salt and nonce every time
        assert_ne!(a.to_bytes(), b.to_bytes());

        let addr_a = vault.open(&a).unwrap().keypair().unwrap().address();
        let addr_b = vault.open(&b).unwrap().keypair().unwrap().address();
        assert_eq!(addr_a, addr_b);
    }

    #[test]
    fn test_hex_round_trip() {
        let vault = SeedVault::new("secret");
        let seed = FamilySeed::generate();

        let sealed = vault.seal(&seed).unwrap();
        let restored = SealedSeed::from_hex(&sealed.to_hex()).unwrap();

        assert_eq!(sealed.to_bytes(), restored.to_bytes());
        assert!(vault.open(&restored).is_ok());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let vault = SeedVault::new("secret");
        let seed = FamilySeed::generate();

        let sealed = vault.seal(&seed).unwrap();
        let mut bytes = sealed.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let tampered = SealedSeed::from_bytes(&bytes).unwrap();
        assert!(matches!(vault.open(&tampered), Err(VaultError::OpenFailed)));
    }

    #[test]
    fn test_from_bytes_rejects_short_input() {
        assert!(matches!(
            SealedSeed::from_bytes(&[0u8; 20]),
            Err(VaultError::InvalidFormat)
        ));
        assert!(matches!(
            SealedSeed::from_hex("deadbeef"),
            Err(VaultError::InvalidFormat)
        ));
        assert!(matches!(
            SealedSeed::from_hex("not hex at all"),
            Err(VaultError::InvalidFormat)
        ));
    }

    #[test]
    fn test_empty_master_secret_works() {
        // Discouraged, but must not panic
        let vault = SeedVault::new("");
        let seed = FamilySeed::generate();

        let sealed = vault.seal(&seed).unwrap();
        assert!(vault.open(&sealed).is_ok());
    }
}
