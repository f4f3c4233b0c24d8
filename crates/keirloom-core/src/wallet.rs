//! Ledger key material
//!
//! Family seeds, secp256k1 account keypair derivation, and the classic
//! address codec. All base58 uses the ledger alphabet with a double-SHA256
//! checksum.

use rand::RngCore;
use ripemd::Ripemd160;
use secp256k1::{Message, PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Version byte for encoded family seeds (`s...`)
const SEED_VERSION: u8 = 0x21;
/// Version byte for encoded classic addresses (`r...`)
const ADDRESS_VERSION: u8 = 0x00;
/// Entropy length of a family seed
const SEED_LEN: usize = 16;
/// Account id length (RIPEMD-160 output)
const ACCOUNT_ID_LEN: usize = 20;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),
}

/// First half of SHA-512, the ledger's standard 256-bit hash.
pub fn sha512_half(data: &[u8]) -> [u8; 32] {
    let digest = Sha512::digest(data);
    let mut half = [0u8; 32];
    half.copy_from_slice(&digest[..32]);
    half
}

fn base58check_encode(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len() + 4);
    data.push(version);
    data.extend_from_slice(payload);
    let check = Sha256::digest(Sha256::digest(&data));
    data.extend_from_slice(&check[..4]);
    bs58::encode(data)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_string()
}

fn base58check_decode(s: &str, version: u8, payload_len: usize) -> Result<Vec<u8>, String> {
    let data = bs58::decode(s)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_vec()
        .map_err(|e| e.to_string())?;

    if data.len() != 1 + payload_len + 4 {
        return Err(format!("unexpected length {}", data.len()));
    }

    let (body, check) = data.split_at(data.len() - 4);
    let expected = Sha256::digest(Sha256::digest(body));
    if check != &expected[..4] {
        return Err("checksum mismatch".to_string());
    }
    if body[0] != version {
        return Err(format!("unexpected version byte 0x{:02x}", body[0]));
    }

    Ok(body[1..].to_vec())
}

/// A 16-byte family seed, the root secret of one ledger account.
///
/// Displays in the familiar `s...` base58-check form. The entropy is
/// zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FamilySeed {
    entropy: [u8; SEED_LEN],
}

impl FamilySeed {
    /// Generate a fresh seed from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut entropy = [0u8; SEED_LEN];
        rand::rngs::OsRng.fill_bytes(&mut entropy);
        Self { entropy }
    }

    pub fn from_entropy(entropy: [u8; SEED_LEN]) -> Self {
        Self { entropy }
    }

    pub fn entropy(&self) -> &[u8; SEED_LEN] {
        &self.entropy
    }
}

impl fmt::Display for FamilySeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base58check_encode(SEED_VERSION, &self.entropy))
    }
}

// Seed material must never reach logs, even through debug formatting.
impl fmt::Debug for FamilySeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FamilySeed(****)")
    }
}

impl FromStr for FamilySeed {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let payload =
            base58check_decode(s, SEED_VERSION, SEED_LEN).map_err(WalletError::InvalidSeed)?;
        let mut entropy = [0u8; SEED_LEN];
        entropy.copy_from_slice(&payload);
        Ok(Self { entropy })
    }
}

/// A 20-byte account id, shown in its classic `r...` form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ACCOUNT_ID_LEN]);

impl Address {
    pub fn from_public_key(public: &PublicKey) -> Self {
        let sha = Sha256::digest(public.serialize());
        let rip = Ripemd160::digest(sha);
        let mut id = [0u8; ACCOUNT_ID_LEN];
        id.copy_from_slice(&rip);
        Self(id)
    }

    pub fn account_id(&self) -> &[u8; ACCOUNT_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base58check_encode(ADDRESS_VERSION, &self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let payload = base58check_decode(s, ADDRESS_VERSION, ACCOUNT_ID_LEN)
            .map_err(WalletError::InvalidAddress)?;
        let mut id = [0u8; ACCOUNT_ID_LEN];
        id.copy_from_slice(&payload);
        Ok(Self(id))
    }
}

/// A derived secp256k1 account keypair.
pub struct Keypair {
    secret: SecretKey,
    public: PublicKey,
}

impl Keypair {
    /// Derive the account keypair for a family seed.
    ///
    /// Root key search over `sha512h(entropy || seq)`, then the account key
    /// is the root key tweaked by `sha512h(root_pub || 0u32 || subseq)`.
    /// Candidates outside the curve order are skipped and the sequence
    /// incremented, per the ledger derivation scheme.
    pub fn derive(seed: &FamilySeed) -> Result<Self, WalletError> {
        let secp = Secp256k1::new();

        let mut root = None;
        for seq in 0..=u32::MAX {
            let mut buf = Vec::with_capacity(SEED_LEN + 4);
            buf.extend_from_slice(&seed.entropy);
            buf.extend_from_slice(&seq.to_be_bytes());
            let mut digest = sha512_half(&buf);
            buf.zeroize();
            let candidate = SecretKey::from_slice(&digest);
            digest.zeroize();
            if let Ok(key) = candidate {
                root = Some(key);
                break;
            }
        }
        let root =
            root.ok_or_else(|| WalletError::DerivationFailed("root key space exhausted".into()))?;
        let root_public = PublicKey::from_secret_key(&secp, &root);

        let mut secret = None;
        for subseq in 0..=u32::MAX {
            let mut buf = Vec::with_capacity(33 + 8);
            buf.extend_from_slice(&root_public.serialize());
            buf.extend_from_slice(&0u32.to_be_bytes());
            buf.extend_from_slice(&subseq.to_be_bytes());
            let mut digest = sha512_half(&buf);
            let tweak = Scalar::from_be_bytes(digest);
            digest.zeroize();
            if let Ok(tweak) = tweak {
                if let Ok(key) = root.add_tweak(&tweak) {
                    secret = Some(key);
                    break;
                }
            }
        }
        let secret = secret
            .ok_or_else(|| WalletError::DerivationFailed("account key space exhausted".into()))?;
        let public = PublicKey::from_secret_key(&secp, &secret);

        Ok(Self { secret, public })
    }

    /// Compressed public key as uppercase hex, the form carried in
    /// transaction JSON.
    pub fn public_key_hex(&self) -> String {
        hex::encode_upper(self.public.serialize())
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public)
    }

    /// ECDSA-sign a 32-byte digest. DER encoded.
    pub fn sign(&self, digest: &[u8; 32]) -> Vec<u8> {
        let secp = Secp256k1::new();
        let message = Message::from_digest(*digest);
        secp.sign_ecdsa(&message, &self.secret)
            .serialize_der()
            .to_vec()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", self.address())
    }
}

/// Address owned by a compressed public key given as raw bytes.
pub fn address_for_public_key(public_key: &[u8]) -> Result<Address, WalletError> {
    let public = PublicKey::from_slice(public_key)
        .map_err(|e| WalletError::InvalidAddress(format!("bad public key: {}", e)))?;
    Ok(Address::from_public_key(&public))
}

/// Verify a DER signature over a 32-byte digest against a compressed
/// public key.
pub fn verify_signature(digest: &[u8; 32], signature_der: &[u8], public_key: &[u8]) -> bool {
    let signature = match secp256k1::ecdsa::Signature::from_der(signature_der) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let public = match PublicKey::from_slice(public_key) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*digest);
    secp.verify_ecdsa(&message, &signature, &public).is_ok()
}
