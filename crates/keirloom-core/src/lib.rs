//! Keirloom Core
//!
//! Key material and secret handling for Keirloom.
//!
//! # Key Derivation
//!
//! Family seeds (16 bytes of entropy, `s...` base58-check) derive secp256k1
//! account keypairs the ledger way: a root key found by hashing
//! `entropy || sequence`, then an account key produced by tweaking the root
//! key with a hash of its public key. Addresses are the classic `r...`
//! base58-check form of `RIPEMD160(SHA256(pubkey))`.
//!
//! # Sealed Storage
//!
//! Custodial seeds are sealed at rest using Argon2id + AES-256-GCM under the
//! vault master secret, and only ever opened into page-locked,
//! zeroize-on-drop buffers.

pub mod memory;
pub mod vault;
pub mod wallet;

pub use vault::{SealedSeed, SeedGuard, SeedVault, VaultError};
pub use wallet::{Address, FamilySeed, Keypair, WalletError};
