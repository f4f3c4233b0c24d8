//! Keirloom execution pipeline
//!
//! Drives a case through its three on-ledger stages:
//!
//! 1. **Asset lock** ([`lock::LockOrchestrator`]): funds move from the
//!    owner's source accounts into one custodial account via regular-key
//!    delegation.
//! 2. **Signer-quorum approval** ([`quorum::QuorumOrchestrator`]): the
//!    custodial account becomes a multisignature account held jointly by the
//!    system signer and the heirs, who co-sign an approval transaction.
//! 3. **Distribution** ([`distribute::DistributionOrchestrator`]): custodial
//!    holdings pay out to heirs per plan, with retry and escalation.
//!
//! The stages never call each other. An external controller invokes the next
//! stage once the previous one reports its terminal state. Every mutating
//! entry point takes the per-case execution lease, so a case is only ever
//! driven from one place at a time.

pub mod alloc;
pub mod distribute;
pub mod error;
pub mod lock;
pub mod model;
pub mod quorum;
pub mod records;
pub mod repo;
pub mod test_utils;

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

pub use distribute::DistributionOrchestrator;
pub use error::{codes, ErrorKind, ExecError, Result};
pub use lock::LockOrchestrator;
pub use quorum::QuorumOrchestrator;
pub use repo::CaseRepo;

/// Runtime settings every orchestrator shares, mapped from the server
/// configuration.
#[derive(Clone)]
pub struct ExecConfig {
    /// Account the system co-signs approval transactions with.
    pub system_signer_address: Option<String>,
    /// Family seed of the system signer.
    pub system_signer_seed: Option<String>,
    /// Destination of the 1-drop approval payment.
    pub verify_address: Option<String>,
    /// Attempts per distribution item before escalation.
    pub retry_limit: u32,
    /// Ledgers an approval transaction stays submittable for.
    pub approval_ttl_ledgers: u32,
    /// Lifetime of the per-case execution lease.
    pub lease_ttl_secs: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            system_signer_address: None,
            system_signer_seed: None,
            verify_address: None,
            retry_limit: 3,
            approval_ttl_ledgers: 600,
            lease_ttl_secs: 120,
        }
    }
}

impl std::fmt::Debug for ExecConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecConfig")
            .field("system_signer_address", &self.system_signer_address)
            .field(
                "system_signer_seed",
                &self.system_signer_seed.as_ref().map(|_| "****"),
            )
            .field("verify_address", &self.verify_address)
            .field("retry_limit", &self.retry_limit)
            .field("approval_ttl_ledgers", &self.approval_ttl_ledgers)
            .field("lease_ttl_secs", &self.lease_ttl_secs)
            .finish()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
