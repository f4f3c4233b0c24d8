//! Per-case execution lease
//!
//! Pipeline operations on a case must not run concurrently. A [`CaseLease`]
//! is acquired before an operation touches case state and released when the
//! guard drops. Contention surfaces as [`StoreError::CaseBusy`], which
//! callers treat as retryable.

use log::warn;
use rand::RngCore;

use crate::{CaseStore, StoreError};

/// Default lease lifetime. Long enough for a full pipeline operation
/// including ledger round-trips, short enough that a crashed holder does
/// not wedge a case for long.
pub const DEFAULT_LEASE_TTL_SECS: u64 = 120;

/// RAII guard over a case's execution lease.
pub struct CaseLease<'a> {
    store: &'a dyn CaseStore,
    case_id: String,
    holder: String,
    released: bool,
}

impl<'a> CaseLease<'a> {
    /// Try to take the lease for `case_id`, failing with
    /// [`StoreError::CaseBusy`] if another holder has it.
    pub fn acquire(store: &'a dyn CaseStore, case_id: &str) -> Result<Self, StoreError> {
        Self::acquire_with_ttl(store, case_id, DEFAULT_LEASE_TTL_SECS)
    }

    pub fn acquire_with_ttl(
        store: &'a dyn CaseStore,
        case_id: &str,
        ttl_secs: u64,
    ) -> Result<Self, StoreError> {
        let holder = random_holder_id();
        if !store.acquire_lease(case_id, &holder, ttl_secs)? {
            return Err(StoreError::CaseBusy(case_id.to_string()));
        }
        Ok(Self {
            store,
            case_id: case_id.to_string(),
            holder,
            released: false,
        })
    }

    /// Release the lease early, reporting any store failure.
    pub fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        self.store.release_lease(&self.case_id, &self.holder)
    }
}

impl Drop for CaseLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.release_lease(&self.case_id, &self.holder) {
            warn!("failed to release lease for case {}: {}", self.case_id, e);
        }
    }
}

fn random_holder_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
