//! Gateway data types
//!
//! Plain views of ledger state. Amounts are integers end to end: native
//! value in drops, issued tokens in micro-units (10^-6 of one token).

use zeroize::Zeroizing;

/// Summary of one on-ledger account.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    /// Native balance in drops
    pub balance_drops: u64,
    /// Objects owned by the account (trust lines, offers, signer lists)
    pub owner_count: u32,
    /// Next transaction sequence number
    pub sequence: u32,
    /// Delegated signing key, if one is set
    pub regular_key: Option<String>,
}

/// Network cost parameters from the validated ledger.
#[derive(Debug, Clone, Copy)]
pub struct ServerParams {
    pub reserve_base_drops: u64,
    pub reserve_increment_drops: u64,
    pub base_fee_drops: u64,
}

impl ServerParams {
    /// Reserve an account must keep, given its owner count.
    pub fn reserve_for(&self, owner_count: u32) -> u64 {
        self.reserve_base_drops + self.reserve_increment_drops * u64::from(owner_count)
    }
}

/// One issued-token balance held by an account.
#[derive(Debug, Clone)]
pub struct TrustLine {
    pub currency: String,
    pub issuer: String,
    /// Balance in micro-units; only positive holdings are reported
    pub balance_micro: u64,
}

/// Validation status of a transaction the ledger has seen.
#[derive(Debug, Clone)]
pub struct TxStatus {
    /// Whether the transaction is in a validated ledger
    pub validated: bool,
    /// The last ledger index in which the transaction could validate
    pub last_ledger_sequence: u32,
    /// Engine result code; for validated transactions, the final one
    pub result_code: String,
}

impl TxStatus {
    /// Validated with a success result.
    pub fn is_final_success(&self) -> bool {
        self.validated && is_success_code(&self.result_code)
    }
}

/// Result of submitting a signed blob.
#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub engine_result: String,
    pub engine_message: String,
    pub tx_hash: String,
}

impl SubmitResult {
    /// Provisional acceptance: the transaction was queued for a validated
    /// ledger. Not final until the hash shows up validated.
    pub fn is_success(&self) -> bool {
        is_success_code(&self.engine_result)
    }
}

/// `tes...` codes are the ledger's success class.
pub fn is_success_code(code: &str) -> bool {
    code.starts_with("tes")
}

/// Wallet keypair proposed by the ledger node.
///
/// The seed is key material; it is zeroized on drop and must go straight
/// into the vault.
pub struct ProposedWallet {
    pub address: String,
    pub seed: Zeroizing<String>,
}
