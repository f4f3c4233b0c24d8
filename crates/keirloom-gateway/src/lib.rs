//! Keirloom Ledger Gateway
//!
//! Network access to the public ledger for:
//! - Account summaries (balance, sequence, owner count, regular key)
//! - Network cost parameters (reserves, base fee)
//! - Transaction submission and validation lookup
//! - Server-side wallet proposal
//!
//! All calls are synchronous and make no internal retries; callers own their
//! retry policy. Timeouts surface as [`LedgerError::Timeout`], distinct from
//! on-ledger rejection, so callers can tell "try again" from "rejected".
//!
//! # Security
//!
//! - Always use HTTPS endpoints in production
//! - Signed blobs are opaque to the gateway; it never sees key material
//! - Submission results must be checked via `engine_result`, never assumed

pub mod mock;
pub mod rpc;
pub mod tx;
pub mod types;

use thiserror::Error;

pub use mock::MockLedger;
pub use rpc::JsonRpcGateway;
pub use types::{
    is_success_code, AccountInfo, ProposedWallet, ServerParams, SubmitResult, TrustLine, TxStatus,
};

/// Errors from ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger request timed out: {0}")]
    Timeout(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Ledger RPC error {code}: {message}")]
    Rpc { code: String, message: String },

    #[error("Invalid ledger response: {0}")]
    InvalidResponse(String),
}

impl LedgerError {
    /// Whether the caller may simply try the same call again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_) | LedgerError::Timeout(_))
    }
}

/// Synchronous ledger access used by every pipeline stage.
///
/// One implementation speaks JSON-RPC to a real node
/// ([`rpc::JsonRpcGateway`]); one is an in-memory ledger for tests
/// ([`mock::MockLedger`]).
pub trait LedgerGateway: Send + Sync {
    /// Summary of an account on the last validated ledger.
    fn account_info(&self, address: &str) -> Result<AccountInfo, LedgerError>;

    /// Current reserve and fee parameters.
    fn server_params(&self) -> Result<ServerParams, LedgerError>;

    /// Issued-token balances held by an account.
    fn account_lines(&self, address: &str) -> Result<Vec<TrustLine>, LedgerError>;

    /// Look up a submitted transaction. `None` when the ledger has never
    /// seen the hash.
    fn transaction(&self, tx_hash: &str) -> Result<Option<TxStatus>, LedgerError>;

    /// Index of the latest validated ledger.
    fn validated_ledger_index(&self) -> Result<u32, LedgerError>;

    /// Submit a signed blob. A returned [`SubmitResult`] does not imply
    /// success: inspect `engine_result`.
    fn submit(&self, tx_blob: &str) -> Result<SubmitResult, LedgerError>;

    /// Ask the node to propose a fresh wallet keypair.
    fn propose_wallet(&self) -> Result<ProposedWallet, LedgerError>;
}
