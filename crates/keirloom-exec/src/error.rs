//! Pipeline error taxonomy
//!
//! Every orchestrator operation returns a structured [`ExecError`] carrying a
//! stable code string and a kind that tells the caller what to do with it:
//! fix upstream state (`Precondition`), fix the deployment (`Config`), halt
//! the case (`Integrity`), or record/retry (`Ledger`). Messages never carry
//! seed or key material.

use keirloom_core::{VaultError, WalletError};
use keirloom_gateway::tx::TxError;
use keirloom_gateway::LedgerError;
use keirloom_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecError>;

/// Stable error codes surfaced to the external caller.
pub mod codes {
    pub const NOT_READY: &str = "NOT_READY";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const HEIR_WALLET_UNVERIFIED: &str = "HEIR_WALLET_UNVERIFIED";
    pub const HEIR_MISSING: &str = "HEIR_MISSING";
    pub const APPROVAL_NOT_EXPIRED: &str = "APPROVAL_NOT_EXPIRED";
    pub const CASE_NOT_FOUND: &str = "CASE_NOT_FOUND";
    pub const CASE_BUSY: &str = "CASE_BUSY";

    pub const SYSTEM_SIGNER_MISSING: &str = "SYSTEM_SIGNER_MISSING";
    pub const SYSTEM_SIGNER_SEED_MISSING: &str = "SYSTEM_SIGNER_SEED_MISSING";
    pub const VERIFY_ADDRESS_MISSING: &str = "VERIFY_ADDRESS_MISSING";
    pub const LOCK_WALLET_MISSING: &str = "LOCK_WALLET_MISSING";

    pub const REGULAR_KEY_SEED_MISMATCH: &str = "REGULAR_KEY_SEED_MISMATCH";

    pub const INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
    pub const SIGNER_LIST_FAILED: &str = "SIGNER_LIST_FAILED";
    pub const LEDGER_UNAVAILABLE: &str = "LEDGER_UNAVAILABLE";
    pub const SUBMIT_FAILED: &str = "SUBMIT_FAILED";
    pub const STORE_ERROR: &str = "STORE_ERROR";
    pub const SEAL_ERROR: &str = "SEAL_ERROR";
}

/// What class of failure this is, and therefore who resolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Upstream state must change before the same call can succeed.
    Precondition,
    /// Deployment configuration is incomplete.
    Config,
    /// Data corruption or a key-derivation fault. Halt the case.
    Integrity,
    /// Ledger or infrastructure failure, expected in normal operation.
    Ledger,
}

#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct ExecError {
    pub code: &'static str,
    pub kind: ErrorKind,
    pub message: String,
    retryable: bool,
}

impl ExecError {
    pub fn precondition(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: ErrorKind::Precondition,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::precondition(codes::NOT_READY, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::precondition(codes::VALIDATION_ERROR, message)
    }

    pub fn config(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: ErrorKind::Config,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn integrity(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: ErrorKind::Integrity,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn ledger(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: ErrorKind::Ledger,
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<StoreError> for ExecError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CaseBusy(case_id) => Self {
                code: codes::CASE_BUSY,
                kind: ErrorKind::Precondition,
                message: format!("case {case_id} is being executed elsewhere"),
                retryable: true,
            },
            other => Self::ledger(codes::STORE_ERROR, other.to_string()),
        }
    }
}

impl From<LedgerError> for ExecError {
    fn from(e: LedgerError) -> Self {
        let retryable = e.is_retryable();
        Self {
            code: codes::LEDGER_UNAVAILABLE,
            kind: ErrorKind::Ledger,
            message: e.to_string(),
            retryable,
        }
    }
}

impl From<VaultError> for ExecError {
    fn from(e: VaultError) -> Self {
        Self::ledger(codes::SEAL_ERROR, e.to_string())
    }
}

impl From<WalletError> for ExecError {
    fn from(e: WalletError) -> Self {
        Self::validation(e.to_string())
    }
}

impl From<TxError> for ExecError {
    fn from(e: TxError) -> Self {
        Self::ledger(codes::SUBMIT_FAILED, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_busy_is_retryable() {
        let err: ExecError = StoreError::CaseBusy("case-1".into()).into();
        assert_eq!(err.code, codes::CASE_BUSY);
        assert_eq!(err.kind, ErrorKind::Precondition);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_ledger_timeout_is_retryable() {
        let err: ExecError = LedgerError::Timeout("deadline".into()).into();
        assert!(err.is_retryable());

        let err: ExecError = LedgerError::Rpc {
            code: "invalidParams".into(),
            message: "bad".into(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_carries_code_and_message() {
        let err = ExecError::not_ready("前段の処理が完了していません");
        assert_eq!(err.to_string(), "[NOT_READY] 前段の処理が完了していません");
    }
}
