//! Pipeline-owned entities
//!
//! Everything here is persisted as a JSON document in the case store.
//! Status vocabularies serialize in SCREAMING_SNAKE_CASE so stored documents
//! read the same as the external system's records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An issued-token line, identified by currency code and issuer account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId {
    pub currency: String,
    pub issuer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStatus {
    Draft,
    Ready,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockMethod {
    /// The owner moves funds by hand; not driven by this pipeline.
    Manual,
    /// Funds move via regular-key delegation to the custodial account.
    RegularKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MethodStep {
    RegularKeySet,
    AutoTransfer,
    RegularKeyCleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStatus {
    Pending,
    Verified,
    Unverified,
}

/// The custodial account generated at lock start. `seed_encrypted` is the
/// hex form of the vault ciphertext; the plaintext seed never reaches a
/// stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodialWallet {
    pub address: String,
    pub seed_encrypted: String,
}

/// Delegation check result for one source account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegularKeyStatus {
    pub asset_id: String,
    pub address: String,
    pub status: KeyStatus,
    pub message: Option<String>,
}

/// Per-case asset-lock state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockState {
    pub status: LockStatus,
    pub method: LockMethod,
    pub method_step: Option<MethodStep>,
    pub ui_step: u32,
    pub wallet: Option<CustodialWallet>,
    pub regular_key_statuses: Vec<RegularKeyStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockItemStatus {
    Pending,
    Verified,
}

/// One planned transfer from a source account into custody. Native amounts
/// are drops; token amounts are micro-units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockItem {
    pub item_id: String,
    pub asset_id: String,
    pub asset_label: String,
    pub asset_address: String,
    pub token: Option<TokenId>,
    pub planned_amount: u64,
    pub status: LockItemStatus,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignerListStatus {
    Unset,
    Set,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerListEntry {
    pub account: String,
    pub weight: u16,
}

/// Multisignature configuration of the custodial account.
///
/// Entries are one system-signer entry with weight = heir count plus one
/// weight-1 entry per heir; the quorum is `n + n/2 + 1`. The system signer
/// alone can never reach quorum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerListState {
    pub status: SignerListStatus,
    pub quorum: u32,
    pub entries: Vec<SignerListEntry>,
    pub error: Option<String>,
    pub tx_hash: Option<String>,
}

impl SignerListState {
    pub fn unset() -> Self {
        Self {
            status: SignerListStatus::Unset,
            quorum: 0,
            entries: Vec::new(),
            error: None,
            tx_hash: None,
        }
    }

    /// Heir signatures needed on top of the system share to reach quorum.
    pub fn required_heir_signatures(&self) -> u32 {
        let heir_count = self.entries.len().saturating_sub(1) as u32;
        heir_count / 2 + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Prepared,
    Submitted,
}

/// The approval transaction negotiated between system and heirs: a 1-drop
/// payment from the custodial account to the verification destination,
/// carrying a random memo challenge.
///
/// Prepared → Submitted, then either validates on-ledger or expires once the
/// validated index passes `last_ledger_sequence`; only a ledger-confirmed
/// expiry allows regeneration, which discards all heir signatures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalTx {
    pub memo: String,
    pub tx_json: Value,
    pub system_signed_blob: String,
    pub system_signed_hash: String,
    pub status: ApprovalStatus,
    pub submitted_tx_hash: Option<String>,
    pub last_ledger_sequence: u32,
}

/// One heir's multisignature share, keyed by heir uid. Last write wins; at
/// most one is counted per heir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerSignature {
    pub uid: String,
    pub address: String,
    pub signed_blob: String,
    pub tx_hash: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionStatus {
    Pending,
    Running,
    Partial,
    Completed,
    Failed,
}

/// Aggregate view over the distribution items of a case. Counts are
/// recomputed from the item set after every pass, never incremented in
/// place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionState {
    pub status: DistributionStatus,
    pub total_count: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub skipped_count: u32,
    pub escalation_count: u32,
    pub retry_limit: u32,
}

impl DistributionState {
    pub fn fresh(retry_limit: u32) -> Self {
        Self {
            status: DistributionStatus::Running,
            total_count: 0,
            success_count: 0,
            failed_count: 0,
            skipped_count: 0,
            escalation_count: 0,
            retry_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistItemStatus {
    Pending,
    Failed,
    Verified,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistItemKind {
    Transfer,
    Nft,
}

/// One payout from custody to an heir. Item ids are deterministic natural
/// keys, so regenerating the item set never duplicates or resets existing
/// items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionItem {
    pub item_id: String,
    pub plan_id: String,
    pub asset_id: String,
    pub heir_uid: String,
    pub heir_address: String,
    pub token: Option<TokenId>,
    pub amount: u64,
    pub status: DistItemStatus,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub kind: DistItemKind,
    pub nft_token_id: Option<String>,
    pub offer_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization_vocabulary() {
        assert_eq!(
            serde_json::to_string(&LockStatus::Ready).unwrap(),
            "\"READY\""
        );
        assert_eq!(
            serde_json::to_string(&MethodStep::RegularKeyCleared).unwrap(),
            "\"REGULAR_KEY_CLEARED\""
        );
        assert_eq!(
            serde_json::to_string(&DistItemStatus::Skipped).unwrap(),
            "\"SKIPPED\""
        );
        let parsed: LockMethod = serde_json::from_str("\"REGULAR_KEY\"").unwrap();
        assert_eq!(parsed, LockMethod::RegularKey);
    }

    #[test]
    fn test_required_heir_signatures() {
        let mut list = SignerListState::unset();
        list.entries = (0..4)
            .map(|i| SignerListEntry {
                account: format!("r{i}"),
                weight: if i == 0 { 3 } else { 1 },
            })
            .collect();
        // 3 heirs: quorum 3 + 1 + 1 = 5, system weight 3, so 2 heirs must sign
        assert_eq!(list.required_heir_signatures(), 2);
    }
}
