//! External read-model records
//!
//! Written by the surrounding case-management system and only read here:
//! case stage and membership, inheritance plans with their allocations, heir
//! wallet verification, and cached per-asset ledger summaries. The pipeline
//! updates exactly two fields back: the case stage and its asset-lock
//! status.

use serde::{Deserialize, Serialize};

use crate::model::{LockStatus, TokenId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStage {
    Draft,
    /// Death attested; execution (quorum + distribution) may run.
    InProgress,
    /// Waiting for the death event or for heirs to act.
    Waiting,
    Executing,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: String,
    pub stage: CaseStage,
    pub asset_lock_status: Option<LockStatus>,
    pub owner_uid: String,
    pub member_uids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeirRecord {
    pub uid: String,
    pub display_name: String,
    pub wallet_address: Option<String>,
    pub wallet_verified: bool,
}

impl HeirRecord {
    /// Address usable for signing and payouts, present only once verified.
    pub fn verified_address(&self) -> Option<&str> {
        if self.wallet_verified {
            self.wallet_address.as_deref()
        } else {
            None
        }
    }
}

/// Cached token balance of a source account, refreshed by the external
/// ownership-verification flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    pub token: TokenId,
    pub balance_micro: u64,
}

/// One pre-registered source account with its cached ledger summary and the
/// reserve it must keep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub asset_id: String,
    pub label: String,
    pub address: String,
    pub balance_drops: u64,
    pub tokens: Vec<TokenBalance>,
    pub reserve_drops: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationKind {
    /// Whole-percent share of the locked amount for the matching token.
    Percent { percent: u8 },
    /// Fixed amount in drops (native) or micro-units (token).
    Amount { amount: u64 },
    /// One specific NFT.
    Nft { token_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAllocation {
    pub heir_uid: String,
    #[serde(flatten)]
    pub kind: AllocationKind,
    /// Target token line; `None` means the native currency. Ignored for NFT
    /// allocations.
    pub token: Option<TokenId>,
}

/// One inheritance instruction: which asset, which heirs, what shares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRecord {
    pub plan_id: String,
    pub case_id: String,
    pub asset_id: String,
    pub active: bool,
    pub heir_uids: Vec<String>,
    pub allocations: Vec<PlanAllocation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_kind_tagging() {
        let alloc = PlanAllocation {
            heir_uid: "heir-1".into(),
            kind: AllocationKind::Percent { percent: 60 },
            token: None,
        };
        let json = serde_json::to_value(&alloc).unwrap();
        assert_eq!(json["kind"], "PERCENT");
        assert_eq!(json["percent"], 60);

        let parsed: PlanAllocation = serde_json::from_value(serde_json::json!({
            "heir_uid": "heir-2",
            "kind": "NFT",
            "token_id": "000800006203F49C",
            "token": null,
        }))
        .unwrap();
        match parsed.kind {
            AllocationKind::Nft { token_id } => assert_eq!(token_id, "000800006203F49C"),
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn test_verified_address_gating() {
        let mut heir = HeirRecord {
            uid: "heir-1".into(),
            display_name: "長男".into(),
            wallet_address: Some("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh".into()),
            wallet_verified: false,
        };
        assert_eq!(heir.verified_address(), None);
        heir.wallet_verified = true;
        assert!(heir.verified_address().is_some());
    }
}
