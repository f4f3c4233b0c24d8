//! Shared test utilities for pipeline tests.
//!
//! Provides deterministic keypairs and a [`TestWorld`] bundling an in-memory
//! store, a mock ledger, a vault and a config, with builders for the case,
//! heir, asset and plan records the orchestrators consume.

use keirloom_core::{FamilySeed, Keypair, SeedVault};
use keirloom_gateway::tx::UnsignedTx;
use keirloom_gateway::MockLedger;
use keirloom_store::MemoryStore;
use serde_json::Value;

use crate::distribute::DistributionOrchestrator;
use crate::lock::LockOrchestrator;
use crate::model::TokenId;
use crate::quorum::QuorumOrchestrator;
use crate::records::{
    AllocationKind, AssetRecord, CaseRecord, CaseStage, HeirRecord, PlanAllocation, PlanRecord,
    TokenBalance,
};
use crate::repo::CaseRepo;
use crate::ExecConfig;

/// Deterministic family seed from a tag byte.
///
/// The entropy is `[0x01, 0x00, ..., 0x00, tag]` (16 bytes); different tags
/// produce different keys.
pub fn test_seed(tag: u8) -> FamilySeed {
    let mut entropy = [0u8; 16];
    entropy[0] = 0x01;
    entropy[15] = tag;
    FamilySeed::from_entropy(entropy)
}

/// Deterministic keypair from a tag byte.
pub fn test_keypair(tag: u8) -> Keypair {
    Keypair::derive(&test_seed(tag)).unwrap()
}

/// Co-sign a stored approval transaction as one signer, returning the share
/// blob an heir would upload.
pub fn sign_share(tx_json: &Value, signer: &Keypair) -> String {
    UnsignedTx::from_json(tx_json)
        .unwrap()
        .sign_for(signer)
        .unwrap()
        .blob
}

/// A complete in-memory environment for driving the pipeline.
pub struct TestWorld {
    pub store: MemoryStore,
    pub ledger: MockLedger,
    pub vault: SeedVault,
    pub config: ExecConfig,
}

impl TestWorld {
    /// World with a configured system signer (tag `0xA1`), verification
    /// destination (tag `0xA2`) and a 9-ledger approval lifetime.
    pub fn new() -> Self {
        let system = test_keypair(0xA1);
        let config = ExecConfig {
            system_signer_address: Some(system.address().to_string()),
            system_signer_seed: Some(test_seed(0xA1).to_string()),
            verify_address: Some(test_keypair(0xA2).address().to_string()),
            approval_ttl_ledgers: 9,
            ..ExecConfig::default()
        };
        Self {
            store: MemoryStore::new(),
            ledger: MockLedger::new(),
            vault: SeedVault::new("test-master-secret"),
            config,
        }
    }

    pub fn repo(&self) -> CaseRepo<'_> {
        CaseRepo::new(&self.store)
    }

    pub fn lock(&self) -> LockOrchestrator<'_> {
        LockOrchestrator::new(&self.store, &self.ledger, &self.vault, &self.config)
    }

    pub fn quorum(&self) -> QuorumOrchestrator<'_> {
        QuorumOrchestrator::new(&self.store, &self.ledger, &self.vault, &self.config)
    }

    pub fn distribution(&self) -> DistributionOrchestrator<'_> {
        DistributionOrchestrator::new(&self.store, &self.ledger, &self.vault, &self.config)
    }

    /// Case with the given owner and heirs as members, stage Draft.
    pub fn seed_case(&self, case_id: &str, owner_uid: &str, heir_uids: &[&str]) {
        let mut member_uids = vec![owner_uid.to_string()];
        member_uids.extend(heir_uids.iter().map(|u| u.to_string()));
        self.repo()
            .put_case(&CaseRecord {
                case_id: case_id.to_string(),
                stage: CaseStage::Draft,
                asset_lock_status: None,
                owner_uid: owner_uid.to_string(),
                member_uids,
            })
            .unwrap();
    }

    pub fn set_stage(&self, case_id: &str, stage: CaseStage) {
        let repo = self.repo();
        let mut case = repo.case(case_id).unwrap();
        case.stage = stage;
        repo.put_case(&case).unwrap();
    }

    /// Heir with a verified wallet derived from `tag`; returns the keypair
    /// for co-signing.
    pub fn add_verified_heir(&self, case_id: &str, uid: &str, tag: u8) -> Keypair {
        let keypair = test_keypair(tag);
        self.repo()
            .put_heir(
                case_id,
                &HeirRecord {
                    uid: uid.to_string(),
                    display_name: uid.to_string(),
                    wallet_address: Some(keypair.address().to_string()),
                    wallet_verified: true,
                },
            )
            .unwrap();
        keypair
    }

    pub fn add_unverified_heir(&self, case_id: &str, uid: &str) {
        self.repo()
            .put_heir(
                case_id,
                &HeirRecord {
                    uid: uid.to_string(),
                    display_name: uid.to_string(),
                    wallet_address: None,
                    wallet_verified: false,
                },
            )
            .unwrap();
    }

    /// Source asset whose cached summary matches a funded mock account at an
    /// address derived from `tag`. Returns the address.
    pub fn add_asset(
        &self,
        case_id: &str,
        asset_id: &str,
        balance_drops: u64,
        reserve_drops: u64,
        tag: u8,
    ) -> String {
        let address = test_keypair(tag).address().to_string();
        self.ledger.add_account(&address, balance_drops);
        self.repo()
            .put_asset(
                case_id,
                &AssetRecord {
                    asset_id: asset_id.to_string(),
                    label: asset_id.to_string(),
                    address: address.clone(),
                    balance_drops,
                    tokens: Vec::new(),
                    reserve_drops,
                },
            )
            .unwrap();
        address
    }

    /// Add a cached token balance to an asset record and the matching trust
    /// line on the mock ledger.
    pub fn add_asset_token(
        &self,
        case_id: &str,
        asset_id: &str,
        currency: &str,
        issuer: &str,
        balance_micro: u64,
    ) {
        let repo = self.repo();
        let mut asset = repo
            .assets(case_id)
            .unwrap()
            .into_iter()
            .find(|a| a.asset_id == asset_id)
            .unwrap();
        self.ledger
            .add_trust_line(&asset.address, currency, issuer, balance_micro);
        asset.tokens.push(TokenBalance {
            token: TokenId {
                currency: currency.to_string(),
                issuer: issuer.to_string(),
            },
            balance_micro,
        });
        repo.put_asset(case_id, &asset).unwrap();
    }

    /// Active plan distributing the native balance of `asset_id` by percent.
    pub fn add_percent_plan(
        &self,
        case_id: &str,
        plan_id: &str,
        asset_id: &str,
        shares: &[(&str, u8)],
    ) {
        let allocations = shares
            .iter()
            .map(|(uid, percent)| PlanAllocation {
                heir_uid: uid.to_string(),
                kind: AllocationKind::Percent { percent: *percent },
                token: None,
            })
            .collect();
        self.repo()
            .put_plan(&PlanRecord {
                plan_id: plan_id.to_string(),
                case_id: case_id.to_string(),
                asset_id: asset_id.to_string(),
                active: true,
                heir_uids: shares.iter().map(|(uid, _)| uid.to_string()).collect(),
                allocations,
            })
            .unwrap();
    }

    /// Active plan leaving one NFT to one heir.
    pub fn add_nft_plan(
        &self,
        case_id: &str,
        plan_id: &str,
        asset_id: &str,
        heir_uid: &str,
        token_id: &str,
    ) {
        self.repo()
            .put_plan(&PlanRecord {
                plan_id: plan_id.to_string(),
                case_id: case_id.to_string(),
                asset_id: asset_id.to_string(),
                active: true,
                heir_uids: vec![heir_uid.to_string()],
                allocations: vec![PlanAllocation {
                    heir_uid: heir_uid.to_string(),
                    kind: AllocationKind::Nft {
                        token_id: token_id.to_string(),
                    },
                    token: None,
                }],
            })
            .unwrap();
    }

    /// Custodial address generated at lock start.
    pub fn custodial_address(&self, case_id: &str) -> String {
        self.repo()
            .lock_state(case_id)
            .unwrap()
            .unwrap()
            .wallet
            .unwrap()
            .address
    }

    /// Point every source account's regular key at the custodial address, as
    /// the owner would from their own wallet.
    pub fn delegate_regular_keys(&self, case_id: &str) {
        let custodial = self.custodial_address(case_id);
        let state = self.repo().lock_state(case_id).unwrap().unwrap();
        for status in &state.regular_key_statuses {
            self.ledger
                .set_regular_key_of(&status.address, Some(&custodial));
        }
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
