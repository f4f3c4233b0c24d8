//! Distribution pipeline
//!
//! Pays the custodial balance out to the heirs once the approval transaction
//! has validated on-ledger. Payouts are tracked as one [`DistributionItem`]
//! per allocation with a deterministic id, so re-running `execute` resumes
//! failed items and picks up newly activated plans without duplicating
//! anything already paid.
//!
//! A failed item is retried on the next call until it reaches the retry
//! limit, at which point it is skipped and counted for operator escalation.
//! The aggregate state is recomputed from the item set after every pass.

use std::collections::HashSet;

use log::{info, warn};

use keirloom_core::{Keypair, SealedSeed, SeedVault};
use keirloom_gateway::tx::{nft_offer_id, TxAmount, UnsignedTx};
use keirloom_gateway::{LedgerGateway, ServerParams};
use keirloom_store::{CaseLease, CaseStore};

use crate::alloc::split_percent;
use crate::error::{codes, ExecError, Result};
use crate::model::{
    ApprovalStatus, DistItemKind, DistItemStatus, DistributionItem, DistributionState,
    DistributionStatus, TokenId,
};
use crate::records::AllocationKind;
use crate::repo::CaseRepo;
use crate::ExecConfig;

pub struct DistributionOrchestrator<'a> {
    store: &'a dyn CaseStore,
    ledger: &'a dyn LedgerGateway,
    vault: &'a SeedVault,
    config: &'a ExecConfig,
}

impl<'a> DistributionOrchestrator<'a> {
    pub fn new(
        store: &'a dyn CaseStore,
        ledger: &'a dyn LedgerGateway,
        vault: &'a SeedVault,
        config: &'a ExecConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            vault,
            config,
        }
    }

    fn repo(&self) -> CaseRepo<'a> {
        CaseRepo::new(self.store)
    }

    /// Run one distribution pass: materialize items from the active plans,
    /// attempt every item that is still due, then recompute the aggregate
    /// state. The caller re-invokes this until the state is terminal.
    pub fn execute(&self, case_id: &str) -> Result<DistributionState> {
        let _lease = CaseLease::acquire_with_ttl(self.store, case_id, self.config.lease_ttl_secs)?;
        let repo = self.repo();
        repo.case(case_id)?;

        self.require_validated_approval(case_id, &repo)?;

        let wallet = repo
            .lock_state(case_id)?
            .and_then(|s| s.wallet)
            .ok_or_else(|| {
                ExecError::config(
                    codes::LOCK_WALLET_MISSING,
                    "custodial wallet is missing for this case",
                )
            })?;

        let state = repo
            .distribution_state(case_id)?
            .unwrap_or_else(|| DistributionState::fresh(self.config.retry_limit));
        if state.status == DistributionStatus::Completed {
            return Ok(state);
        }

        self.generate_items(case_id, &repo)?;

        let sealed = SealedSeed::from_hex(&wallet.seed_encrypted)?;
        let guard = self.vault.open(&sealed)?;
        let keypair = guard.keypair()?;
        if keypair.address().to_string() != wallet.address {
            return Err(ExecError::integrity(
                codes::REGULAR_KEY_SEED_MISMATCH,
                "custodial seed does not derive the stored address",
            ));
        }

        let params = self.ledger.server_params()?;
        let mut items = repo.distribution_items(case_id)?;
        for item in items.iter_mut() {
            let due = match item.status {
                DistItemStatus::Pending => true,
                DistItemStatus::Failed => item.attempts < state.retry_limit,
                DistItemStatus::Verified | DistItemStatus::Skipped => false,
            };
            if !due {
                continue;
            }
            self.pay_item(&wallet.address, &keypair, &params, state.retry_limit, item)?;
            repo.put_distribution_item(case_id, item)?;
        }
        drop(guard);

        let state = reduce(&repo.distribution_items(case_id)?, state.retry_limit);
        repo.put_distribution_state(case_id, &state)?;
        info!(
            "distribution pass for case {case_id}: {:?}, {}/{} paid, {} skipped",
            state.status, state.success_count, state.total_count, state.skipped_count
        );
        Ok(state)
    }

    fn require_validated_approval(&self, case_id: &str, repo: &CaseRepo<'a>) -> Result<()> {
        let not_ready = || ExecError::not_ready("承認トランザクションが検証されていません");

        let approval = repo
            .approval_tx(case_id)?
            .filter(|a| a.status == ApprovalStatus::Submitted)
            .ok_or_else(not_ready)?;
        let hash = approval.submitted_tx_hash.as_deref().ok_or_else(not_ready)?;
        match self.ledger.transaction(hash)? {
            Some(status) if status.is_final_success() => Ok(()),
            _ => Err(not_ready()),
        }
    }

    /// Materialize distribution items for every active plan. Existing items
    /// are left untouched, so items only ever accumulate.
    fn generate_items(&self, case_id: &str, repo: &CaseRepo<'a>) -> Result<()> {
        let lock_items = repo.lock_items(case_id)?;
        let existing: HashSet<String> = repo
            .distribution_items(case_id)?
            .into_iter()
            .map(|i| i.item_id)
            .collect();

        for plan in repo.plans(case_id)?.iter().filter(|p| p.active) {
            // percent allocations split the locked amount per token line
            let mut groups: Vec<(Option<TokenId>, Vec<(String, u8)>)> = Vec::new();
            for alloc in &plan.allocations {
                if let AllocationKind::Percent { percent } = alloc.kind {
                    match groups.iter_mut().find(|(token, _)| *token == alloc.token) {
                        Some((_, shares)) => shares.push((alloc.heir_uid.clone(), percent)),
                        None => groups
                            .push((alloc.token.clone(), vec![(alloc.heir_uid.clone(), percent)])),
                    }
                }
            }
            for (token, shares) in &groups {
                let total: u32 = shares.iter().map(|(_, p)| u32::from(*p)).sum();
                if total > 100 {
                    return Err(ExecError::validation(format!(
                        "指図 {} の配分割合が100%を超えています",
                        plan.plan_id
                    )));
                }
                let base = lock_items
                    .iter()
                    .find(|li| li.asset_id == plan.asset_id && li.token == *token)
                    .map(|li| li.planned_amount)
                    .unwrap_or(0);
                for (heir_uid, amount) in split_percent(base, shares) {
                    if amount == 0 {
                        continue;
                    }
                    let item_id =
                        format!("{}:p:{}:{}", plan.plan_id, heir_uid, token_key(token));
                    if existing.contains(&item_id) {
                        continue;
                    }
                    let item = DistributionItem {
                        heir_address: self.heir_address(repo, case_id, &heir_uid)?,
                        heir_uid,
                        item_id,
                        plan_id: plan.plan_id.clone(),
                        asset_id: plan.asset_id.clone(),
                        token: token.clone(),
                        amount,
                        status: DistItemStatus::Pending,
                        tx_hash: None,
                        error: None,
                        attempts: 0,
                        kind: DistItemKind::Transfer,
                        nft_token_id: None,
                        offer_id: None,
                    };
                    repo.put_distribution_item(case_id, &item)?;
                }
            }

            for (index, alloc) in plan.allocations.iter().enumerate() {
                let (item_id, kind, amount, nft_token_id) = match &alloc.kind {
                    AllocationKind::Percent { .. } => continue,
                    AllocationKind::Amount { amount } => {
                        if *amount == 0 {
                            continue;
                        }
                        let id = format!("{}:a{}:{}", plan.plan_id, index, alloc.heir_uid);
                        (id, DistItemKind::Transfer, *amount, None)
                    }
                    AllocationKind::Nft { token_id } => {
                        let id = format!("{}:n:{}:{}", plan.plan_id, token_id, alloc.heir_uid);
                        (id, DistItemKind::Nft, 0, Some(token_id.clone()))
                    }
                };
                if existing.contains(&item_id) {
                    continue;
                }
                let item = DistributionItem {
                    heir_address: self.heir_address(repo, case_id, &alloc.heir_uid)?,
                    heir_uid: alloc.heir_uid.clone(),
                    item_id,
                    plan_id: plan.plan_id.clone(),
                    asset_id: plan.asset_id.clone(),
                    token: alloc.token.clone(),
                    amount,
                    status: DistItemStatus::Pending,
                    tx_hash: None,
                    error: None,
                    attempts: 0,
                    kind,
                    nft_token_id,
                    offer_id: None,
                };
                repo.put_distribution_item(case_id, &item)?;
            }
        }
        Ok(())
    }

    fn heir_address(&self, repo: &CaseRepo<'a>, case_id: &str, uid: &str) -> Result<String> {
        repo.heir(case_id, uid)?
            .as_ref()
            .and_then(|h| h.verified_address())
            .map(str::to_string)
            .ok_or_else(|| {
                ExecError::precondition(
                    codes::HEIR_WALLET_UNVERIFIED,
                    format!("相続人 {uid} のウォレットが未検証です"),
                )
            })
    }

    /// Attempt one payout. Ledger rejections are recorded on the item and
    /// never abort the pass; only transport errors propagate.
    fn pay_item(
        &self,
        custodial: &str,
        keypair: &Keypair,
        params: &ServerParams,
        retry_limit: u32,
        item: &mut DistributionItem,
    ) -> Result<()> {
        let info = self.ledger.account_info(custodial)?;

        let tx = match item.kind {
            DistItemKind::Transfer => {
                let amount = match &item.token {
                    None => {
                        let max_sendable = info
                            .balance_drops
                            .saturating_sub(params.reserve_for(info.owner_count))
                            .saturating_sub(params.base_fee_drops);
                        if max_sendable == 0 {
                            record_failure(
                                item,
                                retry_limit,
                                "残高が不足しているため送金できません".to_string(),
                            );
                            return Ok(());
                        }
                        TxAmount::Drops(item.amount.min(max_sendable))
                    }
                    Some(token) => TxAmount::Token {
                        currency: token.currency.clone(),
                        issuer: token.issuer.clone(),
                        value_micro: item.amount,
                    },
                };
                UnsignedTx::payment(
                    custodial,
                    &item.heir_address,
                    &amount,
                    info.sequence,
                    params.base_fee_drops,
                )
            }
            DistItemKind::Nft => {
                let token_id = match item.nft_token_id.as_deref() {
                    Some(token_id) => token_id,
                    None => {
                        record_failure(item, retry_limit, "NFTの指定がありません".to_string());
                        return Ok(());
                    }
                };
                UnsignedTx::nft_sell_offer(
                    custodial,
                    token_id,
                    &item.heir_address,
                    info.sequence,
                    params.base_fee_drops,
                )
            }
        };

        let signed = tx.sign(keypair)?;
        let result = self.ledger.submit(&signed.blob)?;
        if result.is_success() {
            item.status = DistItemStatus::Verified;
            item.tx_hash = Some(result.tx_hash);
            item.error = None;
            if item.kind == DistItemKind::Nft {
                item.offer_id = Some(nft_offer_id(custodial, info.sequence)?);
            }
        } else {
            warn!(
                "payout {} rejected: {}",
                item.item_id, result.engine_result
            );
            record_failure(
                item,
                retry_limit,
                format!("{}: {}", result.engine_result, result.engine_message),
            );
        }
        Ok(())
    }
}

fn token_key(token: &Option<TokenId>) -> String {
    match token {
        None => "native".to_string(),
        Some(t) => format!("{}.{}", t.currency, t.issuer),
    }
}

fn record_failure(item: &mut DistributionItem, retry_limit: u32, error: String) {
    item.attempts += 1;
    item.error = Some(error);
    item.status = if item.attempts >= retry_limit {
        DistItemStatus::Skipped
    } else {
        DistItemStatus::Failed
    };
}

/// Aggregate the item set into a state. Escalations are the items that
/// exhausted their retries; recomputing from the set keeps the count stable
/// across repeated passes.
fn reduce(items: &[DistributionItem], retry_limit: u32) -> DistributionState {
    let mut state = DistributionState::fresh(retry_limit);
    state.total_count = items.len() as u32;
    for item in items {
        match item.status {
            DistItemStatus::Verified => state.success_count += 1,
            DistItemStatus::Failed => state.failed_count += 1,
            DistItemStatus::Skipped => state.skipped_count += 1,
            DistItemStatus::Pending => {}
        }
    }
    state.escalation_count = state.skipped_count;

    let open = state.total_count - state.success_count - state.skipped_count;
    state.status = if state.success_count == state.total_count {
        DistributionStatus::Completed
    } else if state.skipped_count == state.total_count {
        DistributionStatus::Failed
    } else if open == 0 {
        DistributionStatus::Partial
    } else {
        DistributionStatus::Running
    };
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LockMethod;
    use crate::records::{CaseStage, PlanAllocation, PlanRecord};
    use crate::test_utils::{sign_share, test_keypair, TestWorld};

    /// Case with a validated approval transaction: the full lock and quorum
    /// pipelines have run for two heirs splitting one 50M-drop asset.
    fn approved_world_with_shares(shares: &[(&str, u8)]) -> TestWorld {
        let world = TestWorld::new();
        world.seed_case("case-1", "owner", &["heir-1", "heir-2"]);
        world.add_verified_heir("case-1", "heir-1", 0x11);
        world.add_verified_heir("case-1", "heir-2", 0x12);
        world.add_asset("case-1", "asset-1", 50_000_000, 10_000_000, 0x21);
        world.add_percent_plan("case-1", "plan-1", "asset-1", shares);

        let lock = world.lock();
        lock.start("case-1", LockMethod::RegularKey).unwrap();
        world.delegate_regular_keys("case-1");
        lock.verify_regular_key("case-1").unwrap();
        lock.execute("case-1").unwrap();
        lock.complete("case-1").unwrap();
        world.set_stage("case-1", CaseStage::InProgress);

        let quorum = world.quorum();
        let snapshot = quorum.prepare("case-1", false).unwrap();
        for (uid, tag) in [("heir-1", 0x11u8), ("heir-2", 0x12)] {
            quorum
                .sign(
                    "case-1",
                    uid,
                    &sign_share(&snapshot.approval.tx_json, &test_keypair(tag)),
                )
                .unwrap();
        }
        world
    }

    fn approved_world() -> TestWorld {
        approved_world_with_shares(&[("heir-1", 60), ("heir-2", 40)])
    }

    #[test]
    fn test_execute_requires_validated_approval() {
        let world = TestWorld::new();
        world.seed_case("case-1", "owner", &["heir-1"]);

        let err = world.distribution().execute("case-1").unwrap_err();
        assert_eq!(err.code, codes::NOT_READY);
        assert_eq!(
            err.message,
            "承認トランザクションが検証されていません"
        );
    }

    #[test]
    fn test_execute_requires_approval_actually_validated() {
        let world = TestWorld::new();
        world.ledger.set_auto_validate(false);
        world.seed_case("case-1", "owner", &["heir-1", "heir-2"]);
        world.add_verified_heir("case-1", "heir-1", 0x11);
        world.add_verified_heir("case-1", "heir-2", 0x12);
        world.add_asset("case-1", "asset-1", 50_000_000, 10_000_000, 0x21);
        world.add_percent_plan("case-1", "plan-1", "asset-1", &[("heir-1", 60), ("heir-2", 40)]);
        let lock = world.lock();
        lock.start("case-1", LockMethod::RegularKey).unwrap();
        world.delegate_regular_keys("case-1");
        lock.verify_regular_key("case-1").unwrap();
        lock.execute("case-1").unwrap();
        lock.complete("case-1").unwrap();
        world.set_stage("case-1", CaseStage::InProgress);
        let quorum = world.quorum();
        let snapshot = quorum.prepare("case-1", false).unwrap();
        for (uid, tag) in [("heir-1", 0x11u8), ("heir-2", 0x12)] {
            quorum
                .sign(
                    "case-1",
                    uid,
                    &sign_share(&snapshot.approval.tx_json, &test_keypair(tag)),
                )
                .unwrap();
        }

        // submitted but still unvalidated
        let err = world.distribution().execute("case-1").unwrap_err();
        assert_eq!(err.code, codes::NOT_READY);
    }

    #[test]
    fn test_execute_pays_heirs_by_percent() {
        let world = approved_world();
        let state = world.distribution().execute("case-1").unwrap();

        assert_eq!(state.status, DistributionStatus::Completed);
        assert_eq!(state.total_count, 2);
        assert_eq!(state.success_count, 2);
        assert_eq!(state.escalation_count, 0);

        // 60% of the 40M lock item
        let heir1 = test_keypair(0x11).address().to_string();
        assert_eq!(world.ledger.balance_of(&heir1), Some(24_000_000));
        // 40% would be 16M but the custodial spendable balance caps it
        let heir2 = test_keypair(0x12).address().to_string();
        assert_eq!(world.ledger.balance_of(&heir2), Some(3_999_919));
        // custodial account is left holding exactly its own reserve
        let custodial = world.custodial_address("case-1");
        assert_eq!(world.ledger.balance_of(&custodial), Some(12_000_000));

        let items = world.repo().distribution_items("case-1").unwrap();
        assert!(items.iter().all(|i| i.status == DistItemStatus::Verified));
        assert!(items.iter().all(|i| i.tx_hash.is_some()));
    }

    #[test]
    fn test_single_heir_full_allocation_completes() {
        let world = TestWorld::new();
        world.seed_case("case-1", "owner", &["heir-1"]);
        world.add_verified_heir("case-1", "heir-1", 0x11);
        world.add_asset("case-1", "asset-1", 50_000_000, 10_000_000, 0x21);
        world.add_percent_plan("case-1", "plan-1", "asset-1", &[("heir-1", 100)]);

        let lock = world.lock();
        lock.start("case-1", LockMethod::RegularKey).unwrap();
        world.delegate_regular_keys("case-1");
        lock.verify_regular_key("case-1").unwrap();
        lock.execute("case-1").unwrap();
        lock.complete("case-1").unwrap();
        world.set_stage("case-1", CaseStage::InProgress);

        let quorum = world.quorum();
        let snapshot = quorum.prepare("case-1", false).unwrap();
        let outcome = quorum
            .sign(
                "case-1",
                "heir-1",
                &sign_share(&snapshot.approval.tx_json, &test_keypair(0x11)),
            )
            .unwrap();
        assert!(outcome.submitted);

        let state = world.distribution().execute("case-1").unwrap();
        assert_eq!(state.status, DistributionStatus::Completed);
        assert_eq!(state.total_count, 1);
        assert_eq!(state.success_count, 1);
    }

    #[test]
    fn test_execute_idempotent_once_completed() {
        let world = approved_world();
        let distribution = world.distribution();
        distribution.execute("case-1").unwrap();

        let submissions = world.ledger.submission_count();
        let state = distribution.execute("case-1").unwrap();
        assert_eq!(state.status, DistributionStatus::Completed);
        assert_eq!(world.ledger.submission_count(), submissions);
    }

    #[test]
    fn test_failed_items_escalate_exactly_once() {
        let world = approved_world();
        let distribution = world.distribution();
        for _ in 0..6 {
            world.ledger.fail_next_submit("telINSUF_FEE_P");
        }

        // three passes exhaust the default retry limit for both items
        let state = distribution.execute("case-1").unwrap();
        assert_eq!(state.status, DistributionStatus::Running);
        assert_eq!(state.failed_count, 2);
        distribution.execute("case-1").unwrap();
        let state = distribution.execute("case-1").unwrap();

        assert_eq!(state.status, DistributionStatus::Failed);
        assert_eq!(state.skipped_count, 2);
        assert_eq!(state.escalation_count, 2);

        // skipped items are settled; another pass changes nothing
        let submissions = world.ledger.submission_count();
        let state = distribution.execute("case-1").unwrap();
        assert_eq!(state.escalation_count, 2);
        assert_eq!(world.ledger.submission_count(), submissions);

        let items = world.repo().distribution_items("case-1").unwrap();
        assert!(items.iter().all(|i| i.attempts == 3));
        assert!(items
            .iter()
            .all(|i| i.error.as_deref() == Some("telINSUF_FEE_P: scripted failure")));
    }

    #[test]
    fn test_partial_when_some_items_exhaust_retries() {
        let world = approved_world();
        // replace the plan: 60% native to heir-1 plus a token amount to
        // heir-2 that the custodial account holds no line for
        let repo = world.repo();
        let issuer = test_keypair(0x77).address().to_string();
        repo.put_plan(&PlanRecord {
            plan_id: "plan-1".to_string(),
            case_id: "case-1".to_string(),
            asset_id: "asset-1".to_string(),
            active: true,
            heir_uids: vec!["heir-1".to_string(), "heir-2".to_string()],
            allocations: vec![
                PlanAllocation {
                    heir_uid: "heir-1".to_string(),
                    kind: AllocationKind::Percent { percent: 60 },
                    token: None,
                },
                PlanAllocation {
                    heir_uid: "heir-2".to_string(),
                    kind: AllocationKind::Amount { amount: 5_000_000 },
                    token: Some(TokenId {
                        currency: "USD".to_string(),
                        issuer,
                    }),
                },
            ],
        })
        .unwrap();

        let distribution = world.distribution();
        distribution.execute("case-1").unwrap();
        distribution.execute("case-1").unwrap();
        let state = distribution.execute("case-1").unwrap();

        assert_eq!(state.status, DistributionStatus::Partial);
        assert_eq!(state.success_count, 1);
        assert_eq!(state.skipped_count, 1);
        assert_eq!(state.escalation_count, 1);
        assert_eq!(state.failed_count, 0);
    }

    #[test]
    fn test_nft_allocation_creates_restricted_offer() {
        let world = TestWorld::new();
        world.seed_case("case-1", "owner", &["heir-1"]);
        world.add_verified_heir("case-1", "heir-1", 0x11);
        world.add_asset("case-1", "asset-1", 50_000_000, 10_000_000, 0x21);
        let token_id = "00080000FADE0123";
        world.add_nft_plan("case-1", "plan-1", "asset-1", "heir-1", token_id);

        let lock = world.lock();
        lock.start("case-1", LockMethod::RegularKey).unwrap();
        world.delegate_regular_keys("case-1");
        lock.verify_regular_key("case-1").unwrap();
        lock.execute("case-1").unwrap();
        lock.complete("case-1").unwrap();
        world.set_stage("case-1", CaseStage::InProgress);

        let custodial = world.custodial_address("case-1");
        world.ledger.add_nft(&custodial, token_id);

        let quorum = world.quorum();
        let snapshot = quorum.prepare("case-1", false).unwrap();
        quorum
            .sign(
                "case-1",
                "heir-1",
                &sign_share(&snapshot.approval.tx_json, &test_keypair(0x11)),
            )
            .unwrap();

        let state = world.distribution().execute("case-1").unwrap();
        assert_eq!(state.status, DistributionStatus::Completed);

        let items = world.repo().distribution_items("case-1").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, DistItemKind::Nft);
        let offer_id = items[0].offer_id.as_deref().unwrap();
        let heir1 = test_keypair(0x11).address().to_string();
        assert_eq!(
            world.ledger.offer_details(offer_id),
            Some((token_id.to_string(), heir1))
        );
    }

    #[test]
    fn test_new_plans_are_picked_up_additively() {
        // small shares keep the custodial account funded across both passes
        let world = approved_world_with_shares(&[("heir-1", 20), ("heir-2", 40)]);
        let distribution = world.distribution();

        // first pass: heir-1's payout is rejected once, heir-2's succeeds
        world.ledger.fail_next_submit("telINSUF_FEE_P");
        let state = distribution.execute("case-1").unwrap();
        assert_eq!(state.status, DistributionStatus::Running);
        assert_eq!(state.failed_count, 1);

        // a newly activated plan joins the next pass
        world
            .repo()
            .put_plan(&PlanRecord {
                plan_id: "plan-2".to_string(),
                case_id: "case-1".to_string(),
                asset_id: "asset-1".to_string(),
                active: true,
                heir_uids: vec!["heir-2".to_string()],
                allocations: vec![PlanAllocation {
                    heir_uid: "heir-2".to_string(),
                    kind: AllocationKind::Amount { amount: 1_000_000 },
                    token: None,
                }],
            })
            .unwrap();

        let state = distribution.execute("case-1").unwrap();
        assert_eq!(state.status, DistributionStatus::Completed);
        assert_eq!(state.total_count, 3);
        assert_eq!(state.success_count, 3);

        let items = world.repo().distribution_items("case-1").unwrap();
        let retried = items
            .iter()
            .find(|i| i.item_id == "plan-1:p:heir-1:native")
            .unwrap();
        assert_eq!(retried.attempts, 1);
        assert_eq!(retried.status, DistItemStatus::Verified);
    }

    #[test]
    fn test_percent_over_hundred_rejected() {
        let world = approved_world();
        world.add_percent_plan(
            "case-1",
            "plan-9",
            "asset-1",
            &[("heir-1", 70), ("heir-2", 40)],
        );

        let err = world.distribution().execute("case-1").unwrap_err();
        assert_eq!(err.code, codes::VALIDATION_ERROR);
    }

    #[test]
    fn test_generation_requires_verified_heir_wallets() {
        let world = approved_world();
        world.add_unverified_heir("case-1", "heir-3");
        world.add_percent_plan("case-1", "plan-3", "asset-1", &[("heir-3", 10)]);

        let err = world.distribution().execute("case-1").unwrap_err();
        assert_eq!(err.code, codes::HEIR_WALLET_UNVERIFIED);
    }

    #[test]
    fn test_reduce_aggregates_item_set() {
        let item = |status: DistItemStatus| DistributionItem {
            item_id: "i".to_string(),
            plan_id: "p".to_string(),
            asset_id: "a".to_string(),
            heir_uid: "h".to_string(),
            heir_address: "r".to_string(),
            token: None,
            amount: 1,
            status,
            tx_hash: None,
            error: None,
            attempts: 0,
            kind: DistItemKind::Transfer,
            nft_token_id: None,
            offer_id: None,
        };

        assert_eq!(reduce(&[], 3).status, DistributionStatus::Completed);
        assert_eq!(
            reduce(&[item(DistItemStatus::Verified)], 3).status,
            DistributionStatus::Completed
        );
        assert_eq!(
            reduce(&[item(DistItemStatus::Skipped)], 3).status,
            DistributionStatus::Failed
        );
        assert_eq!(
            reduce(&[item(DistItemStatus::Verified), item(DistItemStatus::Skipped)], 3).status,
            DistributionStatus::Partial
        );
        assert_eq!(
            reduce(&[item(DistItemStatus::Verified), item(DistItemStatus::Failed)], 3).status,
            DistributionStatus::Running
        );
        assert_eq!(
            reduce(&[item(DistItemStatus::Pending)], 3).status,
            DistributionStatus::Running
        );

        let state = reduce(
            &[item(DistItemStatus::Skipped), item(DistItemStatus::Verified)],
            3,
        );
        assert_eq!(state.escalation_count, 1);
        assert_eq!(state.total_count, 2);
    }
}
