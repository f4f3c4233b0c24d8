//! Asset-lock pipeline
//!
//! Moves funds from the owner's source accounts into one freshly generated
//! custodial account. The owner delegates each source account's regular key
//! to the custodial address from their own wallet; this orchestrator
//! verifies the delegation, then signs the transfers with the custodial key
//! and finally clears the delegation again.
//!
//! Transfers are tracked as one [`LockItem`] per source asset and token, so a
//! partially failed pass resumes exactly where it stopped when the caller
//! re-invokes `execute`.

use log::{debug, info, warn};

use keirloom_core::{Address, FamilySeed, Keypair, SealedSeed, SeedVault};
use keirloom_gateway::tx::{TxAmount, UnsignedTx};
use keirloom_gateway::{LedgerGateway, ServerParams};
use keirloom_store::{CaseLease, CaseStore};

use crate::error::{codes, ExecError, Result};
use crate::model::{
    CustodialWallet, KeyStatus, LockItem, LockItemStatus, LockMethod, LockState, LockStatus,
    MethodStep, RegularKeyStatus, TokenId,
};
use crate::records::{CaseStage, PlanRecord};
use crate::repo::CaseRepo;
use crate::{random_hex, ExecConfig};

pub struct LockOrchestrator<'a> {
    store: &'a dyn CaseStore,
    ledger: &'a dyn LedgerGateway,
    vault: &'a SeedVault,
    config: &'a ExecConfig,
}

impl<'a> LockOrchestrator<'a> {
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

    fn lease(&self, case_id: &str) -> Result<CaseLease<'a>> {
        Ok(CaseLease::acquire_with_ttl(
            self.store,
            case_id,
            self.config.lease_ttl_secs,
        )?)
    }

    /// Begin the lock: generate and seal the custodial wallet, then build
    /// the full transfer-item set from the cached asset summaries. Running
    /// it again replaces every item.
    pub fn start(&self, case_id: &str, method: LockMethod) -> Result<LockState> {
        let _lease = self.lease(case_id)?;
        let repo = self.repo();
        repo.case(case_id)?;

        let plans: Vec<PlanRecord> = repo
            .plans(case_id)?
            .into_iter()
            .filter(|p| p.active)
            .collect();
        if plans.is_empty() {
            return Err(ExecError::not_ready("有効な相続指図がありません"));
        }
        if plans.iter().any(|p| p.heir_uids.is_empty()) {
            return Err(ExecError::not_ready("相続人が未設定の指図があります"));
        }
        if method == LockMethod::Manual {
            return Err(ExecError::validation(
                "手動ロックはこの処理では実行できません",
            ));
        }

        let (address, seed) = self.custodial_wallet()?;
        let sealed = self.vault.seal(&seed)?;
        drop(seed);
        let wallet = CustodialWallet {
            address,
            seed_encrypted: sealed.to_hex(),
        };

        repo.clear_lock_items(case_id)?;
        let mut statuses = Vec::new();
        for asset in repo.assets(case_id)? {
            let mut item_count = 0;

            let native = asset.balance_drops.saturating_sub(asset.reserve_drops);
            if native > 0 {
                repo.put_lock_item(
                    case_id,
                    &new_item(&asset.asset_id, &asset.label, &asset.address, None, native),
                )?;
                item_count += 1;
            }
            for held in &asset.tokens {
                if held.balance_micro > 0 {
                    repo.put_lock_item(
                        case_id,
                        &new_item(
                            &asset.asset_id,
                            &asset.label,
                            &asset.address,
                            Some(held.token.clone()),
                            held.balance_micro,
                        ),
                    )?;
                    item_count += 1;
                }
            }

            if item_count > 0 {
                statuses.push(RegularKeyStatus {
                    asset_id: asset.asset_id.clone(),
                    address: asset.address.clone(),
                    status: KeyStatus::Pending,
                    message: None,
                });
            } else {
                debug!("asset {} has nothing to lock, omitted", asset.asset_id);
            }
        }

        let state = LockState {
            status: LockStatus::Ready,
            method,
            method_step: Some(MethodStep::RegularKeySet),
            ui_step: 3,
            wallet: Some(wallet),
            regular_key_statuses: statuses,
        };
        repo.put_lock_state(case_id, &state)?;
        info!(
            "lock started for case {case_id}: {} source accounts",
            state.regular_key_statuses.len()
        );
        Ok(state)
    }

    /// Check each source account's regular key against the custodial
    /// address. Advances to the transfer step once every account checks out.
    pub fn verify_regular_key(&self, case_id: &str) -> Result<LockState> {
        let _lease = self.lease(case_id)?;
        let repo = self.repo();
        let mut state = self.existing_state(&repo, case_id)?;
        let wallet = state.wallet.clone().ok_or_else(|| {
            ExecError::config(codes::LOCK_WALLET_MISSING, "custodial wallet missing")
        })?;

        if state.regular_key_statuses.is_empty() {
            state.method_step = Some(MethodStep::AutoTransfer);
            repo.put_lock_state(case_id, &state)?;
            return Ok(state);
        }

        for status in &mut state.regular_key_statuses {
            match self.ledger.account_info(&status.address) {
                Ok(info) => {
                    if info.regular_key.as_deref() == Some(wallet.address.as_str()) {
                        status.status = KeyStatus::Verified;
                        status.message = None;
                    } else if info.regular_key.is_none() {
                        status.status = KeyStatus::Unverified;
                        status.message = Some("レギュラーキーが未設定です".to_string());
                    } else {
                        status.status = KeyStatus::Unverified;
                        status.message =
                            Some("レギュラーキーがロック用アドレスと一致しません".to_string());
                    }
                }
                Err(e) if e.is_retryable() => return Err(e.into()),
                Err(_) => {
                    status.status = KeyStatus::Unverified;
                    status.message = Some("アカウントが見つかりません".to_string());
                }
            }
        }

        if state
            .regular_key_statuses
            .iter()
            .all(|s| s.status == KeyStatus::Verified)
        {
            state.method_step = Some(MethodStep::AutoTransfer);
        }
        repo.put_lock_state(case_id, &state)?;
        Ok(state)
    }

    /// Externally requested step change. The transfer step is gated: it is
    /// refused while any source account failed verification.
    pub fn update_state(&self, case_id: &str, requested_step: MethodStep) -> Result<LockState> {
        let _lease = self.lease(case_id)?;
        let repo = self.repo();
        let mut state = self.existing_state(&repo, case_id)?;

        if requested_step == MethodStep::AutoTransfer
            && state
                .regular_key_statuses
                .iter()
                .any(|s| s.status == KeyStatus::Unverified)
        {
            return Err(ExecError::validation(
                "レギュラーキーが未検証のため自動送金へ進めません",
            ));
        }

        state.method_step = Some(requested_step);
        repo.put_lock_state(case_id, &state)?;
        Ok(state)
    }

    /// Run every pending transfer into custody, then clear the delegations.
    ///
    /// Native amounts are capped at what the source can send after reserve
    /// and fee; a source that cannot send anything aborts the call. Items
    /// that fail on-ledger keep their error and stay pending for the next
    /// invocation. Once no pending item remains, the regular keys are
    /// cleared and the case moves to the waiting stage.
    pub fn execute(&self, case_id: &str) -> Result<(LockState, Vec<LockItem>)> {
        let _lease = self.lease(case_id)?;
        let repo = self.repo();
        let mut state = self.existing_state(&repo, case_id)?;

        if state
            .regular_key_statuses
            .iter()
            .any(|s| s.status != KeyStatus::Verified)
        {
            return Err(ExecError::validation(
                "レギュラーキーの検証が完了していません",
            ));
        }
        let wallet = state.wallet.clone().ok_or_else(|| {
            ExecError::config(codes::LOCK_WALLET_MISSING, "custodial wallet missing")
        })?;

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
        let mut items = repo.lock_items(case_id)?;
        for item in items.iter_mut() {
            if item.status != LockItemStatus::Pending {
                continue;
            }
            self.transfer_item(case_id, &repo, &wallet.address, &keypair, &params, item)?;
        }

        let all_verified = items.iter().all(|i| i.status == LockItemStatus::Verified);
        if all_verified && state.method_step != Some(MethodStep::RegularKeyCleared) {
            for status in &state.regular_key_statuses {
                self.clear_regular_key(&status.address, &keypair, &params);
            }
            state.method_step = Some(MethodStep::RegularKeyCleared);
            repo.put_lock_state(case_id, &state)?;

            let mut case = repo.case(case_id)?;
            case.stage = CaseStage::Waiting;
            repo.put_case(&case)?;
            info!("lock transfers complete for case {case_id}, delegations cleared");
        }

        Ok((state, items))
    }

    /// Final confirmation. Marks the lock immutable and the case waiting.
    pub fn complete(&self, case_id: &str) -> Result<LockState> {
        let _lease = self.lease(case_id)?;
        let repo = self.repo();
        let mut state = self.existing_state(&repo, case_id)?;

        state.status = LockStatus::Locked;
        repo.put_lock_state(case_id, &state)?;

        let mut case = repo.case(case_id)?;
        case.asset_lock_status = Some(LockStatus::Locked);
        case.stage = CaseStage::Waiting;
        repo.put_case(&case)?;
        Ok(state)
    }

    fn existing_state(&self, repo: &CaseRepo<'a>, case_id: &str) -> Result<LockState> {
        repo.lock_state(case_id)?
            .ok_or_else(|| ExecError::not_ready("資産ロックが開始されていません"))
    }

    /// Prefer the node's wallet proposal; generate locally when the call
    /// fails or the proposal does not validate against our own codec and
    /// derivation. An invalid address must never reach the stored state.
    fn custodial_wallet(&self) -> Result<(String, FamilySeed)> {
        match self.ledger.propose_wallet() {
            Ok(proposed) => {
                if proposed.address.parse::<Address>().is_ok() {
                    if let Ok(seed) = proposed.seed.parse::<FamilySeed>() {
                        if let Ok(keypair) = Keypair::derive(&seed) {
                            if keypair.address().to_string() == proposed.address {
                                return Ok((proposed.address.clone(), seed));
                            }
                        }
                    }
                }
                warn!("proposed wallet failed local validation, generating locally");
            }
            Err(e) => warn!("wallet proposal unavailable ({e}), generating locally"),
        }

        let seed = FamilySeed::generate();
        let keypair = Keypair::derive(&seed)?;
        Ok((keypair.address().to_string(), seed))
    }

    fn transfer_item(
        &self,
        case_id: &str,
        repo: &CaseRepo<'a>,
        custodial_address: &str,
        keypair: &Keypair,
        params: &ServerParams,
        item: &mut LockItem,
    ) -> Result<()> {
        let info = match self.ledger.account_info(&item.asset_address) {
            Ok(info) => info,
            Err(e) if e.is_retryable() => return Err(e.into()),
            Err(e) => {
                item.error = Some(e.to_string());
                repo.put_lock_item(case_id, item)?;
                return Ok(());
            }
        };

        let amount = match &item.token {
            None => {
                let reserve = params.reserve_for(info.owner_count);
                let max_sendable = info
                    .balance_drops
                    .saturating_sub(reserve)
                    .saturating_sub(params.base_fee_drops);
                if max_sendable == 0 {
                    return Err(ExecError::ledger(
                        codes::INSUFFICIENT_BALANCE,
                        format!("{}: 残高が不足しているため送金できません", item.asset_label),
                    ));
                }
                if item.planned_amount > max_sendable {
                    debug!(
                        "item {}: planned {} exceeds sendable {}, scaling down",
                        item.item_id, item.planned_amount, max_sendable
                    );
                }
                TxAmount::Drops(item.planned_amount.min(max_sendable))
            }
            Some(TokenId { currency, issuer }) => TxAmount::Token {
                currency: currency.clone(),
                issuer: issuer.clone(),
                value_micro: item.planned_amount,
            },
        };

        let tx = UnsignedTx::payment(
            &item.asset_address,
            custodial_address,
            &amount,
            info.sequence,
            params.base_fee_drops,
        );
        let signed = tx.sign(keypair)?;
        let result = self.ledger.submit(&signed.blob)?;
        if result.is_success() {
            item.status = LockItemStatus::Verified;
            item.tx_hash = Some(result.tx_hash);
            item.error = None;
        } else {
            warn!(
                "lock transfer {} rejected: {}",
                item.item_id, result.engine_result
            );
            item.error = Some(format!(
                "{}: {}",
                result.engine_result, result.engine_message
            ));
        }
        repo.put_lock_item(case_id, item)?;
        Ok(())
    }

    /// Remove the delegation from one source account. Failure here is
    /// logged, not fatal: the account owner can clear the key themselves.
    fn clear_regular_key(&self, address: &str, keypair: &Keypair, params: &ServerParams) {
        let cleared = self
            .ledger
            .account_info(address)
            .map_err(|e| e.to_string())
            .and_then(|info| {
                let tx = UnsignedTx::set_regular_key(
                    address,
                    None,
                    info.sequence,
                    params.base_fee_drops,
                );
                let signed = tx.sign(keypair).map_err(|e| e.to_string())?;
                let result = self.ledger.submit(&signed.blob).map_err(|e| e.to_string())?;
                if result.is_success() {
                    Ok(())
                } else {
                    Err(result.engine_result)
                }
            });
        if let Err(reason) = cleared {
            warn!("could not clear regular key on {address}: {reason}");
        }
    }
}

fn new_item(
    asset_id: &str,
    label: &str,
    address: &str,
    token: Option<TokenId>,
    planned_amount: u64,
) -> LockItem {
    LockItem {
        item_id: random_hex(8),
        asset_id: asset_id.to_string(),
        asset_label: label.to_string(),
        asset_address: address.to_string(),
        token,
        planned_amount,
        status: LockItemStatus::Pending,
        tx_hash: None,
        error: None,
    }
}
