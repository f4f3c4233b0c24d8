//! Signer-quorum approval pipeline
//!
//! Turns the custodial account into a multisignature account held jointly by
//! the system signer and the heirs, then negotiates one approval
//! transaction: a 1-drop payment to the verification destination carrying a
//! random memo challenge. The system signer co-signs its share at
//! preparation; heirs upload their shares one by one, and the combined
//! transaction is submitted the moment the signature weights reach quorum.
//!
//! The signer weights make the system structurally unable to act alone: for
//! `n` heirs the quorum is `n + n/2 + 1` while the system entry weighs `n`,
//! so a majority of heirs is always required.

use log::{info, warn};
use serde::Serialize;

use keirloom_core::wallet::{address_for_public_key, verify_signature};
use keirloom_core::{FamilySeed, Keypair, SealedSeed, SeedVault};
use keirloom_gateway::tx::{
    combine_shares, decode_blob, multisig_fee, multisig_signing_digest, tx_hash, SignerEntry,
    TxAmount, UnsignedTx,
};
use keirloom_gateway::{LedgerGateway, TxStatus};
use keirloom_store::{CaseLease, CaseStore};

use crate::error::{codes, ExecError, Result};
use crate::model::{
    ApprovalStatus, ApprovalTx, CustodialWallet, SignerListEntry, SignerListState,
    SignerListStatus, SignerSignature,
};
use crate::records::{CaseRecord, CaseStage};
use crate::repo::CaseRepo;
use crate::{random_hex, unix_now, ExecConfig};

/// Quorum for `n` heirs. One more than the system weight plus half the heir
/// weights, so neither side can act without the other.
pub fn quorum_for(heir_count: u32) -> u32 {
    heir_count + heir_count / 2 + 1
}

/// Where a submitted approval transaction stands on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalState {
    Pending,
    Validated,
    Expired,
}

/// Result of a `prepare` call.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalSnapshot {
    pub signer_list: SignerListState,
    pub approval: ApprovalTx,
    pub signatures_count: u32,
    pub required_count: u32,
}

/// Result of recording one heir's signature.
#[derive(Debug, Clone, Serialize)]
pub struct SignOutcome {
    pub signatures_count: u32,
    pub required_count: u32,
    pub signed_by_me: bool,
    pub submitted: bool,
}

pub struct QuorumOrchestrator<'a> {
    store: &'a dyn CaseStore,
    ledger: &'a dyn LedgerGateway,
    vault: &'a SeedVault,
    config: &'a ExecConfig,
}

impl<'a> QuorumOrchestrator<'a> {
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

    /// Configure the signer list if needed, then return the current approval
    /// transaction, creating one when none exists.
    ///
    /// `force` regenerates the approval transaction, but only after the
    /// ledger confirms it can no longer validate; regeneration discards all
    /// heir signatures and issues a fresh memo.
    pub fn prepare(&self, case_id: &str, force: bool) -> Result<ApprovalSnapshot> {
        let _lease = CaseLease::acquire_with_ttl(self.store, case_id, self.config.lease_ttl_secs)?;
        let repo = self.repo();

        let case = repo.case(case_id)?;
        if case.stage != CaseStage::InProgress {
            return Err(ExecError::not_ready("ケースが実行段階にありません"));
        }
        let wallet = repo
            .lock_state(case_id)?
            .and_then(|s| s.wallet)
            .ok_or_else(|| {
                ExecError::config(
                    codes::LOCK_WALLET_MISSING,
                    "custodial wallet is missing for this case",
                )
            })?;

        let mut signer_list = repo
            .signer_list(case_id)?
            .unwrap_or_else(SignerListState::unset);
        if signer_list.status != SignerListStatus::Set {
            signer_list = self.configure_signer_list(case_id, &repo, &case, &wallet)?;
        }

        if let Some(approval) = repo.approval_tx(case_id)? {
            if !force {
                return self.snapshot(case_id, &repo, signer_list, approval);
            }
            self.confirm_expired(&approval)?;
            repo.clear_signatures(case_id)?;
            info!("approval transaction for case {case_id} expired, regenerating");
        }

        let approval = self.build_approval(&wallet.address, signer_list.entries.len())?;
        repo.put_approval_tx(case_id, &approval)?;
        self.snapshot(case_id, &repo, signer_list, approval)
    }

    /// Record one heir's multisignature share. The share must verify against
    /// the current approval transaction, which makes shares from a
    /// regenerated (stale) challenge unusable. Submits the combined
    /// transaction once quorum is reached.
    pub fn sign(&self, case_id: &str, heir_uid: &str, signed_blob: &str) -> Result<SignOutcome> {
        let _lease = CaseLease::acquire_with_ttl(self.store, case_id, self.config.lease_ttl_secs)?;
        let repo = self.repo();

        let signer_list = repo
            .signer_list(case_id)?
            .filter(|l| l.status == SignerListStatus::Set)
            .ok_or_else(|| ExecError::not_ready("署名者リストが未設定です"))?;
        let mut approval = repo
            .approval_tx(case_id)?
            .ok_or_else(|| ExecError::not_ready("承認トランザクションが未作成です"))?;

        let heir_address = repo
            .heir(case_id, heir_uid)?
            .as_ref()
            .and_then(|h| h.verified_address())
            .map(str::to_string)
            .ok_or_else(|| {
                ExecError::precondition(
                    codes::HEIR_WALLET_UNVERIFIED,
                    format!("相続人 {heir_uid} のウォレットが未検証です"),
                )
            })?;

        let required_count = signer_list.required_heir_signatures();
        let mut signatures = repo.signatures(case_id)?;

        if approval.status == ApprovalStatus::Submitted {
            return Ok(SignOutcome {
                signatures_count: signatures.len() as u32,
                required_count,
                signed_by_me: signatures.iter().any(|s| s.uid == heir_uid),
                submitted: true,
            });
        }

        let share_hash = self.verify_share(&approval, &heir_address, signed_blob)?;
        repo.put_signature(
            case_id,
            &SignerSignature {
                uid: heir_uid.to_string(),
                address: heir_address,
                signed_blob: signed_blob.to_string(),
                tx_hash: share_hash,
                created_at: unix_now(),
            },
        )?;
        signatures = repo.signatures(case_id)?;

        let mut submitted = false;
        if signatures.len() as u32 >= required_count {
            let mut shares = vec![approval.system_signed_blob.clone()];
            shares.extend(signatures.iter().map(|s| s.signed_blob.clone()));
            let combined = combine_shares(&shares)?;

            let result = self.ledger.submit(&combined.blob)?;
            if !result.is_success() {
                warn!(
                    "combined approval for case {case_id} rejected: {}",
                    result.engine_result
                );
                return Err(ExecError::ledger(
                    codes::SUBMIT_FAILED,
                    format!(
                        "承認トランザクションの送信に失敗しました: {}",
                        result.engine_result
                    ),
                ));
            }
            approval.status = ApprovalStatus::Submitted;
            approval.submitted_tx_hash = Some(result.tx_hash.clone());
            repo.put_approval_tx(case_id, &approval)?;
            info!(
                "approval transaction for case {case_id} submitted: {}",
                result.tx_hash
            );
            submitted = true;
        }

        Ok(SignOutcome {
            signatures_count: signatures.len() as u32,
            required_count,
            signed_by_me: true,
            submitted,
        })
    }

    /// Where the approval stands: validated, expired, or still collecting
    /// signatures. An unsubmitted challenge counts as expired once the
    /// ledger passes its expiry index, since no future submission of it can
    /// succeed.
    pub fn approval_status(&self, case_id: &str) -> Result<ApprovalState> {
        let repo = self.repo();
        let approval = match repo.approval_tx(case_id)? {
            Some(tx) => tx,
            None => return Ok(ApprovalState::Pending),
        };
        let hash = match &approval.submitted_tx_hash {
            Some(hash) => hash.clone(),
            None => return self.expiry_verdict(&approval, None),
        };

        match self.ledger.transaction(&hash)? {
            Some(status) if status.validated => Ok(ApprovalState::Validated),
            Some(status) => self.expiry_verdict(&approval, Some(&status)),
            None => self.expiry_verdict(&approval, None),
        }
    }

    fn expiry_verdict(
        &self,
        approval: &ApprovalTx,
        status: Option<&TxStatus>,
    ) -> Result<ApprovalState> {
        let last_ledger = status
            .map(|s| s.last_ledger_sequence)
            .filter(|lls| *lls > 0)
            .unwrap_or(approval.last_ledger_sequence);
        let index = self.ledger.validated_ledger_index()?;
        if index > last_ledger {
            Ok(ApprovalState::Expired)
        } else {
            Ok(ApprovalState::Pending)
        }
    }

    /// Refuse regeneration while the approval could still validate. A
    /// validated approval can never be regenerated.
    fn confirm_expired(&self, approval: &ApprovalTx) -> Result<()> {
        let status = match approval.submitted_tx_hash.as_deref() {
            Some(hash) => self.ledger.transaction(hash)?,
            None => None,
        };
        match status {
            Some(status) if status.validated => Err(ExecError::precondition(
                codes::APPROVAL_NOT_EXPIRED,
                "承認トランザクションは検証済みのため再作成できません",
            )),
            other => {
                let verdict = self.expiry_verdict(approval, other.as_ref())?;
                if verdict == ApprovalState::Expired {
                    Ok(())
                } else {
                    Err(ExecError::precondition(
                        codes::APPROVAL_NOT_EXPIRED,
                        "承認トランザクションは有効期限内です",
                    ))
                }
            }
        }
    }

    fn configure_signer_list(
        &self,
        case_id: &str,
        repo: &CaseRepo<'a>,
        case: &CaseRecord,
        wallet: &CustodialWallet,
    ) -> Result<SignerListState> {
        let heirs = self.heir_wallets(repo, case)?;
        let (system_address, _) = self.system_signer()?;

        let heir_count = heirs.len() as u32;
        let quorum = quorum_for(heir_count);
        let mut entries = vec![SignerListEntry {
            account: system_address,
            weight: heir_count as u16,
        }];
        entries.extend(heirs.iter().map(|(_, address)| SignerListEntry {
            account: address.clone(),
            weight: 1,
        }));

        let info = self.ledger.account_info(&wallet.address)?;
        let params = self.ledger.server_params()?;
        let tx_entries: Vec<SignerEntry> = entries
            .iter()
            .map(|e| SignerEntry {
                account: e.account.clone(),
                weight: e.weight,
            })
            .collect();
        let tx = UnsignedTx::signer_list_set(
            &wallet.address,
            quorum,
            &tx_entries,
            info.sequence,
            params.base_fee_drops,
        );

        let sealed = SealedSeed::from_hex(&wallet.seed_encrypted)?;
        let guard = self.vault.open(&sealed)?;
        let signed = tx.sign(&guard.keypair()?)?;
        drop(guard);

        let result = self.ledger.submit(&signed.blob)?;
        let mut state = SignerListState {
            status: SignerListStatus::Set,
            quorum,
            entries,
            error: None,
            tx_hash: Some(result.tx_hash.clone()),
        };
        if !result.is_success() {
            state.status = SignerListStatus::Failed;
            state.error = Some(format!(
                "{}: {}",
                result.engine_result, result.engine_message
            ));
            state.tx_hash = None;
            repo.put_signer_list(case_id, &state)?;
            return Err(ExecError::ledger(
                codes::SIGNER_LIST_FAILED,
                format!("署名者リストの設定に失敗しました: {}", result.engine_result),
            ));
        }

        repo.put_signer_list(case_id, &state)?;
        info!(
            "signer list set for case {case_id}: quorum {quorum}, {} entries",
            state.entries.len()
        );
        Ok(state)
    }

    fn build_approval(&self, custodial: &str, signer_count: usize) -> Result<ApprovalTx> {
        let verify_address = self
            .config
            .verify_address
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                ExecError::config(
                    codes::VERIFY_ADDRESS_MISSING,
                    "verification destination address is not configured",
                )
            })?;
        let (_, system_keypair) = self.system_signer()?;

        let memo = random_hex(16);
        let info = self.ledger.account_info(custodial)?;
        let params = self.ledger.server_params()?;
        let last_ledger = self.ledger.validated_ledger_index()? + self.config.approval_ttl_ledgers;

        let tx = UnsignedTx::payment(
            custodial,
            verify_address,
            &TxAmount::Drops(1),
            info.sequence,
            multisig_fee(params.base_fee_drops, signer_count),
        )
        .with_memo(&hex::encode_upper(memo.as_bytes()))
        .with_last_ledger_sequence(last_ledger);

        let share = tx.sign_for(&system_keypair)?;
        Ok(ApprovalTx {
            memo,
            tx_json: tx.json(),
            system_signed_blob: share.blob,
            system_signed_hash: share.hash,
            status: ApprovalStatus::Prepared,
            submitted_tx_hash: None,
            last_ledger_sequence: last_ledger,
        })
    }

    /// Check that `signed_blob` is this heir's valid share over the current
    /// approval transaction. Returns the share's hash for bookkeeping.
    fn verify_share(
        &self,
        approval: &ApprovalTx,
        heir_address: &str,
        signed_blob: &str,
    ) -> Result<String> {
        let invalid = |message: &str| ExecError::validation(message.to_string());

        let share = decode_blob(signed_blob).map_err(|_| invalid("署名データを読み取れません"))?;
        let fields = share
            .as_object()
            .ok_or_else(|| invalid("署名データを読み取れません"))?;
        let signer = fields
            .get("Signers")
            .and_then(|s| s.as_array())
            .and_then(|s| s.first())
            .and_then(|s| s.get("Signer"))
            .ok_or_else(|| invalid("署名データに署名者がありません"))?;

        let account = signer.get("Account").and_then(|v| v.as_str()).unwrap_or("");
        if account != heir_address {
            return Err(invalid("署名者が相続人のウォレットと一致しません"));
        }
        let public_key = signer
            .get("SigningPubKey")
            .and_then(|v| v.as_str())
            .and_then(|s| hex::decode(s).ok())
            .ok_or_else(|| invalid("署名データを読み取れません"))?;
        let signature = signer
            .get("TxnSignature")
            .and_then(|v| v.as_str())
            .and_then(|s| hex::decode(s).ok())
            .ok_or_else(|| invalid("署名データを読み取れません"))?;

        let derived = address_for_public_key(&public_key)
            .map_err(|_| invalid("署名データを読み取れません"))?;
        if derived.to_string() != heir_address {
            return Err(invalid("署名者が相続人のウォレットと一致しません"));
        }

        let mut base = approval
            .tx_json
            .as_object()
            .cloned()
            .ok_or_else(|| invalid("承認トランザクションが壊れています"))?;
        base.insert("SigningPubKey".into(), serde_json::Value::String(String::new()));
        let digest = multisig_signing_digest(&base, &derived)?;
        if !verify_signature(&digest, &signature, &public_key) {
            return Err(invalid("署名が現在の承認トランザクションと一致しません"));
        }

        Ok(tx_hash(fields)?)
    }

    fn heir_wallets(
        &self,
        repo: &CaseRepo<'a>,
        case: &CaseRecord,
    ) -> Result<Vec<(String, String)>> {
        let mut wallets = Vec::new();
        for uid in case
            .member_uids
            .iter()
            .filter(|uid| uid.as_str() != case.owner_uid)
        {
            let heir = repo.heir(&case.case_id, uid)?;
            let address = heir
                .as_ref()
                .and_then(|h| h.verified_address())
                .map(str::to_string)
                .ok_or_else(|| {
                    ExecError::precondition(
                        codes::HEIR_WALLET_UNVERIFIED,
                        format!("相続人 {uid} のウォレットが未検証です"),
                    )
                })?;
            wallets.push((uid.clone(), address));
        }
        if wallets.is_empty() {
            return Err(ExecError::precondition(
                codes::HEIR_MISSING,
                "相続人が登録されていません",
            ));
        }
        Ok(wallets)
    }

    fn system_signer(&self) -> Result<(String, Keypair)> {
        let address = self
            .config
            .system_signer_address
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                ExecError::config(
                    codes::SYSTEM_SIGNER_MISSING,
                    "system signer address is not configured",
                )
            })?;
        let seed: FamilySeed = self
            .config
            .system_signer_seed
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ExecError::config(
                    codes::SYSTEM_SIGNER_SEED_MISSING,
                    "system signer seed is not configured",
                )
            })?
            .parse()
            .map_err(|_| {
                ExecError::config(
                    codes::SYSTEM_SIGNER_SEED_MISSING,
                    "system signer seed is not a valid family seed",
                )
            })?;
        let keypair = Keypair::derive(&seed)?;
        if keypair.address().to_string() != address {
            return Err(ExecError::config(
                codes::SYSTEM_SIGNER_SEED_MISSING,
                "system signer seed does not derive the configured address",
            ));
        }
        Ok((address, keypair))
    }

    fn snapshot(
        &self,
        case_id: &str,
        repo: &CaseRepo<'a>,
        signer_list: SignerListState,
        approval: ApprovalTx,
    ) -> Result<ApprovalSnapshot> {
        let signatures_count = repo.signatures(case_id)?.len() as u32;
        let required_count = signer_list.required_heir_signatures();
        Ok(ApprovalSnapshot {
            signer_list,
            approval,
            signatures_count,
            required_count,
        })
    }
}
