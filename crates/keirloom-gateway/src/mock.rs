//! In-memory ledger for tests
//!
//! Decodes submitted blobs, verifies signatures against master keys,
//! regular keys, and signer lists, and applies Payment / SetRegularKey /
//! SignerListSet / NFTokenCreateOffer effects to an account map. Validation
//! timing and submission failures are scriptable so pipeline tests can
//! exercise retry and expiry paths.
//!
//! Deliberately strict: sequence numbers, fees, reserves, and signature
//! authority are all checked, so a pipeline bug shows up as the engine
//! code a real node would return.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Mutex;

use keirloom_core::wallet::{address_for_public_key, verify_signature, Address, FamilySeed, Keypair};
use serde_json::{Map, Value};
use zeroize::Zeroizing;

use crate::tx::{
    multisig_signing_digest, nft_offer_id, parse_token_value, single_signing_digest, tx_hash,
};
use crate::types::{
    AccountInfo, ProposedWallet, ServerParams, SubmitResult, TrustLine, TxStatus,
};
use crate::{LedgerError, LedgerGateway};

/// How `propose_wallet` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposeBehavior {
    /// Generate a real keypair
    Working,
    /// Fail as if the node rejected the call
    Unavailable,
    /// Return an address that fails local validation
    Malformed,
}

#[derive(Default)]
struct MockAccount {
    balance_drops: u64,
    sequence: u32,
    owner_count: u32,
    regular_key: Option<String>,
    signer_list: Option<SignerList>,
    lines: Vec<TrustLine>,
    nfts: Vec<String>,
}

struct SignerList {
    quorum: u32,
    entries: Vec<(String, u16)>,
}

struct RecordedTx {
    validated: bool,
    last_ledger_sequence: u32,
    result: String,
}

struct MockOffer {
    token_id: String,
    destination: String,
}

struct MockState {
    accounts: HashMap<String, MockAccount>,
    params: ServerParams,
    validated_index: u32,
    auto_validate: bool,
    transactions: HashMap<String, RecordedTx>,
    offers: HashMap<String, MockOffer>,
    scripted_failures: VecDeque<String>,
    propose: ProposeBehavior,
    submissions: u32,
}

/// An in-memory stand-in for a ledger node.
pub struct MockLedger {
    inner: Mutex<MockState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockState {
                accounts: HashMap::new(),
                params: ServerParams {
                    reserve_base_drops: 10_000_000,
                    reserve_increment_drops: 2_000_000,
                    base_fee_drops: 10,
                },
                validated_index: 1,
                auto_validate: true,
                transactions: HashMap::new(),
                offers: HashMap::new(),
                scripted_failures: VecDeque::new(),
                propose: ProposeBehavior::Working,
                submissions: 0,
            }),
        }
    }

    /// Create a funded account. New accounts start at sequence 1.
    pub fn add_account(&self, address: &str, balance_drops: u64) {
        let mut state = self.inner.lock().unwrap();
        state.accounts.insert(
            address.to_string(),
            MockAccount {
                balance_drops,
                sequence: 1,
                ..Default::default()
            },
        );
    }

    pub fn set_params(&self, params: ServerParams) {
        self.inner.lock().unwrap().params = params;
    }

    /// Pre-set a delegation, as the owner's own wallet would have done.
    pub fn set_regular_key_of(&self, address: &str, regular_key: Option<&str>) {
        let mut state = self.inner.lock().unwrap();
        if let Some(account) = state.accounts.get_mut(address) {
            account.regular_key = regular_key.map(str::to_string);
        }
    }

    pub fn add_trust_line(&self, address: &str, currency: &str, issuer: &str, balance_micro: u64) {
        let mut state = self.inner.lock().unwrap();
        if let Some(account) = state.accounts.get_mut(address) {
            account.lines.push(TrustLine {
                currency: currency.to_string(),
                issuer: issuer.to_string(),
                balance_micro,
            });
            account.owner_count += 1;
        }
    }

    pub fn add_nft(&self, address: &str, token_id: &str) {
        let mut state = self.inner.lock().unwrap();
        if let Some(account) = state.accounts.get_mut(address) {
            account.nfts.push(token_id.to_string());
        }
    }

    pub fn advance_ledger(&self, by: u32) {
        self.inner.lock().unwrap().validated_index += by;
    }

    /// When off, submitted transactions stay unvalidated until
    /// [`MockLedger::validate_tx`].
    pub fn set_auto_validate(&self, on: bool) {
        self.inner.lock().unwrap().auto_validate = on;
    }

    /// Mark a recorded transaction validated. Returns false for unknown
    /// hashes.
    pub fn validate_tx(&self, hash: &str) -> bool {
        let mut state = self.inner.lock().unwrap();
        match state.transactions.get_mut(hash) {
            Some(tx) => {
                tx.validated = true;
                true
            }
            None => false,
        }
    }

    /// Script the next submission to fail with the given engine code,
    /// applying no effects.
    pub fn fail_next_submit(&self, engine_result: &str) {
        self.inner
            .lock()
            .unwrap()
            .scripted_failures
            .push_back(engine_result.to_string());
    }

    pub fn set_propose_behavior(&self, behavior: ProposeBehavior) {
        self.inner.lock().unwrap().propose = behavior;
    }

    // ---- Assertion helpers ----

    pub fn balance_of(&self, address: &str) -> Option<u64> {
        let state = self.inner.lock().unwrap();
        state.accounts.get(address).map(|a| a.balance_drops)
    }

    pub fn sequence_of(&self, address: &str) -> Option<u32> {
        let state = self.inner.lock().unwrap();
        state.accounts.get(address).map(|a| a.sequence)
    }

    pub fn regular_key_of(&self, address: &str) -> Option<Option<String>> {
        let state = self.inner.lock().unwrap();
        state.accounts.get(address).map(|a| a.regular_key.clone())
    }

    pub fn signer_list_of(&self, address: &str) -> Option<(u32, Vec<(String, u16)>)> {
        let state = self.inner.lock().unwrap();
        state
            .accounts
            .get(address)
            .and_then(|a| a.signer_list.as_ref())
            .map(|l| (l.quorum, l.entries.clone()))
    }

    pub fn line_balance_of(&self, address: &str, currency: &str, issuer: &str) -> Option<u64> {
        let state = self.inner.lock().unwrap();
        state.accounts.get(address).and_then(|a| {
            a.lines
                .iter()
                .find(|l| l.currency == currency && l.issuer == issuer)
                .map(|l| l.balance_micro)
        })
    }

    /// (token_id, destination) of a recorded NFT offer.
    pub fn offer_details(&self, offer_id: &str) -> Option<(String, String)> {
        let state = self.inner.lock().unwrap();
        state
            .offers
            .get(offer_id)
            .map(|o| (o.token_id.clone(), o.destination.clone()))
    }

    pub fn submission_count(&self) -> u32 {
        self.inner.lock().unwrap().submissions
    }
}

impl LedgerGateway for MockLedger {
    fn account_info(&self, address: &str) -> Result<AccountInfo, LedgerError> {
        let state = self.inner.lock().unwrap();
        let account = state
            .accounts
            .get(address)
            .ok_or_else(|| LedgerError::AccountNotFound(address.to_string()))?;
        Ok(AccountInfo {
            balance_drops: account.balance_drops,
            owner_count: account.owner_count,
            sequence: account.sequence,
            regular_key: account.regular_key.clone(),
        })
    }

    fn server_params(&self) -> Result<ServerParams, LedgerError> {
        Ok(self.inner.lock().unwrap().params)
    }

    fn account_lines(&self, address: &str) -> Result<Vec<TrustLine>, LedgerError> {
        let state = self.inner.lock().unwrap();
        let account = state
            .accounts
            .get(address)
            .ok_or_else(|| LedgerError::AccountNotFound(address.to_string()))?;
        Ok(account
            .lines
            .iter()
            .filter(|l| l.balance_micro > 0)
            .cloned()
            .collect())
    }

    fn transaction(&self, tx_hash: &str) -> Result<Option<TxStatus>, LedgerError> {
        let state = self.inner.lock().unwrap();
        Ok(state.transactions.get(tx_hash).map(|tx| TxStatus {
            validated: tx.validated,
            last_ledger_sequence: tx.last_ledger_sequence,
            result_code: tx.result.clone(),
        }))
    }

    fn validated_ledger_index(&self) -> Result<u32, LedgerError> {
        Ok(self.inner.lock().unwrap().validated_index)
    }

    fn submit(&self, tx_blob: &str) -> Result<SubmitResult, LedgerError> {
        let mut state = self.inner.lock().unwrap();
        state.submissions += 1;

        let fields = match decode_fields(tx_blob) {
            Some(fields) => fields,
            None => {
                return Ok(failure("temMALFORMED", "undecodable blob", String::new()));
            }
        };
        let hash = tx_hash(&fields).unwrap_or_default();

        if let Some(code) = state.scripted_failures.pop_front() {
            return Ok(failure(&code, "scripted failure", hash));
        }

        let result = apply_tx(&mut state, &fields);
        match result {
            Ok(()) => {
                let last_ledger_sequence = fields
                    .get("LastLedgerSequence")
                    .and_then(Value::as_u64)
                    .map(|v| v as u32)
                    .unwrap_or(state.validated_index + 100);
                let validated = state.auto_validate;
                state.transactions.insert(
                    hash.clone(),
                    RecordedTx {
                        validated,
                        last_ledger_sequence,
                        result: "tesSUCCESS".to_string(),
                    },
                );
                Ok(SubmitResult {
                    engine_result: "tesSUCCESS".to_string(),
                    engine_message: "applied".to_string(),
                    tx_hash: hash,
                })
            }
            Err(code) => Ok(failure(&code, "rejected", hash)),
        }
    }

    fn propose_wallet(&self) -> Result<ProposedWallet, LedgerError> {
        let behavior = self.inner.lock().unwrap().propose;
        match behavior {
            ProposeBehavior::Working => {
                let seed = FamilySeed::generate();
                let keypair = Keypair::derive(&seed)
                    .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
                Ok(ProposedWallet {
                    address: keypair.address().to_string(),
                    seed: Zeroizing::new(seed.to_string()),
                })
            }
            ProposeBehavior::Unavailable => Err(LedgerError::Rpc {
                code: "noPermission".to_string(),
                message: "wallet proposal disabled".to_string(),
            }),
            ProposeBehavior::Malformed => Ok(ProposedWallet {
                address: "rMalformedProposal".to_string(),
                seed: Zeroizing::new("sMalformedProposal".to_string()),
            }),
        }
    }
}

fn failure(code: &str, message: &str, hash: String) -> SubmitResult {
    SubmitResult {
        engine_result: code.to_string(),
        engine_message: message.to_string(),
        tx_hash: hash,
    }
}

fn decode_fields(blob: &str) -> Option<Map<String, Value>> {
    let bytes = hex::decode(blob).ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    value.as_object().cloned()
}

fn str_field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

/// Verify authority and apply effects. Returns the engine code on rejection.
fn apply_tx(state: &mut MockState, fields: &Map<String, Value>) -> Result<(), String> {
    let account = str_field(fields, "Account")
        .ok_or("temMALFORMED")?
        .to_string();
    let tx_type = str_field(fields, "TransactionType")
        .ok_or("temMALFORMED")?
        .to_string();

    if !state.accounts.contains_key(&account) {
        return Err("terNO_ACCOUNT".to_string());
    }

    if let Some(lls) = fields.get("LastLedgerSequence").and_then(Value::as_u64) {
        if (lls as u32) < state.validated_index {
            return Err("tefMAX_LEDGER".to_string());
        }
    }

    let sequence = fields
        .get("Sequence")
        .and_then(Value::as_u64)
        .ok_or("temMALFORMED")? as u32;
    if sequence != state.accounts[&account].sequence {
        return Err("tefPAST_SEQ".to_string());
    }

    verify_authority(state, fields, &account)?;

    let fee: u64 = str_field(fields, "Fee")
        .and_then(|f| f.parse().ok())
        .ok_or("temMALFORMED")?;
    if state.accounts[&account].balance_drops < fee {
        return Err("terINSUF_FEE_B".to_string());
    }

    match tx_type.as_str() {
        "Payment" => apply_payment(state, fields, &account, fee)?,
        "SetRegularKey" => {
            let regular_key = str_field(fields, "RegularKey").map(str::to_string);
            let acct = state.accounts.get_mut(&account).ok_or("terNO_ACCOUNT")?;
            acct.regular_key = regular_key;
        }
        "SignerListSet" => apply_signer_list_set(state, fields, &account)?,
        "NFTokenCreateOffer" => apply_nft_offer(state, fields, &account, sequence)?,
        _ => return Err("temUNKNOWN".to_string()),
    }

    let acct = state.accounts.get_mut(&account).ok_or("terNO_ACCOUNT")?;
    acct.balance_drops -= fee;
    acct.sequence += 1;
    Ok(())
}

/// Check that the blob is signed by the master key, the delegated regular
/// key, or a quorum of the signer list.
fn verify_authority(
    state: &MockState,
    fields: &Map<String, Value>,
    account: &str,
) -> Result<(), String> {
    if fields.contains_key("Signers") {
        return verify_multisig(state, fields, account);
    }

    let mut unsigned = fields.clone();
    let signature_hex = match unsigned.remove("TxnSignature") {
        Some(Value::String(s)) => s,
        _ => return Err("temINVALID".to_string()),
    };
    let pubkey_hex = str_field(&unsigned, "SigningPubKey").unwrap_or_default();
    if pubkey_hex.is_empty() {
        return Err("temINVALID".to_string());
    }

    let signature = hex::decode(&signature_hex).map_err(|_| "temINVALID".to_string())?;
    let public = hex::decode(pubkey_hex).map_err(|_| "temINVALID".to_string())?;
    let digest = single_signing_digest(&unsigned).map_err(|_| "temMALFORMED".to_string())?;
    if !verify_signature(&digest, &signature, &public) {
        return Err("temINVALID".to_string());
    }

    let signer = address_for_public_key(&public)
        .map_err(|_| "temINVALID".to_string())?
        .to_string();
    let acct = &state.accounts[account];
    if signer == account || acct.regular_key.as_deref() == Some(signer.as_str()) {
        Ok(())
    } else {
        Err("tefBAD_AUTH".to_string())
    }
}

fn verify_multisig(
    state: &MockState,
    fields: &Map<String, Value>,
    account: &str,
) -> Result<(), String> {
    let list = state.accounts[account]
        .signer_list
        .as_ref()
        .ok_or("tefNOT_MULTI_SIGNING")?;

    let mut base = fields.clone();
    let signers = match base.remove("Signers") {
        Some(Value::Array(entries)) => entries,
        _ => return Err("temINVALID".to_string()),
    };
    if str_field(&base, "SigningPubKey") != Some("") {
        return Err("temINVALID".to_string());
    }

    let mut total_weight: u32 = 0;
    let mut seen: Vec<String> = Vec::new();
    for entry in &signers {
        let signer = entry.get("Signer").ok_or("temINVALID")?;
        let signer_account = signer
            .get("Account")
            .and_then(Value::as_str)
            .ok_or("temINVALID")?;
        let pubkey_hex = signer
            .get("SigningPubKey")
            .and_then(Value::as_str)
            .ok_or("temINVALID")?;
        let signature_hex = signer
            .get("TxnSignature")
            .and_then(Value::as_str)
            .ok_or("temINVALID")?;

        if seen.iter().any(|s| s == signer_account) {
            return Err("tefBAD_SIGNATURE".to_string());
        }
        seen.push(signer_account.to_string());

        let address =
            Address::from_str(signer_account).map_err(|_| "tefBAD_SIGNATURE".to_string())?;
        let digest =
            multisig_signing_digest(&base, &address).map_err(|_| "temMALFORMED".to_string())?;
        let signature = hex::decode(signature_hex).map_err(|_| "tefBAD_SIGNATURE".to_string())?;
        let public = hex::decode(pubkey_hex).map_err(|_| "tefBAD_SIGNATURE".to_string())?;
        if !verify_signature(&digest, &signature, &public) {
            return Err("tefBAD_SIGNATURE".to_string());
        }
        let derived = address_for_public_key(&public)
            .map_err(|_| "tefBAD_SIGNATURE".to_string())?
            .to_string();
        if derived != signer_account {
            return Err("tefBAD_SIGNATURE".to_string());
        }

        let weight = list
            .entries
            .iter()
            .find(|(entry_account, _)| entry_account == signer_account)
            .map(|(_, weight)| *weight)
            .ok_or("tefBAD_SIGNATURE")?;
        total_weight += u32::from(weight);
    }

    if total_weight >= list.quorum {
        Ok(())
    } else {
        Err("tefBAD_QUORUM".to_string())
    }
}

fn apply_payment(
    state: &mut MockState,
    fields: &Map<String, Value>,
    account: &str,
    fee: u64,
) -> Result<(), String> {
    let destination = str_field(fields, "Destination")
        .ok_or("temMALFORMED")?
        .to_string();
    let amount = fields.get("Amount").ok_or("temMALFORMED")?;

    match amount {
        Value::String(drops) => {
            let drops: u64 = drops.parse().map_err(|_| "temBAD_AMOUNT".to_string())?;
            let params = state.params;
            let sender = state.accounts.get_mut(account).ok_or("terNO_ACCOUNT")?;
            let reserve = params.reserve_for(sender.owner_count);
            let spendable = sender
                .balance_drops
                .saturating_sub(fee)
                .saturating_sub(reserve);
            if drops > spendable {
                return Err("tecUNFUNDED_PAYMENT".to_string());
            }
            sender.balance_drops -= drops;
            let receiver = state.accounts.entry(destination).or_insert(MockAccount {
                sequence: 1,
                ..Default::default()
            });
            receiver.balance_drops += drops;
        }
        Value::Object(token) => {
            let currency = token
                .get("currency")
                .and_then(Value::as_str)
                .ok_or("temBAD_AMOUNT")?
                .to_string();
            let issuer = token
                .get("issuer")
                .and_then(Value::as_str)
                .ok_or("temBAD_AMOUNT")?
                .to_string();
            let value_micro = token
                .get("value")
                .and_then(Value::as_str)
                .and_then(|v| parse_token_value(v).ok())
                .ok_or("temBAD_AMOUNT")?;

            let sender = state.accounts.get_mut(account).ok_or("terNO_ACCOUNT")?;
            let line = sender
                .lines
                .iter_mut()
                .find(|l| l.currency == currency && l.issuer == issuer)
                .ok_or("tecPATH_DRY")?;
            if line.balance_micro < value_micro {
                return Err("tecPATH_DRY".to_string());
            }
            line.balance_micro -= value_micro;

            let receiver = state.accounts.entry(destination).or_insert(MockAccount {
                sequence: 1,
                ..Default::default()
            });
            match receiver
                .lines
                .iter_mut()
                .find(|l| l.currency == currency && l.issuer == issuer)
            {
                Some(line) => line.balance_micro += value_micro,
                None => receiver.lines.push(TrustLine {
                    currency,
                    issuer,
                    balance_micro: value_micro,
                }),
            }
        }
        _ => return Err("temBAD_AMOUNT".to_string()),
    }
    Ok(())
}

fn apply_signer_list_set(
    state: &mut MockState,
    fields: &Map<String, Value>,
    account: &str,
) -> Result<(), String> {
    let quorum = fields
        .get("SignerQuorum")
        .and_then(Value::as_u64)
        .ok_or("temMALFORMED")? as u32;
    let acct = state.accounts.get_mut(account).ok_or("terNO_ACCOUNT")?;

    if quorum == 0 {
        if acct.signer_list.take().is_some() {
            acct.owner_count = acct.owner_count.saturating_sub(1);
        }
        return Ok(());
    }

    let entries = fields
        .get("SignerEntries")
        .and_then(Value::as_array)
        .ok_or("temMALFORMED")?;
    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        let inner = entry.get("SignerEntry").ok_or("temMALFORMED")?;
        let signer_account = inner
            .get("Account")
            .and_then(Value::as_str)
            .ok_or("temMALFORMED")?
            .to_string();
        let weight = inner
            .get("SignerWeight")
            .and_then(Value::as_u64)
            .ok_or("temMALFORMED")? as u16;
        parsed.push((signer_account, weight));
    }

    let total: u32 = parsed.iter().map(|(_, w)| u32::from(*w)).sum();
    if total < quorum {
        return Err("temBAD_QUORUM".to_string());
    }

    if acct.signer_list.is_none() {
        acct.owner_count += 1;
    }
    acct.signer_list = Some(SignerList {
        quorum,
        entries: parsed,
    });
    Ok(())
}

fn apply_nft_offer(
    state: &mut MockState,
    fields: &Map<String, Value>,
    account: &str,
    sequence: u32,
) -> Result<(), String> {
    let token_id = str_field(fields, "NFTokenID")
        .ok_or("temMALFORMED")?
        .to_string();
    let destination = str_field(fields, "Destination")
        .ok_or("temMALFORMED")?
        .to_string();

    let acct = state.accounts.get_mut(account).ok_or("terNO_ACCOUNT")?;
    if !acct.nfts.iter().any(|t| t == &token_id) {
        return Err("tecNO_ENTRY".to_string());
    }
    acct.owner_count += 1;

    let offer_id = nft_offer_id(account, sequence).map_err(|_| "temMALFORMED".to_string())?;
    state.offers.insert(
        offer_id,
        MockOffer {
            token_id,
            destination,
        },
    );
    Ok(())
}
