//! Ledger transactions
//!
//! Builders, signing, and multisignature assembly. Transactions are held as
//! canonical JSON (object keys in byte order); signed blobs are the
//! uppercase hex of that JSON. Digests are SHA-512-half over a domain
//! prefix plus the canonical payload:
//!
//! - `STX\0` + tx JSON (with SigningPubKey), for single signatures
//! - `SMT\0` + tx JSON (SigningPubKey empty) + signer account id, for
//!   multisignature shares
//! - `TXN\0` + signed tx JSON, for the transaction hash

use keirloom_core::wallet::{sha512_half, Address, Keypair};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use thiserror::Error;

/// Domain prefixes for signing payloads and hashes
const SINGLE_SIGN_PREFIX: &[u8; 4] = b"STX\0";
const MULTI_SIGN_PREFIX: &[u8; 4] = b"SMT\0";
const TX_HASH_PREFIX: &[u8; 4] = b"TXN\0";
/// Keylet space for NFT offers
const NFT_OFFER_SPACE: &[u8; 2] = &[0x00, 0x71];

/// Micro-units per whole issued token
pub const TOKEN_UNIT: u64 = 1_000_000;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("Invalid transaction JSON: {0}")]
    InvalidJson(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Signature assembly failed: {0}")]
    Assembly(String),
}

/// An amount carried by a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxAmount {
    /// Native value in drops
    Drops(u64),
    /// Issued token in micro-units
    Token {
        currency: String,
        issuer: String,
        value_micro: u64,
    },
}

impl TxAmount {
    fn to_json(&self) -> Value {
        match self {
            TxAmount::Drops(drops) => Value::String(drops.to_string()),
            TxAmount::Token {
                currency,
                issuer,
                value_micro,
            } => json!({
                "currency": currency,
                "issuer": issuer,
                "value": token_value_string(*value_micro),
            }),
        }
    }
}

/// One entry of a signer list.
#[derive(Debug, Clone)]
pub struct SignerEntry {
    pub account: String,
    pub weight: u16,
}

/// A signed transaction (or one multisignature share of one).
#[derive(Debug, Clone)]
pub struct SignedTx {
    /// Uppercase hex of the canonical signed JSON
    pub blob: String,
    /// Transaction hash, uppercase hex
    pub hash: String,
}

/// An unsigned transaction held as canonical JSON fields.
#[derive(Debug, Clone)]
pub struct UnsignedTx {
    fields: Map<String, Value>,
}

fn base_fields(tx_type: &str, account: &str, sequence: u32, fee_drops: u64) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("TransactionType".into(), Value::String(tx_type.into()));
    fields.insert("Account".into(), Value::String(account.into()));
    fields.insert("Sequence".into(), json!(sequence));
    fields.insert("Fee".into(), Value::String(fee_drops.to_string()));
    fields
}

impl UnsignedTx {
    pub fn payment(
        account: &str,
        destination: &str,
        amount: &TxAmount,
        sequence: u32,
        fee_drops: u64,
    ) -> Self {
        let mut fields = base_fields("Payment", account, sequence, fee_drops);
        fields.insert("Destination".into(), Value::String(destination.into()));
        fields.insert("Amount".into(), amount.to_json());
        Self { fields }
    }

    /// `regular_key: None` clears any existing delegation.
    pub fn set_regular_key(
        account: &str,
        regular_key: Option<&str>,
        sequence: u32,
        fee_drops: u64,
    ) -> Self {
        let mut fields = base_fields("SetRegularKey", account, sequence, fee_drops);
        if let Some(key) = regular_key {
            fields.insert("RegularKey".into(), Value::String(key.into()));
        }
        Self { fields }
    }

    pub fn signer_list_set(
        account: &str,
        quorum: u32,
        entries: &[SignerEntry],
        sequence: u32,
        fee_drops: u64,
    ) -> Self {
        let mut fields = base_fields("SignerListSet", account, sequence, fee_drops);
        fields.insert("SignerQuorum".into(), json!(quorum));
        let entries: Vec<Value> = entries
            .iter()
            .map(|e| {
                json!({
                    "SignerEntry": {
                        "Account": e.account,
                        "SignerWeight": e.weight,
                    }
                })
            })
            .collect();
        fields.insert("SignerEntries".into(), Value::Array(entries));
        Self { fields }
    }

    /// Zero-amount sell offer restricted to one recipient. The recipient
    /// accepts it later; nothing moves at creation time.
    pub fn nft_sell_offer(
        account: &str,
        token_id: &str,
        destination: &str,
        sequence: u32,
        fee_drops: u64,
    ) -> Self {
        let mut fields = base_fields("NFTokenCreateOffer", account, sequence, fee_drops);
        fields.insert("NFTokenID".into(), Value::String(token_id.into()));
        fields.insert("Amount".into(), Value::String("0".into()));
        fields.insert("Destination".into(), Value::String(destination.into()));
        fields.insert("Flags".into(), json!(1)); // tfSellNFToken
        Self { fields }
    }

    /// Attach a memo carrying already-hex-encoded data.
    pub fn with_memo(mut self, memo_hex: &str) -> Self {
        let memo = json!([{ "Memo": { "MemoData": memo_hex.to_uppercase() } }]);
        self.fields.insert("Memos".into(), memo);
        self
    }

    pub fn with_last_ledger_sequence(mut self, index: u32) -> Self {
        self.fields.insert("LastLedgerSequence".into(), json!(index));
        self
    }

    pub fn tx_type(&self) -> &str {
        self.fields
            .get("TransactionType")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// The transaction as a JSON value, for storage.
    pub fn json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Rebuild from a stored JSON value.
    pub fn from_json(value: &Value) -> Result<Self, TxError> {
        let fields = value
            .as_object()
            .cloned()
            .ok_or_else(|| TxError::InvalidJson("transaction must be a JSON object".into()))?;
        Ok(Self { fields })
    }

    /// Sign with one key (master or delegated regular key).
    pub fn sign(&self, keypair: &Keypair) -> Result<SignedTx, TxError> {
        let mut signed = self.fields.clone();
        signed.insert(
            "SigningPubKey".into(),
            Value::String(keypair.public_key_hex()),
        );

        let digest = single_signing_digest(&signed)?;
        let signature = keypair.sign(&digest);
        signed.insert(
            "TxnSignature".into(),
            Value::String(hex::encode_upper(signature)),
        );

        encode_signed(&signed)
    }

    /// Produce one multisignature share.
    ///
    /// The share is a complete blob with a single-entry `Signers` array, so
    /// shares from different signers can be collected independently and
    /// combined later.
    pub fn sign_for(&self, signer: &Keypair) -> Result<SignedTx, TxError> {
        let mut signed = self.fields.clone();
        signed.insert("SigningPubKey".into(), Value::String(String::new()));

        let digest = multisig_signing_digest(&signed, &signer.address())?;
        let signature = signer.sign(&digest);
        signed.insert(
            "Signers".into(),
            json!([{
                "Signer": {
                    "Account": signer.address().to_string(),
                    "SigningPubKey": signer.public_key_hex(),
                    "TxnSignature": hex::encode_upper(signature),
                }
            }]),
        );

        encode_signed(&signed)
    }
}

/// Merge multisignature shares into one submittable transaction.
///
/// Every share must carry the same underlying transaction. Signer entries
/// are ordered by account id, the order the ledger expects.
pub fn combine_shares(share_blobs: &[String]) -> Result<SignedTx, TxError> {
    if share_blobs.is_empty() {
        return Err(TxError::Assembly("no shares to combine".into()));
    }

    let mut base: Option<Map<String, Value>> = None;
    let mut signers: Vec<Value> = Vec::new();

    for blob in share_blobs {
        let decoded = decode_blob(blob)?;
        let mut fields = decoded
            .as_object()
            .cloned()
            .ok_or_else(|| TxError::InvalidJson("share must be a JSON object".into()))?;
        let share_signers = match fields.remove("Signers") {
            Some(Value::Array(entries)) => entries,
            _ => return Err(TxError::Assembly("share carries no Signers array".into())),
        };

        match &base {
            None => base = Some(fields),
            Some(expected) => {
                if *expected != fields {
                    return Err(TxError::Assembly(
                        "shares sign different transactions".into(),
                    ));
                }
            }
        }
        signers.extend(share_signers);
    }

    let mut keyed: Vec<([u8; 20], Value)> = signers
        .into_iter()
        .map(|entry| {
            let account = entry
                .get("Signer")
                .and_then(|s| s.get("Account"))
                .and_then(Value::as_str)
                .ok_or_else(|| TxError::Assembly("signer entry missing Account".into()))?;
            let address =
                Address::from_str(account).map_err(|e| TxError::InvalidAddress(e.to_string()))?;
            Ok((*address.account_id(), entry))
        })
        .collect::<Result<_, TxError>>()?;
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut combined = base.unwrap_or_default();
    combined.insert(
        "Signers".into(),
        Value::Array(keyed.into_iter().map(|(_, entry)| entry).collect()),
    );
    encode_signed(&combined)
}

/// Fee for a multisigned transaction: one base fee per signer, plus one.
pub fn multisig_fee(base_fee_drops: u64, signer_count: usize) -> u64 {
    base_fee_drops * (signer_count as u64 + 1)
}

/// Offer id the ledger will assign to an NFT offer created by `account` at
/// `sequence`, derived locally so it can be recorded without a readback.
pub fn nft_offer_id(account: &str, sequence: u32) -> Result<String, TxError> {
    let address = Address::from_str(account).map_err(|e| TxError::InvalidAddress(e.to_string()))?;
    let mut payload = Vec::with_capacity(2 + 20 + 4);
    payload.extend_from_slice(NFT_OFFER_SPACE);
    payload.extend_from_slice(address.account_id());
    payload.extend_from_slice(&sequence.to_be_bytes());
    Ok(hex::encode_upper(sha512_half(&payload)))
}

/// Decode a blob back into its transaction JSON.
pub fn decode_blob(blob: &str) -> Result<Value, TxError> {
    let bytes = hex::decode(blob).map_err(|e| TxError::InvalidJson(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TxError::InvalidJson(e.to_string()))
}

/// Digest signed by a single signer. `fields` must include `SigningPubKey`
/// and exclude `TxnSignature`.
pub fn single_signing_digest(fields: &Map<String, Value>) -> Result<[u8; 32], TxError> {
    let mut payload = SINGLE_SIGN_PREFIX.to_vec();
    payload.extend_from_slice(&canonical_bytes(fields)?);
    Ok(sha512_half(&payload))
}

/// Digest signed by one multisignature participant. `fields` must have an
/// empty `SigningPubKey` and no `Signers` array.
pub fn multisig_signing_digest(
    fields: &Map<String, Value>,
    signer: &Address,
) -> Result<[u8; 32], TxError> {
    let mut payload = MULTI_SIGN_PREFIX.to_vec();
    payload.extend_from_slice(&canonical_bytes(fields)?);
    payload.extend_from_slice(signer.account_id());
    Ok(sha512_half(&payload))
}

/// Hash identifying a signed transaction.
pub fn tx_hash(signed: &Map<String, Value>) -> Result<String, TxError> {
    let mut payload = TX_HASH_PREFIX.to_vec();
    payload.extend_from_slice(&canonical_bytes(signed)?);
    Ok(hex::encode_upper(sha512_half(&payload)))
}

fn canonical_bytes(fields: &Map<String, Value>) -> Result<Vec<u8>, TxError> {
    // serde_json maps serialize with keys in byte order, which is the
    // canonical form everywhere in this module
    serde_json::to_vec(&Value::Object(fields.clone()))
        .map_err(|e| TxError::InvalidJson(e.to_string()))
}

fn encode_signed(signed: &Map<String, Value>) -> Result<SignedTx, TxError> {
    let bytes = canonical_bytes(signed)?;
    Ok(SignedTx {
        blob: hex::encode_upper(&bytes),
        hash: tx_hash(signed)?,
    })
}

/// Render a micro-unit amount as the decimal string the wire uses.
pub fn token_value_string(micro: u64) -> String {
    let whole = micro / TOKEN_UNIT;
    let frac = micro % TOKEN_UNIT;
    if frac == 0 {
        whole.to_string()
    } else {
        let s = format!("{}.{:06}", whole, frac);
        s.trim_end_matches('0').to_string()
    }
}

/// Parse a decimal token value into micro-units.
pub fn parse_token_value(value: &str) -> Result<u64, TxError> {
    let bad = || TxError::InvalidAmount(value.to_string());

    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() || frac.len() > 6 {
        return Err(bad());
    }
    let whole: u64 = whole.parse().map_err(|_| bad())?;
    let frac_micro = if frac.is_empty() {
        0
    } else {
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let parsed: u64 = frac.parse().map_err(|_| bad())?;
        parsed * 10u64.pow(6 - frac.len() as u32)
    };

    whole
        .checked_mul(TOKEN_UNIT)
        .and_then(|w| w.checked_add(frac_micro))
        .ok_or_else(bad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keirloom_core::wallet::{verify_signature, FamilySeed};

    fn test_keypair(seed_byte: u8) -> Keypair {
        let mut entropy = [0u8; 16];
        entropy[15] = seed_byte;
        entropy[0] = 0x01;
        Keypair::derive(&FamilySeed::from_entropy(entropy)).unwrap()
    }

    #[test]
    fn test_token_value_string_cases() {
        assert_eq!(token_value_string(0), "0");
        assert_eq!(token_value_string(1_000_000), "1");
        assert_eq!(token_value_string(1_500_000), "1.5");
        assert_eq!(token_value_string(123), "0.000123");
        assert_eq!(token_value_string(12_345_678), "12.345678");
    }

    #[test]
    fn test_parse_token_value() {
        assert_eq!(parse_token_value("0").unwrap(), 0);
        assert_eq!(parse_token_value("1").unwrap(), 1_000_000);
        assert_eq!(parse_token_value("1.5").unwrap(), 1_500_000);
        assert_eq!(parse_token_value("0.000123").unwrap(), 123);
        assert_eq!(parse_token_value("12.345678").unwrap(), 12_345_678);

        assert!(parse_token_value("1.2345678").is_err());
        assert!(parse_token_value("-3").is_err());
        assert!(parse_token_value("abc").is_err());
        assert!(parse_token_value(".5").is_err());
    }

    #[test]
    fn test_token_value_round_trips() {
        for micro in [0u64, 1, 999_999, 1_000_000, 7_250_000, 123_456_789] {
            assert_eq!(parse_token_value(&token_value_string(micro)).unwrap(), micro);
        }
    }

    #[test]
    fn test_payment_builds_canonical_json() {
        let sender = test_keypair(1).address().to_string();
        let receiver = test_keypair(2).address().to_string();
        let tx = UnsignedTx::payment(&sender, &receiver, &TxAmount::Drops(5000), 7, 10);

        let value = tx.json();
        assert_eq!(value["TransactionType"], "Payment");
        assert_eq!(value["Amount"], "5000");
        assert_eq!(value["Fee"], "10");
        assert_eq!(value["Sequence"], 7);

        // Canonical serialization sorts keys
        let text = serde_json::to_string(&value).unwrap();
        let account_pos = text.find("\"Account\"").unwrap();
        let amount_pos = text.find("\"Amount\"").unwrap();
        let type_pos = text.find("\"TransactionType\"").unwrap();
        assert!(account_pos < amount_pos && amount_pos < type_pos);
    }

    #[test]
    fn test_token_payment_amount_object() {
        let sender = test_keypair(1).address().to_string();
        let receiver = test_keypair(2).address().to_string();
        let issuer = test_keypair(3).address().to_string();
        let amount = TxAmount::Token {
            currency: "USD".into(),
            issuer: issuer.clone(),
            value_micro: 2_500_000,
        };
        let tx = UnsignedTx::payment(&sender, &receiver, &amount, 1, 10);

        let value = tx.json();
        assert_eq!(value["Amount"]["currency"], "USD");
        assert_eq!(value["Amount"]["issuer"], issuer);
        assert_eq!(value["Amount"]["value"], "2.5");
    }

    #[test]
    fn test_single_sign_verifies() {
        let keypair = test_keypair(1);
        let receiver = test_keypair(2).address().to_string();
        let tx = UnsignedTx::payment(
            &keypair.address().to_string(),
            &receiver,
            &TxAmount::Drops(100),
            3,
            10,
        );

        let signed = tx.sign(&keypair).unwrap();
        assert_eq!(signed.hash.len(), 64);

        let mut fields = decode_blob(&signed.blob)
            .unwrap()
            .as_object()
            .cloned()
            .unwrap();
        let signature =
            hex::decode(fields.remove("TxnSignature").unwrap().as_str().unwrap()).unwrap();
        let public =
            hex::decode(fields.get("SigningPubKey").unwrap().as_str().unwrap()).unwrap();

        let digest = single_signing_digest(&fields).unwrap();
        assert!(verify_signature(&digest, &signature, &public));
    }

    #[test]
    fn test_sign_for_and_combine_sorts_signers() {
        let custodial = test_keypair(1);
        let a = test_keypair(2);
        let b = test_keypair(3);
        let destination = test_keypair(4).address().to_string();

        let tx = UnsignedTx::payment(
            &custodial.address().to_string(),
            &destination,
            &TxAmount::Drops(1),
            5,
            30,
        );

        let share_a = tx.sign_for(&a).unwrap();
        let share_b = tx.sign_for(&b).unwrap();

        let combined = combine_shares(&[share_a.blob, share_b.blob]).unwrap();
        let value = decode_blob(&combined.blob).unwrap();
        let signers = value["Signers"].as_array().unwrap();
        assert_eq!(signers.len(), 2);

        let id_of = |entry: &Value| {
            Address::from_str(entry["Signer"]["Account"].as_str().unwrap())
                .unwrap()
                .account_id()
                .to_owned()
        };
        assert!(id_of(&signers[0]) < id_of(&signers[1]));
        assert_eq!(value["SigningPubKey"], "");
    }

    #[test]
    fn test_combine_rejects_mismatched_shares() {
        let a = test_keypair(2);
        let b = test_keypair(3);
        let from = test_keypair(1).address().to_string();
        let to = test_keypair(4).address().to_string();

        let tx1 = UnsignedTx::payment(&from, &to, &TxAmount::Drops(1), 5, 30);
        let tx2 = UnsignedTx::payment(&from, &to, &TxAmount::Drops(2), 5, 30);

        let share_a = tx1.sign_for(&a).unwrap();
        let share_b = tx2.sign_for(&b).unwrap();

        assert!(combine_shares(&[share_a.blob, share_b.blob]).is_err());
        assert!(combine_shares(&[]).is_err());
    }

    #[test]
    fn test_combine_rejects_single_signed_blob() {
        let keypair = test_keypair(1);
        let to = test_keypair(2).address().to_string();
        let tx =
            UnsignedTx::payment(&keypair.address().to_string(), &to, &TxAmount::Drops(1), 1, 10);
        let signed = tx.sign(&keypair).unwrap();
        assert!(combine_shares(&[signed.blob]).is_err());
    }

    #[test]
    fn test_multisig_fee_sizing() {
        assert_eq!(multisig_fee(10, 3), 40);
        assert_eq!(multisig_fee(12, 1), 24);
    }

    #[test]
    fn test_nft_offer_id_is_deterministic() {
        let account = test_keypair(1).address().to_string();
        let a = nft_offer_id(&account, 7).unwrap();
        let b = nft_offer_id(&account, 7).unwrap();
        let c = nft_offer_id(&account, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);

        assert!(nft_offer_id("not an address", 1).is_err());
    }

    #[test]
    fn test_memo_and_last_ledger_sequence() {
        let from = test_keypair(1).address().to_string();
        let to = test_keypair(2).address().to_string();
        let tx = UnsignedTx::payment(&from, &to, &TxAmount::Drops(1), 1, 10)
            .with_memo("deadbeef")
            .with_last_ledger_sequence(99);

        let value = tx.json();
        assert_eq!(value["Memos"][0]["Memo"]["MemoData"], "DEADBEEF");
        assert_eq!(value["LastLedgerSequence"], 99);
    }

    #[test]
    fn test_set_regular_key_clear_omits_field() {
        let account = test_keypair(1).address().to_string();
        let delegate = test_keypair(2).address().to_string();

        let set = UnsignedTx::set_regular_key(&account, Some(&delegate), 1, 10);
        assert_eq!(set.json()["RegularKey"], delegate.as_str());

        let clear = UnsignedTx::set_regular_key(&account, None, 2, 10);
        assert!(clear.json().get("RegularKey").is_none());
        assert_eq!(clear.tx_type(), "SetRegularKey");
    }

    #[test]
    fn test_signer_list_set_entries() {
        let account = test_keypair(1).address().to_string();
        let system = test_keypair(2).address().to_string();
        let heir = test_keypair(3).address().to_string();

        let tx = UnsignedTx::signer_list_set(
            &account,
            3,
            &[
                SignerEntry {
                    account: system.clone(),
                    weight: 2,
                },
                SignerEntry {
                    account: heir.clone(),
                    weight: 1,
                },
            ],
            4,
            10,
        );

        let value = tx.json();
        assert_eq!(value["SignerQuorum"], 3);
        assert_eq!(value["SignerEntries"][0]["SignerEntry"]["Account"], system);
        assert_eq!(value["SignerEntries"][1]["SignerEntry"]["SignerWeight"], 1);
    }
}
