//! JSON-RPC gateway
//!
//! Speaks the node's HTTP JSON-RPC dialect: one POST per call with a
//! `{"method": ..., "params": [{...}]}` envelope. Responses are parsed
//! defensively; anything shaped wrong becomes
//! [`LedgerError::InvalidResponse`] rather than a panic.

use serde_json::{json, Value};
use std::time::Duration;
use zeroize::Zeroizing;

use crate::tx::parse_token_value;
use crate::types::{
    AccountInfo, ProposedWallet, ServerParams, SubmitResult, TrustLine, TxStatus,
};
use crate::{LedgerError, LedgerGateway};

/// Gateway to a ledger node over HTTP JSON-RPC.
pub struct JsonRpcGateway {
    http: reqwest::blocking::Client,
    endpoint: String,
}

impl JsonRpcGateway {
    /// # Arguments
    /// * `endpoint` - node RPC URL (e.g. "https://s.altnet.rippletest.net:51234")
    /// * `timeout` - per-request deadline; an elapsed deadline surfaces as
    ///   [`LedgerError::Timeout`]
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, LedgerError> {
        if !endpoint.starts_with("https://") {
            log::warn!("connecting to ledger RPC without TLS - insecure outside local testing");
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }

    fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let body = json!({ "method": method, "params": [params] });
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Timeout(e.to_string())
                } else {
                    LedgerError::Unavailable(e.to_string())
                }
            })?;

        let envelope: Value = response
            .json()
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
        let result = envelope
            .get("result")
            .ok_or_else(|| LedgerError::InvalidResponse("missing result".to_string()))?;

        if result.get("status").and_then(Value::as_str) == Some("error") {
            let code = result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let message = result
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(match code.as_str() {
                "actNotFound" => LedgerError::AccountNotFound(message),
                _ => LedgerError::Rpc { code, message },
            });
        }

        Ok(result.clone())
    }
}

impl LedgerGateway for JsonRpcGateway {
    fn account_info(&self, address: &str) -> Result<AccountInfo, LedgerError> {
        let result = self.call(
            "account_info",
            json!({ "account": address, "ledger_index": "validated" }),
        )?;
        parse_account_info(&result)
    }

    fn server_params(&self) -> Result<ServerParams, LedgerError> {
        let result = self.call("server_state", json!({}))?;
        parse_server_params(&result)
    }

    fn account_lines(&self, address: &str) -> Result<Vec<TrustLine>, LedgerError> {
        let result = self.call(
            "account_lines",
            json!({ "account": address, "ledger_index": "validated" }),
        )?;
        parse_account_lines(&result)
    }

    fn transaction(&self, tx_hash: &str) -> Result<Option<TxStatus>, LedgerError> {
        match self.call("tx", json!({ "transaction": tx_hash })) {
            Ok(result) => Ok(Some(parse_tx_status(&result)?)),
            Err(LedgerError::Rpc { code, .. }) if code == "txnNotFound" => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn validated_ledger_index(&self) -> Result<u32, LedgerError> {
        let result = self.call("ledger", json!({ "ledger_index": "validated" }))?;
        result
            .get("ledger_index")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .ok_or_else(|| LedgerError::InvalidResponse("missing ledger_index".to_string()))
    }

    fn submit(&self, tx_blob: &str) -> Result<SubmitResult, LedgerError> {
        let result = self.call("submit", json!({ "tx_blob": tx_blob }))?;
        parse_submit_result(&result)
    }

    fn propose_wallet(&self) -> Result<ProposedWallet, LedgerError> {
        let result = self.call("wallet_propose", json!({}))?;
        let address = result
            .get("account_id")
            .and_then(Value::as_str)
            .ok_or_else(|| LedgerError::InvalidResponse("missing account_id".to_string()))?
            .to_string();
        let seed = result
            .get("master_seed")
            .and_then(Value::as_str)
            .ok_or_else(|| LedgerError::InvalidResponse("missing master_seed".to_string()))?;
        Ok(ProposedWallet {
            address,
            seed: Zeroizing::new(seed.to_string()),
        })
    }
}

fn invalid(what: &str) -> LedgerError {
    LedgerError::InvalidResponse(what.to_string())
}

fn parse_account_info(result: &Value) -> Result<AccountInfo, LedgerError> {
    let data = result
        .get("account_data")
        .ok_or_else(|| invalid("missing account_data"))?;
    let balance_drops = data
        .get("Balance")
        .and_then(Value::as_str)
        .and_then(|b| b.parse().ok())
        .ok_or_else(|| invalid("missing Balance"))?;
    let owner_count = data
        .get("OwnerCount")
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid("missing OwnerCount"))? as u32;
    let sequence = data
        .get("Sequence")
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid("missing Sequence"))? as u32;
    let regular_key = data
        .get("RegularKey")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(AccountInfo {
        balance_drops,
        owner_count,
        sequence,
        regular_key,
    })
}

fn parse_server_params(result: &Value) -> Result<ServerParams, LedgerError> {
    let ledger = result
        .get("state")
        .and_then(|s| s.get("validated_ledger"))
        .ok_or_else(|| invalid("missing validated_ledger state"))?;
    let field = |name: &str| {
        ledger
            .get(name)
            .and_then(Value::as_u64)
            .ok_or_else(|| invalid(name))
    };
    Ok(ServerParams {
        reserve_base_drops: field("reserve_base")?,
        reserve_increment_drops: field("reserve_inc")?,
        base_fee_drops: field("base_fee")?,
    })
}

fn parse_account_lines(result: &Value) -> Result<Vec<TrustLine>, LedgerError> {
    let lines = result
        .get("lines")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("missing lines"))?;

    let mut parsed = Vec::new();
    for line in lines {
        let currency = line
            .get("currency")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("line missing currency"))?;
        let issuer = line
            .get("account")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("line missing account"))?;
        let balance = line
            .get("balance")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("line missing balance"))?;

        // Negative balances are obligations, not holdings
        if balance.starts_with('-') {
            continue;
        }
        let balance_micro = parse_token_value(balance)
            .map_err(|e| invalid(&format!("line balance: {}", e)))?;
        if balance_micro == 0 {
            continue;
        }
        parsed.push(TrustLine {
            currency: currency.to_string(),
            issuer: issuer.to_string(),
            balance_micro,
        });
    }
    Ok(parsed)
}

fn parse_tx_status(result: &Value) -> Result<TxStatus, LedgerError> {
    let validated = result
        .get("validated")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let last_ledger_sequence = result
        .get("LastLedgerSequence")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let result_code = result
        .get("meta")
        .and_then(|m| m.get("TransactionResult"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(TxStatus {
        validated,
        last_ledger_sequence,
        result_code,
    })
}

fn parse_submit_result(result: &Value) -> Result<SubmitResult, LedgerError> {
    let engine_result = result
        .get("engine_result")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing engine_result"))?
        .to_string();
    let engine_message = result
        .get("engine_result_message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let tx_hash = result
        .get("tx_json")
        .and_then(|t| t.get("hash"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(SubmitResult {
        engine_result,
        engine_message,
        tx_hash,
    })
}
