//! JSON-RPC ledger client.
//!
//! Plain single-endpoint HTTP adapter for [`LedgerRpc`]. Transactions are sent
//! and fetched base64-encoded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use fill_core::BoxFuture;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{debug, trace};

use crate::error::{LedgerError, LedgerResult};
use crate::rpc::{
    AccountInfo, BlockhashInfo, Confirmation, LedgerRpc, ObservedInstruction, ObservedTransaction,
    Simulation,
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between signature status polls.
const DEFAULT_CONFIRM_POLL: Duration = Duration::from_millis(500);

const COMMITMENT: &str = "confirmed";

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcErrorBody {
    fn into_ledger_error(self) -> LedgerError {
        let logs = self
            .data
            .as_ref()
            .and_then(|data| data.get("logs"))
            .and_then(Value::as_array)
            .map(|logs| {
                logs.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            });

        match logs {
            Some(logs) => LedgerError::PreflightFailed {
                message: self.message,
                logs,
            },
            None => LedgerError::Rpc {
                code: self.code,
                message: self.message,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlockhash {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Debug, Deserialize)]
struct RpcAccount {
    lamports: u64,
    owner: String,
    data: (String, String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcPrioritizationFee {
    prioritization_fee: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcSimulation {
    err: Option<Value>,
    logs: Option<Vec<String>>,
    units_consumed: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcSignatureStatus {
    slot: u64,
    err: Option<Value>,
    confirmation_status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcTransaction {
    slot: u64,
    transaction: (String, String),
    meta: Option<RpcTransactionMeta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransactionMeta {
    err: Option<Value>,
    #[serde(default)]
    log_messages: Option<Vec<String>>,
    #[serde(default)]
    loaded_addresses: Option<RpcLoadedAddresses>,
}

#[derive(Debug, Default, Deserialize)]
struct RpcLoadedAddresses {
    #[serde(default)]
    writable: Vec<String>,
    #[serde(default)]
    readonly: Vec<String>,
}

/// Ledger client over HTTP JSON-RPC.
pub struct JsonRpcLedger {
    client: Client,
    url: String,
    next_id: AtomicU64,
    confirm_poll: Duration,
}

impl JsonRpcLedger {
    pub fn new(url: impl Into<String>) -> LedgerResult<Self> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> LedgerResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
            confirm_poll: DEFAULT_CONFIRM_POLL,
        })
    }

    #[must_use]
    pub fn with_confirm_poll(mut self, confirm_poll: Duration) -> Self {
        self.confirm_poll = confirm_poll;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> LedgerResult<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(method, id, "RPC request");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Http(format!("{method} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Http(format!("{method} HTTP {status}: {body}")));
        }

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| LedgerError::Decode(format!("{method} response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(error.into_ledger_error());
        }
        Ok(parsed.result)
    }

    async fn call_required<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> LedgerResult<T> {
        self.call(method, params)
            .await?
            .ok_or_else(|| LedgerError::Decode(format!("{method} returned no result")))
    }

    async fn slot(&self) -> LedgerResult<u64> {
        self.call_required("getSlot", json!([{ "commitment": COMMITMENT }]))
            .await
    }

    async fn block_height(&self) -> LedgerResult<u64> {
        self.call_required("getBlockHeight", json!([{ "commitment": COMMITMENT }]))
            .await
    }

    async fn latest_blockhash(&self) -> LedgerResult<BlockhashInfo> {
        let response: WithContext<RpcBlockhash> = self
            .call_required("getLatestBlockhash", json!([{ "commitment": COMMITMENT }]))
            .await?;
        let blockhash = response
            .value
            .blockhash
            .parse::<Hash>()
            .map_err(|e| LedgerError::Decode(format!("blockhash: {e}")))?;

        Ok(BlockhashInfo {
            blockhash,
            last_valid_block_height: response.value.last_valid_block_height,
        })
    }

    async fn account(&self, address: Pubkey) -> LedgerResult<Option<AccountInfo>> {
        let response: WithContext<Option<RpcAccount>> = self
            .call_required(
                "getAccountInfo",
                json!([address.to_string(), { "encoding": "base64", "commitment": COMMITMENT }]),
            )
            .await?;

        response
            .value
            .map(|account| {
                Ok(AccountInfo {
                    lamports: account.lamports,
                    owner: parse_pubkey(&account.owner)?,
                    data: BASE64
                        .decode(&account.data.0)
                        .map_err(|e| LedgerError::Decode(format!("account data: {e}")))?,
                })
            })
            .transpose()
    }

    async fn balance(&self, address: Pubkey) -> LedgerResult<u64> {
        let response: WithContext<u64> = self
            .call_required(
                "getBalance",
                json!([address.to_string(), { "commitment": COMMITMENT }]),
            )
            .await?;
        Ok(response.value)
    }

    async fn rent_exemption(&self, data_len: usize) -> LedgerResult<u64> {
        self.call_required("getMinimumBalanceForRentExemption", json!([data_len]))
            .await
    }

    async fn prioritization_fees(&self, accounts: Vec<Pubkey>) -> LedgerResult<Vec<u64>> {
        let accounts: Vec<String> = accounts.iter().map(ToString::to_string).collect();
        let fees: Vec<RpcPrioritizationFee> = self
            .call_required("getRecentPrioritizationFees", json!([accounts]))
            .await?;
        Ok(fees.into_iter().map(|fee| fee.prioritization_fee).collect())
    }

    async fn simulate(&self, transaction: &VersionedTransaction) -> LedgerResult<Simulation> {
        let encoded = encode_transaction(transaction)?;
        let response: WithContext<RpcSimulation> = self
            .call_required(
                "simulateTransaction",
                json!([encoded, {
                    "encoding": "base64",
                    "sigVerify": false,
                    "replaceRecentBlockhash": true,
                    "commitment": COMMITMENT,
                }]),
            )
            .await?;

        Ok(Simulation {
            err: response.value.err.map(|e| e.to_string()),
            logs: response.value.logs.unwrap_or_default(),
            units_consumed: response.value.units_consumed,
        })
    }

    async fn send(&self, transaction: &VersionedTransaction) -> LedgerResult<Signature> {
        let encoded = encode_transaction(transaction)?;
        let signature: String = self
            .call_required(
                "sendTransaction",
                json!([encoded, {
                    "encoding": "base64",
                    "skipPreflight": false,
                    "preflightCommitment": COMMITMENT,
                    "maxRetries": 0,
                }]),
            )
            .await?;

        signature
            .parse::<Signature>()
            .map_err(|e| LedgerError::Decode(format!("signature: {e}")))
    }

    async fn confirm(
        &self,
        signature: Signature,
        last_valid_block_height: u64,
    ) -> LedgerResult<Confirmation> {
        loop {
            let response: WithContext<Vec<Option<RpcSignatureStatus>>> = self
                .call_required("getSignatureStatuses", json!([[signature.to_string()]]))
                .await?;

            if let Some(Some(status)) = response.value.into_iter().next() {
                let landed = matches!(
                    status.confirmation_status.as_deref(),
                    Some("confirmed" | "finalized")
                );
                if landed {
                    return Ok(Confirmation {
                        slot: status.slot,
                        err: status.err.map(|e| e.to_string()),
                    });
                }
            }

            let height = self.block_height().await?;
            if height > last_valid_block_height {
                debug!(%signature, height, last_valid_block_height, "Blockhash expired");
                return Err(LedgerError::Expired(signature));
            }

            tokio::time::sleep(self.confirm_poll).await;
        }
    }

    async fn transaction(&self, signature: Signature) -> LedgerResult<Option<ObservedTransaction>> {
        let response: Option<RpcTransaction> = self
            .call(
                "getTransaction",
                json!([signature.to_string(), {
                    "encoding": "base64",
                    "commitment": COMMITMENT,
                    "maxSupportedTransactionVersion": 0,
                }]),
            )
            .await?;

        response
            .map(|transaction| decode_transaction(signature, transaction))
            .transpose()
    }
}

impl LedgerRpc for JsonRpcLedger {
    fn get_slot(&self) -> BoxFuture<'_, LedgerResult<u64>> {
        Box::pin(self.slot())
    }

    fn get_block_height(&self) -> BoxFuture<'_, LedgerResult<u64>> {
        Box::pin(self.block_height())
    }

    fn get_latest_blockhash(&self) -> BoxFuture<'_, LedgerResult<BlockhashInfo>> {
        Box::pin(self.latest_blockhash())
    }

    fn get_account(&self, address: Pubkey) -> BoxFuture<'_, LedgerResult<Option<AccountInfo>>> {
        Box::pin(self.account(address))
    }

    fn get_balance(&self, address: Pubkey) -> BoxFuture<'_, LedgerResult<u64>> {
        Box::pin(self.balance(address))
    }

    fn get_minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> BoxFuture<'_, LedgerResult<u64>> {
        Box::pin(self.rent_exemption(data_len))
    }

    fn get_recent_prioritization_fees(
        &self,
        accounts: Vec<Pubkey>,
    ) -> BoxFuture<'_, LedgerResult<Vec<u64>>> {
        Box::pin(self.prioritization_fees(accounts))
    }

    fn simulate_transaction<'a>(
        &'a self,
        transaction: &'a VersionedTransaction,
    ) -> BoxFuture<'a, LedgerResult<Simulation>> {
        Box::pin(self.simulate(transaction))
    }

    fn send_transaction<'a>(
        &'a self,
        transaction: &'a VersionedTransaction,
    ) -> BoxFuture<'a, LedgerResult<Signature>> {
        Box::pin(self.send(transaction))
    }

    fn confirm_transaction(
        &self,
        signature: Signature,
        last_valid_block_height: u64,
    ) -> BoxFuture<'_, LedgerResult<Confirmation>> {
        Box::pin(self.confirm(signature, last_valid_block_height))
    }

    fn get_transaction(
        &self,
        signature: Signature,
    ) -> BoxFuture<'_, LedgerResult<Option<ObservedTransaction>>> {
        Box::pin(self.transaction(signature))
    }
}

/// Serialize a transaction for the wire.
pub fn encode_transaction(transaction: &VersionedTransaction) -> LedgerResult<String> {
    let bytes =
        bincode::serialize(transaction).map_err(|e| LedgerError::Serialize(e.to_string()))?;
    Ok(BASE64.encode(bytes))
}

fn parse_pubkey(value: &str) -> LedgerResult<Pubkey> {
    value
        .parse::<Pubkey>()
        .map_err(|e| LedgerError::Decode(format!("pubkey {value}: {e}")))
}

/// Decode a `getTransaction` result into an [`ObservedTransaction`].
///
/// Instructions referencing an account index outside the resolved key list
/// are dropped.
pub(crate) fn decode_transaction(
    signature: Signature,
    raw: RpcTransaction,
) -> LedgerResult<ObservedTransaction> {
    let bytes = BASE64
        .decode(&raw.transaction.0)
        .map_err(|e| LedgerError::Decode(format!("transaction base64: {e}")))?;
    let transaction: VersionedTransaction = bincode::deserialize(&bytes)
        .map_err(|e| LedgerError::Decode(format!("transaction: {e}")))?;

    let meta = raw.meta.unwrap_or_default();
    let mut account_keys = transaction.message.static_account_keys().to_vec();
    if let Some(loaded) = &meta.loaded_addresses {
        for key in loaded.writable.iter().chain(loaded.readonly.iter()) {
            account_keys.push(parse_pubkey(key)?);
        }
    }

    let instructions = transaction
        .message
        .instructions()
        .iter()
        .filter_map(|compiled| {
            let program_id = *account_keys.get(usize::from(compiled.program_id_index))?;
            let accounts = compiled
                .accounts
                .iter()
                .map(|index| account_keys.get(usize::from(*index)).copied())
                .collect::<Option<Vec<_>>>()?;
            Some(ObservedInstruction {
                program_id,
                accounts,
                data: compiled.data.clone(),
            })
        })
        .collect();

    Ok(ObservedTransaction {
        signature,
        slot: raw.slot,
        account_keys,
        instructions,
        logs: meta.log_messages.unwrap_or_default(),
        failed: meta.err.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::{AccountMeta, Instruction};
    use solana_sdk::message::{v0, VersionedMessage};

    fn sample_transaction(program_id: Pubkey, accounts: &[Pubkey]) -> VersionedTransaction {
        let payer = Pubkey::new_unique();
        let instruction = Instruction::new_with_bytes(
            program_id,
            &[1, 2, 3],
            accounts
                .iter()
                .map(|key| AccountMeta::new(*key, false))
                .collect(),
        );
        let message =
            v0::Message::try_compile(&payer, &[instruction], &[], Hash::default()).unwrap();
        VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::V0(message),
        }
    }

    #[test]
    fn test_preflight_error_carries_logs() {
        let body: RpcErrorBody = serde_json::from_value(json!({
            "code": -32002,
            "message": "Transaction simulation failed",
            "data": { "logs": ["Program log: one", "Program log: two"] }
        }))
        .unwrap();

        match body.into_ledger_error() {
            LedgerError::PreflightFailed { logs, .. } => assert_eq!(logs.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plain_rpc_error() {
        let body: RpcErrorBody = serde_json::from_value(json!({
            "code": -32005,
            "message": "Node is behind"
        }))
        .unwrap();

        assert!(matches!(
            body.into_ledger_error(),
            LedgerError::Rpc { code: -32005, .. }
        ));
    }

    #[test]
    fn test_decode_transaction_resolves_accounts() {
        let program_id = Pubkey::new_unique();
        let accounts = [Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique()];
        let transaction = sample_transaction(program_id, &accounts);
        let encoded = encode_transaction(&transaction).unwrap();

        let raw: RpcTransaction = serde_json::from_value(json!({
            "slot": 42,
            "transaction": [encoded, "base64"],
            "meta": {
                "err": null,
                "logMessages": ["Program log: Instruction: InitiateWithdraw"],
                "loadedAddresses": { "writable": [], "readonly": [] }
            }
        }))
        .unwrap();

        let observed = decode_transaction(Signature::default(), raw).unwrap();
        assert_eq!(observed.slot, 42);
        assert!(!observed.failed);
        assert_eq!(observed.instructions.len(), 1);
        assert_eq!(observed.instructions[0].program_id, program_id);
        assert_eq!(observed.instructions[0].accounts, accounts.to_vec());
        assert_eq!(observed.instructions[0].data, vec![1, 2, 3]);
        assert_eq!(observed.logs.len(), 1);
    }

    #[test]
    fn test_decode_failed_transaction_without_meta_logs() {
        let transaction = sample_transaction(Pubkey::new_unique(), &[Pubkey::new_unique()]);
        let encoded = encode_transaction(&transaction).unwrap();

        let raw: RpcTransaction = serde_json::from_value(json!({
            "slot": 7,
            "transaction": [encoded, "base64"],
            "meta": { "err": { "InstructionError": [0, "Custom"] } }
        }))
        .unwrap();

        let observed = decode_transaction(Signature::default(), raw).unwrap();
        assert!(observed.failed);
        assert!(observed.logs.is_empty());
    }
}
