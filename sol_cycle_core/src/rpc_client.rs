// RPC client abstraction over the Solana JSON-RPC surface the pipeline
// actually uses, plus mint-account helpers.

use crate::error::CoreError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as Base64Engine, Engine as _};
use log::debug;
use serde_json::{json, Value};
use solana_client::rpc_client::RpcClient as SolanaRpcClient;
use solana_program::program_pack::Pack;
use spl_token::state::Mint;
use std::sync::Arc;

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, CoreError>;

#[async_trait(?Send)]
pub trait RpcClient {
    /// Get account info as the JSON-RPC shape (data as `[base64, "base64"]`)
    async fn get_account_info(&self, pubkey: &str) -> RpcResult<Option<Value>>;

    /// Get latest blockhash
    async fn get_latest_blockhash(&self) -> RpcResult<String>;

    /// Send a bincode-serialized transaction and wait for confirmation
    async fn send_transaction(&self, transaction: &[u8]) -> RpcResult<String>;
}

/// Extract the base64 account data payload from a `get_account_info` value.
fn account_data_bytes(account: &Value) -> RpcResult<Vec<u8>> {
    let data = account
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|arr| arr.first())
        .and_then(|d| d.as_str())
        .ok_or_else(|| CoreError::ParseError("Invalid account data format".to_string()))?;
    Base64Engine
        .decode(data)
        .map_err(|e| CoreError::ParseError(format!("Failed to decode base64: {}", e)))
}

/// Fetch a mint account and return its freeze authority, if any.
/// `Ok(None)` means the mint cannot freeze holder accounts.
pub async fn fetch_freeze_authority<C: RpcClient + ?Sized>(
    mint: &str,
    client: &C,
) -> RpcResult<Option<String>> {
    let account = client
        .get_account_info(mint)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Mint account not found: {}", mint)))?;

    let decoded = account_data_bytes(&account)?;
    if decoded.len() < Mint::LEN {
        return Err(CoreError::ParseError(format!(
            "Account data too small for a mint: {} bytes",
            decoded.len()
        )));
    }
    let state = Mint::unpack_from_slice(&decoded[..Mint::LEN])
        .map_err(|e| CoreError::ParseError(format!("Failed to unpack mint {}: {}", mint, e)))?;

    Ok(Option::from(state.freeze_authority).map(|pk: solana_program::pubkey::Pubkey| pk.to_string()))
}

/// Native RPC client wrapping the blocking `solana_client::RpcClient`
/// behind `spawn_blocking`.
pub struct NativeRpcClient {
    client: Arc<SolanaRpcClient>,
}

impl NativeRpcClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Arc::new(SolanaRpcClient::new(endpoint)),
        }
    }
}

#[async_trait(?Send)]
impl RpcClient for NativeRpcClient {
    async fn get_account_info(&self, pubkey: &str) -> RpcResult<Option<Value>> {
        debug!("Native RPC: get_account_info for {}", pubkey);

        use solana_sdk::pubkey::Pubkey;
        use std::str::FromStr;

        let pubkey = Pubkey::from_str(pubkey)
            .map_err(|e| CoreError::ParseError(format!("Invalid pubkey: {}", e)))?;

        let client = self.client.clone();
        let account = tokio::task::spawn_blocking(move || client.get_account(&pubkey))
            .await
            .map_err(|e| CoreError::Rpc(format!("Task join error: {}", e)))?;

        match account {
            Ok(acc) => {
                let data_base64 = Base64Engine.encode(&acc.data);
                let account_json = json!({
                    "data": [data_base64, "base64"],
                    "executable": acc.executable,
                    "lamports": acc.lamports,
                    "owner": acc.owner.to_string(),
                    "rentEpoch": acc.rent_epoch,
                });
                Ok(Some(account_json))
            }
            Err(_) => Ok(None),
        }
    }

    async fn get_latest_blockhash(&self) -> RpcResult<String> {
        debug!("Native RPC: get_latest_blockhash");

        let client = self.client.clone();
        let blockhash = tokio::task::spawn_blocking(move || client.get_latest_blockhash())
            .await
            .map_err(|e| CoreError::Rpc(format!("Task join error: {}", e)))?
            .map_err(|e| CoreError::Rpc(format!("get_latest_blockhash failed: {}", e)))?;

        Ok(blockhash.to_string())
    }

    async fn send_transaction(&self, transaction: &[u8]) -> RpcResult<String> {
        debug!("Native RPC: send_transaction");

        use solana_sdk::transaction::Transaction;

        let tx: Transaction = bincode::deserialize(transaction)
            .map_err(|e| CoreError::ParseError(format!("Failed to deserialize transaction: {}", e)))?;

        let client = self.client.clone();
        let signature = tokio::task::spawn_blocking(move || client.send_and_confirm_transaction(&tx))
            .await
            .map_err(|e| CoreError::Rpc(format!("Task join error: {}", e)))?
            .map_err(|e| CoreError::Transaction(format!("send_transaction failed: {}", e)))?;

        Ok(signature.to_string())
    }
}
