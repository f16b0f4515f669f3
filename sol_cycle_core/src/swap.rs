// DEX aggregator client: quote, priority fee, and transaction build.

use crate::error::CoreError;
use crate::rpc_client::RpcClient;
use crate::signer::TransactionSigner;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as Base64Engine, Engine as _};
use log::{debug, info};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use std::str::FromStr;

/// The wrapped-SOL mint, the fixed leg of every swap.
pub static WSOL_MINT: Lazy<Pubkey> =
    Lazy::new(|| Pubkey::from_str("So11111111111111111111111111111111111111112").unwrap());

/// An opaque quote payload, posted back verbatim when building the
/// transactions.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub response: Value,
}

#[derive(Debug, Clone)]
pub struct SwapBuildRequest {
    pub quote: SwapQuote,
    pub priority_fee_microlamports: u64,
    pub wallet: String,
    pub wrap_sol: bool,
    pub unwrap_sol: bool,
    pub input_account: Option<String>,
    pub output_account: Option<String>,
}

#[async_trait(?Send)]
pub trait SwapClient {
    /// Suggested compute-unit price in micro-lamports.
    async fn priority_fee(&self) -> Result<u64, CoreError>;

    /// Quote a swap of `amount` base units of `input_mint` into
    /// `output_mint`.
    async fn quote_swap(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u64,
    ) -> Result<SwapQuote, CoreError>;

    /// Build unsigned transactions for a quote; each entry is a
    /// base64-encoded serialized transaction.
    async fn build_transactions(&self, req: &SwapBuildRequest) -> Result<Vec<String>, CoreError>;
}

/// Check a quote response body: `success` must be true when present.
pub fn check_quote_response(body: &Value) -> Result<(), CoreError> {
    if body.get("data").is_none() {
        return Err(CoreError::Api("quote response has no data".to_string()));
    }
    if let Some(false) = body.get("success").and_then(|s| s.as_bool()) {
        let msg = body
            .get("msg")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown quote failure");
        return Err(CoreError::Api(format!("swap quote rejected: {}", msg)));
    }
    Ok(())
}

/// Extract the base64 transaction list from a build response.
pub fn extract_transactions(body: &Value) -> Result<Vec<String>, CoreError> {
    let entries = body
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| CoreError::Api("build response has no transaction list".to_string()))?;
    let txs: Vec<String> = entries
        .iter()
        .filter_map(|e| e.get("transaction").and_then(|t| t.as_str()))
        .map(String::from)
        .collect();
    if txs.is_empty() {
        return Err(CoreError::Api("build response contained no transactions".to_string()));
    }
    Ok(txs)
}

/// Decode, sign, and send each prebuilt transaction in order, waiting
/// for confirmation before moving on. Returns the signatures.
pub async fn send_swap_transactions(
    txs: &[String],
    signer: &dyn TransactionSigner,
    rpc: &dyn RpcClient,
) -> Result<Vec<String>, CoreError> {
    let mut signatures = Vec::with_capacity(txs.len());
    for (idx, encoded) in txs.iter().enumerate() {
        let raw = Base64Engine
            .decode(encoded)
            .map_err(|e| CoreError::ParseError(format!("transaction base64: {}", e)))?;
        let mut tx: Transaction = bincode::deserialize(&raw)
            .map_err(|e| CoreError::ParseError(format!("transaction decode: {}", e)))?;
        signer.sign_transaction(&mut tx)?;
        let bytes = bincode::serialize(&tx)
            .map_err(|e| CoreError::ParseError(format!("transaction encode: {}", e)))?;
        let signature = rpc.send_transaction(&bytes).await?;
        info!("Transaction {}/{} confirmed: {}", idx + 1, txs.len(), signature);
        signatures.push(signature);
    }
    Ok(signatures)
}

/// REST client for the Raydium trade API.
pub struct RaydiumClient {
    http: reqwest::Client,
    swap_host: String,
    fee_url: String,
}

impl RaydiumClient {
    pub fn new(swap_host: String, fee_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            swap_host,
            fee_url,
        }
    }
}

#[async_trait(?Send)]
impl SwapClient for RaydiumClient {
    async fn priority_fee(&self) -> Result<u64, CoreError> {
        let body: Value = self.http.get(&self.fee_url).send().await?.json().await?;
        body.pointer("/data/default/h")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| CoreError::Api("priority fee missing from response".to_string()))
    }

    async fn quote_swap(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u64,
    ) -> Result<SwapQuote, CoreError> {
        let url = format!(
            "{}/compute/swap-base-in?inputMint={}&outputMint={}&amount={}&slippageBps={}&txVersion=LEGACY",
            self.swap_host, input_mint, output_mint, amount, slippage_bps
        );
        debug!("Swap quote: {}", url);
        let body: Value = self.http.get(&url).send().await?.json().await?;
        check_quote_response(&body)?;
        Ok(SwapQuote { response: body })
    }

    async fn build_transactions(&self, req: &SwapBuildRequest) -> Result<Vec<String>, CoreError> {
        let url = format!("{}/transaction/swap-base-in", self.swap_host);
        let mut payload = json!({
            "computeUnitPriceMicroLamports": req.priority_fee_microlamports.to_string(),
            "swapResponse": req.quote.response,
            "txVersion": "LEGACY",
            "wallet": req.wallet,
            "wrapSol": req.wrap_sol,
            "unwrapSol": req.unwrap_sol,
        });
        if let Some(acc) = &req.input_account {
            payload["inputAccount"] = json!(acc);
        }
        if let Some(acc) = &req.output_account {
            payload["outputAccount"] = json!(acc);
        }

        let body: Value = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;
        extract_transactions(&body)
    }
}
