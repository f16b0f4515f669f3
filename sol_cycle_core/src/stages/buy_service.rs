// Buy stage: swap native SOL into each walleted, unused token.

use crate::error::CoreError;
use crate::models::CapitalSnapshot;
use crate::rpc_client::RpcClient;
use crate::settings::{AmountType, Settings};
use crate::signer::TransactionSigner;
use crate::stages::{Stage, StageKind, StageReport};
use crate::store::{AddressStore, CapitalStore};
use crate::swap::{send_swap_transactions, SwapBuildRequest, SwapClient, WSOL_MINT};
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lamports to spend on one buy.
pub fn trade_amount(
    settings: &Settings,
    capital: Option<CapitalSnapshot>,
) -> Result<u64, CoreError> {
    match settings.amount_type {
        AmountType::Static => Ok(settings.static_amount_lamports),
        AmountType::Dynamic => {
            let snapshot = capital.ok_or_else(|| {
                CoreError::NotFound("no capital snapshot for dynamic sizing".to_string())
            })?;
            Ok((snapshot.lamports as f64 * settings.percentage_to_use / 100.0) as u64)
        }
    }
}

pub struct BuyService {
    swap: Arc<dyn SwapClient>,
    rpc: Arc<dyn RpcClient>,
    signer: Arc<dyn TransactionSigner>,
    store: Arc<AddressStore>,
    capital: Arc<CapitalStore>,
    settings: Arc<Settings>,
    in_flight: AtomicBool,
}

impl BuyService {
    pub fn new(
        swap: Arc<dyn SwapClient>,
        rpc: Arc<dyn RpcClient>,
        signer: Arc<dyn TransactionSigner>,
        store: Arc<AddressStore>,
        capital: Arc<CapitalStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            swap,
            rpc,
            signer,
            store,
            capital,
            settings,
            in_flight: AtomicBool::new(false),
        }
    }

    async fn execute_buy(&self, mint: &str, lamports: u64) -> Result<(), CoreError> {
        let mint_pk = Pubkey::from_str(mint)
            .map_err(|e| CoreError::ParseError(format!("Invalid mint {}: {}", mint, e)))?;
        let payer = self.signer.public_key();

        let fee = self.swap.priority_fee().await?;
        let quote = self
            .swap
            .quote_swap(
                &WSOL_MINT.to_string(),
                mint,
                lamports,
                self.settings.slippage_bps,
            )
            .await?;

        let output_account = get_associated_token_address(&payer, &mint_pk);
        let request = SwapBuildRequest {
            quote,
            priority_fee_microlamports: fee,
            wallet: payer.to_string(),
            wrap_sol: true,
            unwrap_sol: false,
            input_account: None,
            output_account: Some(output_account.to_string()),
        };
        let txs = self.swap.build_transactions(&request).await?;
        let signatures =
            send_swap_transactions(&txs, self.signer.as_ref(), self.rpc.as_ref()).await?;
        info!("Buy confirmed for {}: {:?}", mint, signatures);
        Ok(())
    }
}

#[async_trait(?Send)]
impl Stage for BuyService {
    fn name(&self) -> &'static str {
        "buyer"
    }

    fn kind(&self) -> StageKind {
        StageKind::Trader
    }

    async fn run(&self) -> Result<StageReport, CoreError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Buy pass already in progress, skipping this run");
            return Ok(StageReport::default());
        }
        let result = self.run_inner().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }
}

impl BuyService {
    async fn run_inner(&self) -> Result<StageReport, CoreError> {
        let targets: Vec<String> = self
            .store
            .load()
            .await?
            .into_iter()
            .filter(|r| r.wallet && !r.used && r.is_active())
            .map(|r| r.address)
            .collect();

        let mut report = StageReport::default();
        report.examined(targets.len());
        if targets.is_empty() {
            return Ok(report);
        }

        let capital = self.capital.load().await?;

        for mint in targets {
            let lamports = trade_amount(&self.settings, capital)?;
            if lamports == 0 {
                warn!("Computed zero trade amount for {}, skipping", mint);
                continue;
            }

            match self.execute_buy(&mint, lamports).await {
                Ok(()) => {
                    let now = Utc::now().timestamp();
                    self.store
                        .update(|records| {
                            if let Some(rec) =
                                records.iter_mut().find(|r| r.address == mint)
                            {
                                if let Err(e) = rec.mark_bought(now) {
                                    warn!("{}", e);
                                }
                            }
                        })
                        .await?;
                    report.changed_one();
                }
                Err(e) => {
                    // Record untouched: retried next cycle.
                    warn!("Buy failed for {}: {}", mint, e);
                }
            }

            tokio::time::sleep(Duration::from_secs(self.settings.inter_trade_delay_secs)).await;
        }

        Ok(report)
    }
}
