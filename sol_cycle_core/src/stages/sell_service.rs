// Sell stage: swap matured positions back to native SOL.

use crate::error::CoreError;
use crate::models::AddressRecord;
use crate::rpc_client::RpcClient;
use crate::settings::Settings;
use crate::signer::TransactionSigner;
use crate::stages::{Stage, StageKind, StageReport};
use crate::store::AddressStore;
use crate::swap::{send_swap_transactions, SwapBuildRequest, SwapClient, WSOL_MINT};
use crate::wallet::WalletGateway;
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// A position may be exited once it is bought, unsold, has a measured
/// numeric balance, and has aged past the minimum holding period.
pub fn is_eligible(record: &AddressRecord, now: i64, min_holding_secs: i64) -> bool {
    if !record.used || record.reversed || record.ignore {
        return false;
    }
    if record.numeric_balance().is_none() {
        return false;
    }
    match record.used_at {
        Some(used_at) => now - used_at >= min_holding_secs,
        None => false,
    }
}

/// Token base units to sell for a whole-token balance.
pub fn sell_amount_base_units(balance: f64, decimals: u8) -> Result<u64, CoreError> {
    let amount = balance * 10f64.powi(decimals as i32);
    if !amount.is_finite() || amount <= 0.0 {
        return Err(CoreError::Validation(format!(
            "invalid sell amount computed from balance {}",
            balance
        )));
    }
    Ok(amount as u64)
}

pub struct SellService {
    swap: Arc<dyn SwapClient>,
    rpc: Arc<dyn RpcClient>,
    signer: Arc<dyn TransactionSigner>,
    wallet: Arc<dyn WalletGateway>,
    store: Arc<AddressStore>,
    settings: Arc<Settings>,
}

impl SellService {
    pub fn new(
        swap: Arc<dyn SwapClient>,
        rpc: Arc<dyn RpcClient>,
        signer: Arc<dyn TransactionSigner>,
        wallet: Arc<dyn WalletGateway>,
        store: Arc<AddressStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            swap,
            rpc,
            signer,
            wallet,
            store,
            settings,
        }
    }

    async fn execute_sell(&self, record: &AddressRecord) -> Result<(), CoreError> {
        let mint = &record.address;
        let balance = record
            .numeric_balance()
            .ok_or_else(|| CoreError::InvalidState(format!("{}: no numeric balance", mint)))?;
        let amount = sell_amount_base_units(balance, record.decimals)?;

        let mint_pk = Pubkey::from_str(mint)
            .map_err(|e| CoreError::ParseError(format!("Invalid mint {}: {}", mint, e)))?;
        let payer = self.signer.public_key();

        // The swap needs a funded wrapped-SOL account for fees; an
        // account that already exists is fine.
        self.wallet.wrap_sol(self.settings.wrap_amount_sol).await?;
        tokio::time::sleep(Duration::from_secs(self.settings.inter_trade_delay_secs)).await;

        let fee = self.swap.priority_fee().await?;
        let quote = self
            .swap
            .quote_swap(
                mint,
                &WSOL_MINT.to_string(),
                amount,
                self.settings.slippage_bps,
            )
            .await?;

        let input_account = get_associated_token_address(&payer, &mint_pk);
        let request = SwapBuildRequest {
            quote,
            priority_fee_microlamports: fee,
            wallet: payer.to_string(),
            wrap_sol: false,
            unwrap_sol: true,
            input_account: Some(input_account.to_string()),
            output_account: None,
        };
        let txs = self.swap.build_transactions(&request).await?;
        let signatures =
            send_swap_transactions(&txs, self.signer.as_ref(), self.rpc.as_ref()).await?;
        info!("Sell confirmed for {}: {:?}", mint, signatures);
        Ok(())
    }
}

#[async_trait(?Send)]
impl Stage for SellService {
    fn name(&self) -> &'static str {
        "seller"
    }

    fn kind(&self) -> StageKind {
        StageKind::Trader
    }

    async fn run(&self) -> Result<StageReport, CoreError> {
        let now = Utc::now().timestamp();
        let eligible: Vec<AddressRecord> = self
            .store
            .load()
            .await?
            .into_iter()
            .filter(|r| is_eligible(r, now, self.settings.min_holding_secs))
            .collect();

        let mut report = StageReport::default();
        report.examined(eligible.len());

        for record in eligible {
            match self.execute_sell(&record).await {
                Ok(()) => {
                    let now = Utc::now().timestamp();
                    self.store
                        .update(|records| {
                            if let Some(rec) =
                                records.iter_mut().find(|r| r.address == record.address)
                            {
                                if let Err(e) = rec.mark_sold(now) {
                                    warn!("{}", e);
                                }
                            }
                        })
                        .await?;
                    report.changed_one();
                }
                Err(e) => {
                    warn!("Sell failed for {}: {}", record.address, e);
                }
            }

            tokio::time::sleep(Duration::from_secs(self.settings.inter_trade_delay_secs)).await;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenBalance;
    use crate::signer::KeypairSigner;
    use crate::stages::buy_service::tests::{RecordingRpc, ScriptedSwap};
    use crate::wallet::ProvisionOutcome;
    use solana_sdk::signature::{Keypair, Signer as _};
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct WrapCounter {
        wraps: RefCell<usize>,
    }

    #[async_trait(?Send)]
    impl WalletGateway for WrapCounter {
        async fn native_balance(&self) -> Result<f64, CoreError> {
            Ok(10.0)
        }
        async fn create_token_account(&self, _mint: &str) -> Result<ProvisionOutcome, CoreError> {
            Ok(ProvisionOutcome::Created)
        }
        async fn token_balance(&self, _mint: &str) -> Result<f64, CoreError> {
            Ok(0.0)
        }
        async fn wrap_sol(&self, _amount_sol: f64) -> Result<(), CoreError> {
            *self.wraps.borrow_mut() += 1;
            Ok(())
        }
    }

    fn fast_settings() -> Settings {
        let mut s = crate::settings::tests::minimal();
        s.inter_trade_delay_secs = 0;
        s.min_holding_secs = 60;
        s
    }

    fn matured(addr: &str, now: i64) -> AddressRecord {
        let mut r = AddressRecord::new(addr.to_string(), 6, now - 600);
        r.mark_walleted();
        r.mark_bought(now - 120).unwrap();
        r.balance = Some(TokenBalance::Amount(500.0));
        r
    }

    #[test]
    fn eligibility_requires_all_conditions() {
        let now = 1_700_000_000;
        assert!(is_eligible(&matured("m", now), now, 60));

        // too young
        let mut young = matured("m", now);
        young.used_at = Some(now - 30);
        assert!(!is_eligible(&young, now, 60));

        // boundary is inclusive
        let mut exact = matured("m", now);
        exact.used_at = Some(now - 60);
        assert!(is_eligible(&exact, now, 60));

        // balance sentinel blocks the exit
        let mut errored = matured("m", now);
        errored.balance = Some(TokenBalance::error());
        assert!(!is_eligible(&errored, now, 60));

        // no measured balance yet
        let mut unmeasured = matured("m", now);
        unmeasured.balance = None;
        assert!(!is_eligible(&unmeasured, now, 60));

        // already sold
        let mut sold = matured("m", now);
        sold.mark_sold(now).unwrap();
        assert!(!is_eligible(&sold, now, 60));

        // ignored
        let mut ignored = matured("m", now);
        ignored.ignore = true;
        assert!(!is_eligible(&ignored, now, 60));
    }

    #[test]
    fn sell_amount_scales_by_decimals() {
        assert_eq!(sell_amount_base_units(500.0, 6).unwrap(), 500_000_000);
        assert_eq!(sell_amount_base_units(1.5, 9).unwrap(), 1_500_000_000);
        assert!(sell_amount_base_units(0.0, 6).is_err());
        assert!(sell_amount_base_units(-3.0, 6).is_err());
    }

    #[tokio::test]
    async fn confirmed_sell_marks_record_reversed() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        let now = Utc::now().timestamp();
        let mint = Pubkey::new_unique().to_string();
        store.save(&[matured(&mint, now)]).await.unwrap();

        let keypair = Keypair::new();
        let payer = keypair.pubkey();
        let wallet = Arc::new(WrapCounter { wraps: RefCell::new(0) });

        let stage = SellService::new(
            Arc::new(ScriptedSwap { payer, fail_quote: false }),
            Arc::new(RecordingRpc { sent: RefCell::new(0) }),
            Arc::new(KeypairSigner::new(keypair)),
            wallet.clone(),
            store.clone(),
            Arc::new(fast_settings()),
        );

        let report = stage.run().await.unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(*wallet.wraps.borrow(), 1);

        let rec = &store.load().await.unwrap()[0];
        assert!(rec.reversed);
        assert!(rec.reversed_at.is_some());
    }

    #[tokio::test]
    async fn failed_swap_leaves_record_unsold() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        let now = Utc::now().timestamp();
        let mint = Pubkey::new_unique().to_string();
        store.save(&[matured(&mint, now)]).await.unwrap();

        let keypair = Keypair::new();
        let payer = keypair.pubkey();

        let stage = SellService::new(
            Arc::new(ScriptedSwap { payer, fail_quote: true }),
            Arc::new(RecordingRpc { sent: RefCell::new(0) }),
            Arc::new(KeypairSigner::new(keypair)),
            Arc::new(WrapCounter { wraps: RefCell::new(0) }),
            store.clone(),
            Arc::new(fast_settings()),
        );

        stage.run().await.unwrap();
        assert!(!store.load().await.unwrap()[0].reversed);
    }
}
