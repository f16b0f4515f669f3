// Treasury: record available capital, admit secure candidates into the
// store, and provision token accounts.

use crate::error::CoreError;
use crate::models::{AddressRecord, CapitalSnapshot};
use crate::settings::Settings;
use crate::stages::{Stage, StageReport};
use crate::store::{AddressStore, CapitalStore, HandoffList};
use crate::wallet::WalletGateway;
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;

pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Lamports left for trading after the reserve. Errors when the wallet
/// holds less than the reserve.
pub fn available_lamports(balance_sol: f64, reserve_sol: f64) -> Result<u64, CoreError> {
    if balance_sol < reserve_sol {
        return Err(CoreError::Validation(format!(
            "wallet balance {} SOL is below the {} SOL reserve",
            balance_sol, reserve_sol
        )));
    }
    Ok(((balance_sol - reserve_sol) * LAMPORTS_PER_SOL) as u64)
}

pub struct TreasuryService {
    wallet: Arc<dyn WalletGateway>,
    secure_list: HandoffList,
    store: Arc<AddressStore>,
    capital: Arc<CapitalStore>,
    settings: Arc<Settings>,
}

impl TreasuryService {
    pub fn new(
        wallet: Arc<dyn WalletGateway>,
        secure_list: HandoffList,
        store: Arc<AddressStore>,
        capital: Arc<CapitalStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            wallet,
            secure_list,
            store,
            capital,
            settings,
        }
    }
}

#[async_trait(?Send)]
impl Stage for TreasuryService {
    fn name(&self) -> &'static str {
        "treasury"
    }

    async fn run(&self) -> Result<StageReport, CoreError> {
        let balance = self.wallet.native_balance().await?;
        let lamports = available_lamports(balance, self.settings.reserve_sol)?;
        self.capital.save(CapitalSnapshot { lamports }).await?;
        info!(
            "Treasury: {} SOL held, {} lamports available for trading",
            balance, lamports
        );

        // Admit new candidates as fresh records.
        let incoming = self.secure_list.load().await?;
        let now = Utc::now().timestamp();
        let admitted = self
            .store
            .update(move |records| {
                let mut added = 0;
                for (address, decimals) in incoming {
                    if !records.iter().any(|r| r.address == address) {
                        records.push(AddressRecord::new(address, decimals, now));
                        added += 1;
                    }
                }
                added
            })
            .await?;

        // Provision token accounts for anything not yet walleted.
        let pending: Vec<String> = self
            .store
            .load()
            .await?
            .into_iter()
            .filter(|r| !r.wallet && r.is_active())
            .map(|r| r.address)
            .collect();

        let mut report = StageReport::default();
        report.examined(pending.len());
        report.changed += admitted;

        for address in pending {
            match self.wallet.create_token_account(&address).await {
                Ok(outcome) => {
                    info!("Token account for {}: {:?}", address, outcome);
                    self.store
                        .update_record(&address, |r| r.mark_walleted())
                        .await?;
                    report.changed_one();
                }
                Err(e) => {
                    warn!("Failed to create token account for {}: {}", address, e);
                }
            }
        }

        Ok(report)
    }
}
