// Balance polling stages: the post-buy balance audit and the post-sell
// drain audit.

use crate::error::CoreError;
use crate::models::{AddressRecord, Completion, TokenBalance};
use crate::retry::RetryPolicy;
use crate::settings::Settings;
use crate::stages::{Stage, StageReport};
use crate::store::AddressStore;
use crate::wallet::WalletGateway;
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;

/// Below this many tokens a sold position counts as drained.
pub const DRAIN_CUTOFF: f64 = 1.0;

fn needs_balance(record: &AddressRecord) -> bool {
    record.used && !record.reversed && record.balance.is_none() && !record.ignore
}

fn needs_drain_check(record: &AddressRecord) -> bool {
    record.reversed
        && !record.ignore
        && !record
            .completed
            .as_ref()
            .is_some_and(|c| c.is_done() || c.is_error())
}

/// Populate `balance` for freshly bought records. Each record is filled
/// at most once: a value (or the error sentinel) takes it out of the
/// selection predicate.
pub struct BalanceAudit {
    wallet: Arc<dyn WalletGateway>,
    store: Arc<AddressStore>,
    policy: RetryPolicy,
}

impl BalanceAudit {
    pub fn new(wallet: Arc<dyn WalletGateway>, store: Arc<AddressStore>, settings: &Settings) -> Self {
        Self {
            wallet,
            store,
            policy: RetryPolicy::from_settings(settings),
        }
    }
}

#[async_trait(?Send)]
impl Stage for BalanceAudit {
    fn name(&self) -> &'static str {
        "accountant"
    }

    async fn run(&self) -> Result<StageReport, CoreError> {
        let pending: Vec<String> = self
            .store
            .load()
            .await?
            .iter()
            .filter(|r| needs_balance(r))
            .map(|r| r.address.clone())
            .collect();

        let mut report = StageReport::default();
        report.examined(pending.len());

        for address in pending {
            let wallet = self.wallet.clone();
            let addr = address.clone();
            let outcome = self
                .policy
                .run("token balance", || {
                    let wallet = wallet.clone();
                    let addr = addr.clone();
                    async move { wallet.token_balance(&addr).await }
                })
                .await;

            let value = match outcome {
                Ok(balance) => {
                    info!("Balance for {}: {}", address, balance);
                    TokenBalance::Amount(balance)
                }
                Err(e) => {
                    warn!("Balance query exhausted for {}: {}", address, e);
                    TokenBalance::error()
                }
            };
            self.store
                .update_record(&address, |r| r.balance = Some(value))
                .await?;
            report.changed_one();
        }

        Ok(report)
    }
}

/// What the drain audit decided for one sold record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    Residual,
}

pub fn resolve_drain(balance: f64) -> DrainOutcome {
    if balance < DRAIN_CUTOFF {
        DrainOutcome::Drained
    } else {
        DrainOutcome::Residual
    }
}

/// Verify that sold positions actually drained; residual balances put the
/// record back into the sell queue.
pub struct DrainAudit {
    wallet: Arc<dyn WalletGateway>,
    store: Arc<AddressStore>,
    policy: RetryPolicy,
}

impl DrainAudit {
    pub fn new(wallet: Arc<dyn WalletGateway>, store: Arc<AddressStore>, settings: &Settings) -> Self {
        Self {
            wallet,
            store,
            policy: RetryPolicy::from_settings(settings),
        }
    }
}

#[async_trait(?Send)]
impl Stage for DrainAudit {
    fn name(&self) -> &'static str {
        "drain-audit"
    }

    async fn run(&self) -> Result<StageReport, CoreError> {
        let pending: Vec<String> = self
            .store
            .load()
            .await?
            .iter()
            .filter(|r| needs_drain_check(r))
            .map(|r| r.address.clone())
            .collect();

        let mut report = StageReport::default();
        report.examined(pending.len());

        for address in pending {
            let wallet = self.wallet.clone();
            let addr = address.clone();
            let outcome = self
                .policy
                .run("drain check", || {
                    let wallet = wallet.clone();
                    let addr = addr.clone();
                    async move { wallet.token_balance(&addr).await }
                })
                .await;

            match outcome {
                Ok(balance) => match resolve_drain(balance) {
                    DrainOutcome::Drained => {
                        info!("{} drained (balance {})", address, balance);
                        self.store
                            .update_record(&address, |r| r.mark_completed())
                            .await?;
                    }
                    DrainOutcome::Residual => {
                        info!(
                            "{} still holds {} tokens, returning to sell queue",
                            address, balance
                        );
                        self.store
                            .update_record(&address, |r| r.reopen())
                            .await?;
                    }
                },
                Err(e) => {
                    warn!("Drain check exhausted for {}: {}", address, e);
                    self.store
                        .update_record(&address, |r| r.completed = Some(Completion::error()))
                        .await?;
                }
            }
            report.changed_one();
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::ProvisionOutcome;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::TempDir;

    pub(crate) struct BalanceTable {
        pub balances: HashMap<String, f64>,
        pub calls: RefCell<usize>,
    }

    #[async_trait(?Send)]
    impl WalletGateway for BalanceTable {
        async fn native_balance(&self) -> Result<f64, CoreError> {
            Ok(10.0)
        }
        async fn create_token_account(&self, _mint: &str) -> Result<ProvisionOutcome, CoreError> {
            Ok(ProvisionOutcome::Created)
        }
        async fn token_balance(&self, mint: &str) -> Result<f64, CoreError> {
            *self.calls.borrow_mut() += 1;
            self.balances
                .get(mint)
                .copied()
                .ok_or_else(|| CoreError::WalletCommand("no account".to_string()))
        }
        async fn wrap_sol(&self, _amount_sol: f64) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn fast_settings() -> Settings {
        let mut s = crate::settings::tests::minimal();
        s.balance_retry_attempts = 2;
        s.balance_retry_delay_secs = 0;
        s.command_timeout_secs = 1;
        s
    }

    fn bought(addr: &str) -> AddressRecord {
        let mut r = AddressRecord::new(addr.to_string(), 6, 100);
        r.mark_walleted();
        r.mark_bought(200).unwrap();
        r
    }

    fn sold(addr: &str) -> AddressRecord {
        let mut r = bought(addr);
        r.balance = Some(TokenBalance::Amount(500.0));
        r.mark_sold(300).unwrap();
        r
    }

    #[tokio::test]
    async fn balance_filled_exactly_once() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        store.save(&[bought("mintA")]).await.unwrap();

        let wallet = Arc::new(BalanceTable {
            balances: HashMap::from([("mintA".to_string(), 512.0)]),
            calls: RefCell::new(0),
        });
        let stage = BalanceAudit::new(wallet.clone(), store.clone(), &fast_settings());

        let report = stage.run().await.unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(
            store.load().await.unwrap()[0].numeric_balance(),
            Some(512.0)
        );
        assert_eq!(*wallet.calls.borrow(), 1);

        // Second pass: nothing left to fill, no extra query.
        let report = stage.run().await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(*wallet.calls.borrow(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_set_error_sentinel() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        store.save(&[bought("mintA")]).await.unwrap();

        let wallet = Arc::new(BalanceTable {
            balances: HashMap::new(),
            calls: RefCell::new(0),
        });
        let stage = BalanceAudit::new(wallet.clone(), store.clone(), &fast_settings());
        stage.run().await.unwrap();

        let rec = &store.load().await.unwrap()[0];
        assert!(rec.balance.as_ref().unwrap().is_error());
        assert_eq!(*wallet.calls.borrow(), 2); // both attempts spent
    }

    #[test]
    fn drain_cutoff_boundary() {
        assert_eq!(resolve_drain(0.0), DrainOutcome::Drained);
        assert_eq!(resolve_drain(0.999), DrainOutcome::Drained);
        assert_eq!(resolve_drain(1.0), DrainOutcome::Residual);
        assert_eq!(resolve_drain(250.0), DrainOutcome::Residual);
    }

    #[tokio::test]
    async fn drained_position_completes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        store.save(&[sold("mintA")]).await.unwrap();

        let wallet = Arc::new(BalanceTable {
            balances: HashMap::from([("mintA".to_string(), 0.2)]),
            calls: RefCell::new(0),
        });
        DrainAudit::new(wallet, store.clone(), &fast_settings())
            .run()
            .await
            .unwrap();

        let rec = &store.load().await.unwrap()[0];
        assert!(rec.completed.as_ref().unwrap().is_done());
        assert!(rec.reversed);
    }

    #[tokio::test]
    async fn residual_position_reopens() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        store.save(&[sold("mintA")]).await.unwrap();

        let wallet = Arc::new(BalanceTable {
            balances: HashMap::from([("mintA".to_string(), 37.0)]),
            calls: RefCell::new(0),
        });
        DrainAudit::new(wallet, store.clone(), &fast_settings())
            .run()
            .await
            .unwrap();

        let rec = &store.load().await.unwrap()[0];
        assert!(!rec.reversed);
        assert!(rec.reversed_at.is_none());
        assert!(rec.completed.is_none());
        // balance cleared so the accountant re-measures before reselling
        assert!(rec.balance.is_none());
    }

    #[tokio::test]
    async fn completed_records_are_left_alone() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        let mut rec = sold("mintA");
        rec.mark_completed();
        store.save(&[rec]).await.unwrap();

        let wallet = Arc::new(BalanceTable {
            balances: HashMap::new(),
            calls: RefCell::new(0),
        });
        let report = DrainAudit::new(wallet.clone(), store.clone(), &fast_settings())
            .run()
            .await
            .unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(*wallet.calls.borrow(), 0);
    }
}
