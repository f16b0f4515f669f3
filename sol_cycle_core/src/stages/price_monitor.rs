// Price monitoring: record the purchase-time price once, poll the rolling
// price, and latch the deviation limit flags.

use crate::discovery::DiscoveryClient;
use crate::error::CoreError;
use crate::models::{AddressRecord, PriceField};
use crate::settings::Settings;
use crate::stages::{Stage, StageReport};
use crate::store::AddressStore;
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceChangeVerdict {
    Within,
    Positive(f64),
    Negative(f64),
}

/// Percentage deviation of `current` from `original`, classified against
/// the two one-sided thresholds (both given as positive percentages).
pub fn evaluate_price_change(
    original: f64,
    current: f64,
    positive_threshold: f64,
    negative_threshold: f64,
) -> PriceChangeVerdict {
    if original == 0.0 {
        return PriceChangeVerdict::Within;
    }
    let deviation = ((current - original) / original) * 100.0;
    if deviation >= positive_threshold {
        PriceChangeVerdict::Positive(deviation)
    } else if deviation <= -negative_threshold {
        PriceChangeVerdict::Negative(deviation)
    } else {
        PriceChangeVerdict::Within
    }
}

fn tracked(record: &AddressRecord) -> bool {
    record.used && !record.reversed && !record.ignore
}

fn price_is_stale(record: &AddressRecord, now: i64, interval: i64) -> bool {
    match record.price_measured_at {
        Some(at) => now - at >= interval,
        None => true,
    }
}

pub struct PriceMonitorService {
    discovery: Arc<dyn DiscoveryClient>,
    store: Arc<AddressStore>,
    settings: Arc<Settings>,
}

impl PriceMonitorService {
    pub fn new(
        discovery: Arc<dyn DiscoveryClient>,
        store: Arc<AddressStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            discovery,
            store,
            settings,
        }
    }
}

#[async_trait(?Send)]
impl Stage for PriceMonitorService {
    fn name(&self) -> &'static str {
        "price-monitor"
    }

    async fn run(&self) -> Result<StageReport, CoreError> {
        let now = Utc::now().timestamp();
        let interval = self.settings.price_update_interval_secs;
        let records = self.store.load().await?;

        let mut report = StageReport::default();

        for record in records.iter().filter(|r| tracked(r)) {
            report.examined(1);
            let address = record.address.clone();

            // Purchase-time price, recorded once and never overwritten.
            // Limited records keep whatever they latched with.
            if record.og_price_usd.is_none() && !record.change_limit {
                let field = match self.discovery.token_price(&address).await {
                    Ok(Some(price)) => PriceField::Usd(price),
                    Ok(None) => PriceField::not_found(),
                    Err(e) => {
                        warn!("Initial price lookup failed for {}: {}", address, e);
                        PriceField::not_found()
                    }
                };
                self.store
                    .update_record(&address, |r| r.og_price_usd = Some(field))
                    .await?;
                report.changed_one();
            }

            // Rolling price, rate limited per record. A latched record is
            // done: the limit flags gate any further polling.
            if !record.change_limit && price_is_stale(record, now, interval) {
                match self.discovery.token_price(&address).await {
                    Ok(Some(price)) => {
                        self.store
                            .update_record(&address, |r| {
                                r.price_usd = Some(price);
                                r.price_measured_at = Some(now);
                            })
                            .await?;
                        report.changed_one();
                    }
                    Ok(None) => info!("No price quote for {}", address),
                    Err(e) => warn!("Price poll failed for {}: {}", address, e),
                }
            }
        }

        // Threshold evaluation over the refreshed store.
        let positive = self.settings.effective_positive_threshold();
        let negative = self.settings.effective_negative_threshold();
        let changed = self
            .store
            .update(|records| {
                let mut latched = 0;
                for r in records.iter_mut().filter(|r| tracked(r) && !r.change_limit) {
                    let (og, current) = match (
                        r.og_price_usd.as_ref().and_then(|p| p.usd()),
                        r.price_usd,
                    ) {
                        (Some(og), Some(current)) => (og, current),
                        _ => continue,
                    };
                    match evaluate_price_change(og, current, positive, negative) {
                        PriceChangeVerdict::Positive(pct) => {
                            info!(
                                "{} crossed the positive limit ({:.2}% >= {}%)",
                                r.address, pct, positive
                            );
                            r.change_positive_limit = true;
                            r.change_limit = true;
                            latched += 1;
                        }
                        PriceChangeVerdict::Negative(pct) => {
                            info!(
                                "{} crossed the negative limit ({:.2}% <= -{}%)",
                                r.address, pct, negative
                            );
                            r.change_negative_limit = true;
                            r.change_limit = true;
                            latched += 1;
                        }
                        PriceChangeVerdict::Within => {}
                    }
                }
                latched
            })
            .await?;
        report.changed += changed;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ScanFilters;
    use crate::models::TokenCandidate;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::TempDir;

    pub(crate) struct PriceTable {
        pub prices: RefCell<HashMap<String, f64>>,
    }

    #[async_trait(?Send)]
    impl DiscoveryClient for PriceTable {
        async fn filter_tokens(
            &self,
            _filters: &ScanFilters,
        ) -> Result<Vec<TokenCandidate>, CoreError> {
            Ok(vec![])
        }
        async fn token_price(&self, address: &str) -> Result<Option<f64>, CoreError> {
            Ok(self.prices.borrow().get(address).copied())
        }
    }

    fn settings(pos: f64, neg: f64) -> Arc<Settings> {
        let mut s = crate::settings::tests::minimal();
        s.positive_price_change_threshold = Some(pos);
        s.negative_price_change_threshold = Some(neg);
        s.price_update_interval_secs = 0;
        Arc::new(s)
    }

    fn bought(addr: &str) -> AddressRecord {
        let mut r = AddressRecord::new(addr.to_string(), 6, 100);
        r.mark_walleted();
        r.mark_bought(200).unwrap();
        r
    }

    #[test]
    fn eleven_percent_crosses_a_ten_percent_limit() {
        match evaluate_price_change(100.0, 111.0, 10.0, 10.0) {
            PriceChangeVerdict::Positive(pct) => assert!((pct - 11.0).abs() < 1e-9),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn five_percent_drop_stays_within_a_ten_percent_limit() {
        assert_eq!(
            evaluate_price_change(100.0, 95.0, 10.0, 10.0),
            PriceChangeVerdict::Within
        );
    }

    #[test]
    fn boundary_is_inclusive_both_sides() {
        assert!(matches!(
            evaluate_price_change(100.0, 110.0, 10.0, 10.0),
            PriceChangeVerdict::Positive(_)
        ));
        assert!(matches!(
            evaluate_price_change(100.0, 90.0, 10.0, 10.0),
            PriceChangeVerdict::Negative(_)
        ));
        assert_eq!(
            evaluate_price_change(0.0, 90.0, 10.0, 10.0),
            PriceChangeVerdict::Within
        );
    }

    #[tokio::test]
    async fn og_price_recorded_once_then_limits_latch() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        store.save(&[bought("mintA")]).await.unwrap();

        let discovery = Arc::new(PriceTable {
            prices: RefCell::new(HashMap::from([("mintA".to_string(), 0.01)])),
        });
        let stage = PriceMonitorService::new(discovery.clone(), store.clone(), settings(10.0, 10.0));

        stage.run().await.unwrap();
        let rec = &store.load().await.unwrap()[0];
        assert_eq!(rec.og_price_usd.as_ref().unwrap().usd(), Some(0.01));
        assert_eq!(rec.price_usd, Some(0.01));
        assert!(!rec.change_limit);

        // 20% rise crosses the 10% positive limit.
        discovery
            .prices
            .borrow_mut()
            .insert("mintA".to_string(), 0.012);
        stage.run().await.unwrap();
        let rec = &store.load().await.unwrap()[0];
        assert_eq!(rec.og_price_usd.as_ref().unwrap().usd(), Some(0.01)); // unchanged
        assert_eq!(rec.price_usd, Some(0.012));
        assert!(rec.change_positive_limit);
        assert!(rec.change_limit);
        assert!(!rec.change_negative_limit);
    }

    #[tokio::test]
    async fn latched_records_are_not_reevaluated() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        let mut rec = bought("mintA");
        rec.og_price_usd = Some(PriceField::Usd(0.01));
        rec.price_usd = Some(0.02);
        rec.change_limit = true;
        rec.change_positive_limit = true;
        store.save(&[rec]).await.unwrap();

        let discovery = Arc::new(PriceTable {
            prices: RefCell::new(HashMap::from([("mintA".to_string(), 0.001)])),
        });
        PriceMonitorService::new(discovery, store.clone(), settings(10.0, 10.0))
            .run()
            .await
            .unwrap();

        let rec = &store.load().await.unwrap()[0];
        // still limited positively; the crash after latching changes nothing
        assert!(!rec.change_negative_limit);
        assert!(rec.change_limit);
        // polling stopped once the limit latched
        assert_eq!(rec.price_usd, Some(0.02));
    }

    #[tokio::test]
    async fn missing_quote_records_sentinel_og_price() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        store.save(&[bought("mintA")]).await.unwrap();

        let discovery = Arc::new(PriceTable {
            prices: RefCell::new(HashMap::new()),
        });
        PriceMonitorService::new(discovery, store.clone(), settings(10.0, 10.0))
            .run()
            .await
            .unwrap();

        let rec = &store.load().await.unwrap()[0];
        assert_eq!(rec.og_price_usd, Some(PriceField::not_found()));
        assert!(rec.price_usd.is_none());
    }

    #[tokio::test]
    async fn fresh_measurements_respect_the_interval() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        let mut rec = bought("mintA");
        rec.og_price_usd = Some(PriceField::Usd(0.01));
        rec.price_usd = Some(0.01);
        rec.price_measured_at = Some(Utc::now().timestamp());
        store.save(&[rec]).await.unwrap();

        let mut s = crate::settings::tests::minimal();
        s.price_update_interval_secs = 3600;
        let discovery = Arc::new(PriceTable {
            prices: RefCell::new(HashMap::from([("mintA".to_string(), 5.0)])),
        });
        PriceMonitorService::new(discovery, store.clone(), Arc::new(s))
            .run()
            .await
            .unwrap();

        // measured moments ago: the 5.0 quote must not have been taken
        assert_eq!(store.load().await.unwrap()[0].price_usd, Some(0.01));
    }
}
