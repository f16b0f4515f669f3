// Pruner: drop stale unused records and drained used ones.

use crate::error::CoreError;
use crate::models::AddressRecord;
use crate::settings::Settings;
use crate::stages::{Stage, StageReport};
use crate::store::AddressStore;
use async_trait::async_trait;
use chrono::Utc;
use log::info;
use std::sync::Arc;

/// Keep a record unless it is unused and older than the age limit, or
/// used with a zero balance. A used record is never removed by age alone.
pub fn should_retain(record: &AddressRecord, now: i64, max_age_secs: i64) -> bool {
    let stale = now - record.scanned_at > max_age_secs;
    if !record.used && stale {
        return false;
    }
    if record.used && record.numeric_balance() == Some(0.0) {
        return false;
    }
    true
}

pub struct PrunerService {
    store: Arc<AddressStore>,
    settings: Arc<Settings>,
}

impl PrunerService {
    pub fn new(store: Arc<AddressStore>, settings: Arc<Settings>) -> Self {
        Self { store, settings }
    }
}

#[async_trait(?Send)]
impl Stage for PrunerService {
    fn name(&self) -> &'static str {
        "pruner"
    }

    async fn run(&self) -> Result<StageReport, CoreError> {
        let now = Utc::now().timestamp();
        let max_age_secs = self.settings.cleaner_time_minutes * 60;

        let (before, after) = self
            .store
            .update(|records| {
                let before = records.len();
                records.retain(|r| should_retain(r, now, max_age_secs));
                (before, records.len())
            })
            .await?;

        let mut report = StageReport::default();
        report.examined(before);
        report.changed += before - after;
        if before != after {
            info!("Pruner removed {} of {} records", before - after, before);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenBalance;
    use tempfile::TempDir;

    const TEN_MINUTES: i64 = 600;

    fn scanned_at(addr: &str, at: i64) -> AddressRecord {
        AddressRecord::new(addr.to_string(), 6, at)
    }

    #[test]
    fn stale_unused_records_are_dropped() {
        let now = 1_700_000_000;
        let stale = scanned_at("old", now - 601);
        let fresh = scanned_at("new", now - 599);
        assert!(!should_retain(&stale, now, TEN_MINUTES));
        assert!(should_retain(&fresh, now, TEN_MINUTES));
    }

    #[test]
    fn used_records_never_expire_by_age() {
        let now = 1_700_000_000;
        let mut rec = scanned_at("held", now - 1_000_000);
        rec.mark_walleted();
        rec.mark_bought(now - 999_000).unwrap();
        rec.balance = Some(TokenBalance::Amount(250.0));
        assert!(should_retain(&rec, now, TEN_MINUTES));
    }

    #[test]
    fn drained_used_records_are_dropped() {
        let now = 1_700_000_000;
        let mut rec = scanned_at("drained", now - 100);
        rec.mark_walleted();
        rec.mark_bought(now - 50).unwrap();
        rec.balance = Some(TokenBalance::Amount(0.0));
        assert!(!should_retain(&rec, now, TEN_MINUTES));

        // an errored balance is not a zero balance
        rec.balance = Some(TokenBalance::error());
        assert!(should_retain(&rec, now, TEN_MINUTES));
    }

    #[tokio::test]
    async fn prune_pass_rewrites_the_store() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AddressStore::new(dir.path().join("addresses.json")));
        let now = Utc::now().timestamp();

        let mut drained = scanned_at("drained", now);
        drained.mark_walleted();
        drained.mark_bought(now).unwrap();
        drained.balance = Some(TokenBalance::Amount(0.0));

        store
            .save(&[
                scanned_at("stale", now - 10_000),
                scanned_at("fresh", now),
                drained,
            ])
            .await
            .unwrap();

        let settings = Arc::new(crate::settings::tests::minimal());
        let report = PrunerService::new(store.clone(), settings)
            .run()
            .await
            .unwrap();
        assert_eq!(report.examined, 3);
        assert_eq!(report.changed, 2);

        let remaining = store.load().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].address, "fresh");
    }
}
