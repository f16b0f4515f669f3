// Token discovery: poll the feed, apply the candidate filters, and hand
// survivors to the security filter.

use crate::discovery::{DiscoveryClient, ScanFilters};
use crate::error::CoreError;
use crate::models::TokenCandidate;
use crate::settings::Settings;
use crate::stages::{Stage, StageReport};
use crate::store::HandoffList;
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Client-side checks the feed cannot express: boost bounds (when the
/// feed reports a boost count) and distance from the 24h high.
pub fn passes_candidate_filters(candidate: &TokenCandidate, settings: &Settings) -> bool {
    if let Some(boosts) = candidate.boosts {
        if boosts < settings.min_boosts || boosts > settings.max_boosts {
            return false;
        }
    }
    if let Some(high) = candidate.high_24h {
        if high > 0.0 && candidate.price_usd > settings.max_price_vs_high_ratio * high {
            return false;
        }
    }
    true
}

pub struct ScanService {
    discovery: Arc<dyn DiscoveryClient>,
    current_list: HandoffList,
    scanlog_dir: PathBuf,
    settings: Arc<Settings>,
}

impl ScanService {
    pub fn new(
        discovery: Arc<dyn DiscoveryClient>,
        current_list: HandoffList,
        scanlog_dir: PathBuf,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            discovery,
            current_list,
            scanlog_dir,
            settings,
        }
    }

    fn filters(&self, now: i64) -> ScanFilters {
        ScanFilters {
            created_after: now - self.settings.scan_window_secs,
            min_volume_1h: self.settings.min_volume_1h,
            min_liquidity: self.settings.min_liquidity,
            min_price_usd: self.settings.min_price_usd,
            exchange_address: self.settings.exchange_address.clone(),
            network_id: self.settings.network_id,
            limit: self.settings.scan_limit,
        }
    }

    fn write_scan_report(dir: &Path, candidates: &[TokenCandidate]) {
        if candidates.is_empty() {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(dir) {
            error!("Failed to create scan log directory: {}", e);
            return;
        }
        let stamp = Utc::now().format("%Y-%m-%d--%H-%M-%S");
        let path = dir.join(format!("TokenResults_{}.txt", stamp));
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(mut f) => {
                for c in candidates {
                    let _ = writeln!(
                        f,
                        "{} ({}) price_usd={} volume_1h={} liquidity={} high_24h={:?} exchanges={}",
                        c.address,
                        c.symbol.as_deref().unwrap_or("?"),
                        c.price_usd,
                        c.volume_1h,
                        c.liquidity,
                        c.high_24h,
                        c.exchanges.join(",")
                    );
                }
            }
            Err(e) => error!("Failed to open scan report {:?}: {}", path, e),
        }
    }
}

#[async_trait(?Send)]
impl Stage for ScanService {
    fn name(&self) -> &'static str {
        "scanner"
    }

    async fn run(&self) -> Result<StageReport, CoreError> {
        let now = Utc::now().timestamp();
        let candidates = self.discovery.filter_tokens(&self.filters(now)).await?;

        let mut report = StageReport::default();
        report.examined(candidates.len());

        let accepted: Vec<TokenCandidate> = candidates
            .into_iter()
            .filter(|c| passes_candidate_filters(c, &self.settings))
            .collect();

        let entries: Vec<(String, u8)> = accepted
            .iter()
            .map(|c| (c.address.clone(), c.decimals))
            .collect();
        let added = self.current_list.merge(&entries).await?;
        report.changed += added;

        Self::write_scan_report(&self.scanlog_dir, &accepted);
        info!(
            "Scanner: {} candidates from feed, {} accepted, {} new",
            report.examined, accepted.len(), added
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> TokenCandidate {
        TokenCandidate {
            address: "mintA".to_string(),
            decimals: 6,
            name: None,
            symbol: None,
            volume_1h: 150_000.0,
            liquidity: 200_000.0,
            market_cap: None,
            price_usd: 0.04,
            high_24h: Some(0.05),
            boosts: None,
            exchanges: vec!["Raydium".to_string()],
        }
    }

    #[test]
    fn candidate_without_boost_data_passes_boost_filter() {
        let settings = crate::settings::tests::minimal();
        assert!(passes_candidate_filters(&candidate(), &settings));
    }

    #[test]
    fn boost_bounds_are_enforced() {
        let settings = crate::settings::tests::minimal();
        let mut c = candidate();

        c.boosts = Some(499);
        assert!(!passes_candidate_filters(&c, &settings));

        c.boosts = Some(500);
        assert!(passes_candidate_filters(&c, &settings));

        c.boosts = Some(5001);
        assert!(!passes_candidate_filters(&c, &settings));
    }

    #[test]
    fn price_above_high_ratio_is_rejected() {
        let settings = crate::settings::tests::minimal(); // ratio 1.0
        let mut c = candidate();

        c.price_usd = 0.05;
        assert!(passes_candidate_filters(&c, &settings));

        c.price_usd = 0.051;
        assert!(!passes_candidate_filters(&c, &settings));

        c.high_24h = None;
        assert!(passes_candidate_filters(&c, &settings));
    }
}
