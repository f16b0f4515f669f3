// Pipeline stages. Each stage reads the shared store, advances the
// records it is responsible for, and reports what it touched.

pub mod scanner;
pub mod mint_filter;
pub mod treasury;
pub mod buy_service;
pub mod balance_audit;
pub mod price_monitor;
pub mod sell_service;
pub mod pruner;

use crate::error::CoreError;
use async_trait::async_trait;

pub use balance_audit::{BalanceAudit, DrainAudit};
pub use buy_service::BuyService;
pub use mint_filter::MintFilterService;
pub use price_monitor::PriceMonitorService;
pub use pruner::PrunerService;
pub use scanner::ScanService;
pub use sell_service::SellService;
pub use treasury::TreasuryService;

/// Worker stages are bounded by the pipeline timeout; trader stages run
/// untimed so an in-flight transaction is never interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Worker,
    Trader,
}

#[derive(Debug, Default, Clone)]
pub struct StageReport {
    pub examined: usize,
    pub changed: usize,
}

impl StageReport {
    pub fn examined(&mut self, n: usize) -> &mut Self {
        self.examined += n;
        self
    }

    pub fn changed_one(&mut self) -> &mut Self {
        self.changed += 1;
        self
    }
}

#[async_trait(?Send)]
pub trait Stage {
    fn name(&self) -> &'static str;

    fn kind(&self) -> StageKind {
        StageKind::Worker
    }

    async fn run(&self) -> Result<StageReport, CoreError>;
}
