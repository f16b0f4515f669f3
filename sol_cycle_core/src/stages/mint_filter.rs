// Security filter: drop candidates whose mint can freeze holder accounts.

use crate::error::CoreError;
use crate::rpc_client::{fetch_freeze_authority, RpcClient};
use crate::settings::Settings;
use crate::stages::{Stage, StageReport};
use crate::store::{AddressStore, HandoffList};
use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub struct MintFilterService {
    rpc: Arc<dyn RpcClient>,
    current_list: HandoffList,
    secure_list: HandoffList,
    store: Arc<AddressStore>,
    settings: Arc<Settings>,
}

impl MintFilterService {
    pub fn new(
        rpc: Arc<dyn RpcClient>,
        current_list: HandoffList,
        secure_list: HandoffList,
        store: Arc<AddressStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            rpc,
            current_list,
            secure_list,
            store,
            settings,
        }
    }
}

#[async_trait(?Send)]
impl Stage for MintFilterService {
    fn name(&self) -> &'static str {
        "security"
    }

    async fn run(&self) -> Result<StageReport, CoreError> {
        let candidates = self.current_list.load().await?;
        let known: HashSet<String> = self
            .store
            .load()
            .await?
            .into_iter()
            .map(|r| r.address)
            .collect();

        let mut report = StageReport::default();
        let mut survivors: Vec<(String, u8)> = Vec::new();

        for (address, decimals) in candidates {
            if known.contains(&address) {
                continue;
            }
            report.examined(1);

            match fetch_freeze_authority(&address, self.rpc.as_ref()).await {
                Ok(None) => {
                    survivors.push((address, decimals));
                    report.changed_one();
                }
                Ok(Some(authority)) => {
                    info!(
                        "Excluding freezeable mint {} (authority {})",
                        address, authority
                    );
                }
                Err(e) => {
                    // Not added to the store, so a later pass retries it.
                    warn!("Mint lookup failed for {}: {}", address, e);
                }
            }

            tokio::time::sleep(Duration::from_secs(self.settings.rpc_delay_secs)).await;
        }

        // Overwritten every pass: the secure list only carries candidates
        // that have not yet entered the store.
        self.secure_list.save(&survivors).await?;
        info!(
            "Security: {} new candidates checked, {} passed",
            report.examined, report.changed
        );
        Ok(report)
    }
}
