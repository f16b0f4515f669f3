use crate::error::CoreError;
use serde::{Deserialize, Serialize};

use base64::{engine::general_purpose::STANDARD as Base64Engine, Engine};

/// How the buy stage sizes a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountType {
    /// Fixed lamport amount per trade.
    Static,
    /// Percentage of the recorded capital snapshot.
    Dynamic,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub solana_rpc_urls: Vec<String>,
    #[serde(default = "default_discovery_url")]
    pub discovery_url: String,
    #[serde(default = "default_swap_host")]
    pub swap_host: String,
    #[serde(default = "default_swap_fee_url")]
    pub swap_fee_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub wallet_keypair_path: Option<String>,
    #[serde(default)]
    pub wallet_private_key_string: Option<String>,

    // Scanner filters
    #[serde(default = "default_scan_window_secs")]
    pub scan_window_secs: i64,
    #[serde(default = "default_min_volume_1h")]
    pub min_volume_1h: f64,
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: f64,
    #[serde(default = "default_min_price_usd")]
    pub min_price_usd: f64,
    #[serde(default = "default_max_price_vs_high_ratio")]
    pub max_price_vs_high_ratio: f64,
    #[serde(default = "default_min_boosts")]
    pub min_boosts: u64,
    #[serde(default = "default_max_boosts")]
    pub max_boosts: u64,
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
    #[serde(default = "default_exchange_address")]
    pub exchange_address: String,
    #[serde(default = "default_network_id")]
    pub network_id: u64,

    // Treasury
    #[serde(default)]
    pub reserve_sol: f64,

    // Buyer
    #[serde(default = "default_amount_type")]
    pub amount_type: AmountType,
    #[serde(default = "default_static_amount_lamports")]
    pub static_amount_lamports: u64,
    #[serde(default = "default_percentage_to_use")]
    pub percentage_to_use: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u64,
    #[serde(default = "default_inter_trade_delay_secs")]
    pub inter_trade_delay_secs: u64,

    // Seller
    #[serde(default = "default_min_holding_secs")]
    pub min_holding_secs: i64,
    #[serde(default = "default_wrap_amount_sol")]
    pub wrap_amount_sol: f64,

    // Price monitor
    #[serde(default = "default_price_change_threshold")]
    pub price_change_threshold: f64,
    #[serde(default)]
    pub positive_price_change_threshold: Option<f64>,
    #[serde(default)]
    pub negative_price_change_threshold: Option<f64>,
    #[serde(default = "default_price_update_interval_secs")]
    pub price_update_interval_secs: i64,

    // Retry policy for wallet CLI queries
    #[serde(default = "default_balance_retry_attempts")]
    pub balance_retry_attempts: u32,
    #[serde(default = "default_balance_retry_delay_secs")]
    pub balance_retry_delay_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    // Pruner
    #[serde(default = "default_cleaner_time_minutes")]
    pub cleaner_time_minutes: i64,

    // Pipeline pacing
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_cycle_delay_secs")]
    pub cycle_delay_secs: u64,
    #[serde(default = "default_rpc_delay_secs")]
    pub rpc_delay_secs: u64,
    #[serde(default = "default_log_rotate_secs")]
    pub log_rotate_secs: u64,

    // Paths
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Settings {
    pub fn from_file(path: &str) -> Result<Self, CoreError> {
        let builder = config::Config::builder()
            .add_source(config::File::from(std::path::Path::new(path)));
        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Positive deviation threshold in percent; falls back to the legacy
    /// two-sided `price_change_threshold` key.
    pub fn effective_positive_threshold(&self) -> f64 {
        self.positive_price_change_threshold
            .unwrap_or(self.price_change_threshold)
    }

    /// Negative deviation threshold in percent (compared as `<= -threshold`).
    pub fn effective_negative_threshold(&self) -> f64 {
        self.negative_price_change_threshold
            .unwrap_or(self.price_change_threshold)
    }

    /// Validate settings ranges and constraints
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.solana_rpc_urls.is_empty() {
            return Err(CoreError::Validation(
                "solana_rpc_urls must not be empty".to_string(),
            ));
        }
        if self.effective_positive_threshold() <= 0.0 {
            return Err(CoreError::Validation(
                "positive price change threshold must be > 0".to_string(),
            ));
        }
        if self.effective_negative_threshold() <= 0.0 {
            return Err(CoreError::Validation(
                "negative price change threshold must be > 0".to_string(),
            ));
        }
        if self.reserve_sol < 0.0 {
            return Err(CoreError::Validation(
                "reserve_sol must be >= 0".to_string(),
            ));
        }
        if self.amount_type == AmountType::Static && self.static_amount_lamports == 0 {
            return Err(CoreError::Validation(
                "static_amount_lamports must be > 0".to_string(),
            ));
        }
        if self.percentage_to_use <= 0.0 || self.percentage_to_use > 100.0 {
            return Err(CoreError::Validation(
                "percentage_to_use must be in (0, 100]".to_string(),
            ));
        }
        if self.min_boosts > self.max_boosts {
            return Err(CoreError::Validation(
                "max_boosts must be >= min_boosts".to_string(),
            ));
        }
        if self.balance_retry_attempts == 0 {
            return Err(CoreError::Validation(
                "balance_retry_attempts must be > 0".to_string(),
            ));
        }
        if self.cleaner_time_minutes <= 0 {
            return Err(CoreError::Validation(
                "cleaner_time_minutes must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Try to read a base64-encoded keypair from the given env var. Returns
/// the raw decoded bytes if present and valid, otherwise None.
pub fn load_keypair_from_env_var(var: &str) -> Option<Vec<u8>> {
    if let Ok(s) = std::env::var(var) {
        match Base64Engine.decode(&s) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("Failed to decode {}: {}", var, e);
                None
            }
        }
    } else {
        None
    }
}

/// Parse a private key string in various formats:
/// - Base58 (standard Solana format, 88 chars)
/// - JSON array string like "[1,2,3,...]"
/// - Comma-separated bytes like "1,2,3,..."
pub fn parse_private_key_string(s: &str) -> Result<Vec<u8>, String> {
    let trimmed = s.trim();

    // Try base58 first (most common format)
    if trimmed.len() >= 80 && !trimmed.starts_with('[') && !trimmed.contains(',') {
        return bs58::decode(trimmed)
            .into_vec()
            .map_err(|e| format!("Base58 decode failed: {}", e));
    }

    // Try JSON array format: [1,2,3,...]
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<u8>>(trimmed)
            .map_err(|e| format!("JSON parse failed: {}", e));
    }

    // Try comma-separated format: 1,2,3,...
    if trimmed.contains(',') {
        let parts: Result<Vec<u8>, _> = trimmed
            .split(',')
            .map(|s| s.trim().parse::<u8>())
            .collect();
        return parts.map_err(|e| format!("CSV parse failed: {}", e));
    }

    Err("Unrecognized private key format. Expected: base58, JSON array, or comma-separated bytes".to_string())
}

fn default_discovery_url() -> String { "https://graph.defined.fi/graphql".to_string() }
fn default_swap_host() -> String { "https://transaction-v1.raydium.io".to_string() }
fn default_swap_fee_url() -> String { "https://api-v3.raydium.io/main/auto-fee".to_string() }
fn default_scan_window_secs() -> i64 { 300 }
fn default_min_volume_1h() -> f64 { 100_000.0 }
fn default_min_liquidity() -> f64 { 100_000.0 }
fn default_min_price_usd() -> f64 { 0.03 }
fn default_max_price_vs_high_ratio() -> f64 { 1.0 }
fn default_min_boosts() -> u64 { 500 }
fn default_max_boosts() -> u64 { 5000 }
fn default_scan_limit() -> usize { 5 }
fn default_exchange_address() -> String { "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8".to_string() }
fn default_network_id() -> u64 { 1_399_811_149 }
fn default_amount_type() -> AmountType { AmountType::Static }
fn default_static_amount_lamports() -> u64 { 170_000_000 }
fn default_percentage_to_use() -> f64 { 50.0 }
fn default_slippage_bps() -> u64 { 500 }
fn default_inter_trade_delay_secs() -> u64 { 5 }
fn default_min_holding_secs() -> i64 { 60 }
fn default_wrap_amount_sol() -> f64 { 0.0005 }
fn default_price_change_threshold() -> f64 { 100.0 }
fn default_price_update_interval_secs() -> i64 { 45 }
fn default_balance_retry_attempts() -> u32 { 3 }
fn default_balance_retry_delay_secs() -> u64 { 10 }
fn default_command_timeout_secs() -> u64 { 10 }
fn default_cleaner_time_minutes() -> i64 { 10 }
fn default_stage_timeout_secs() -> u64 { 120 }
fn default_cycle_delay_secs() -> u64 { 1 }
fn default_rpc_delay_secs() -> u64 { 2 }
fn default_log_rotate_secs() -> u64 { 300 }
fn default_data_dir() -> String { "data".to_string() }
fn default_log_dir() -> String { "activity_log".to_string() }

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn minimal() -> Settings {
        serde_json::from_str(
            r#"{
                "solana_rpc_urls": ["https://api.mainnet-beta.solana.com"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_fill_missing_keys() {
        let s = minimal();
        assert_eq!(s.min_boosts, 500);
        assert_eq!(s.max_boosts, 5000);
        assert_eq!(s.price_update_interval_secs, 45);
        assert_eq!(s.cleaner_time_minutes, 10);
        assert_eq!(s.amount_type, AmountType::Static);
        assert_eq!(s.balance_retry_attempts, 3);
        s.validate().unwrap();
    }

    #[test]
    fn threshold_fallback_uses_legacy_key() {
        let mut s = minimal();
        s.price_change_threshold = 40.0;
        assert_eq!(s.effective_positive_threshold(), 40.0);
        assert_eq!(s.effective_negative_threshold(), 40.0);

        s.positive_price_change_threshold = Some(10.0);
        s.negative_price_change_threshold = Some(20.0);
        assert_eq!(s.effective_positive_threshold(), 10.0);
        assert_eq!(s.effective_negative_threshold(), 20.0);
    }

    #[test]
    fn amount_type_parses_lowercase() {
        let s: Settings = serde_json::from_str(
            r#"{
                "solana_rpc_urls": ["u"],
                "amount_type": "dynamic",
                "percentage_to_use": 25.0
            }"#,
        )
        .unwrap();
        assert_eq!(s.amount_type, AmountType::Dynamic);
        assert_eq!(s.percentage_to_use, 25.0);
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let mut s = minimal();
        s.percentage_to_use = 0.0;
        assert!(s.validate().is_err());

        let mut s = minimal();
        s.min_boosts = 10_000;
        assert!(s.validate().is_err());

        let mut s = minimal();
        s.reserve_sol = -1.0;
        assert!(s.validate().is_err());

        let mut s = minimal();
        s.solana_rpc_urls.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn private_key_formats_parse() {
        let json_form = "[1,2,3,4]";
        assert_eq!(parse_private_key_string(json_form).unwrap(), vec![1, 2, 3, 4]);

        let csv_form = "5, 6, 7";
        assert_eq!(parse_private_key_string(csv_form).unwrap(), vec![5, 6, 7]);

        assert!(parse_private_key_string("not-a-key").is_err());
    }
}
