use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// Sentinel written to `balance` when every balance query attempt failed.
pub const BALANCE_ERROR: &str = "Error";
/// Sentinel written to `OGpriceUSD` when the price source had no quote.
pub const PRICE_NOT_FOUND: &str = "Price not found";
/// Sentinel written to `completed` when the drain audit gave up.
pub const COMPLETED_ERROR: &str = "Error";

/// Last polled token balance: a number, or the `"Error"` marker after
/// retry exhaustion. Untagged so the mixed wire format round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenBalance {
    Amount(f64),
    Failed(String),
}

impl TokenBalance {
    pub fn error() -> Self {
        TokenBalance::Failed(BALANCE_ERROR.to_string())
    }

    pub fn amount(&self) -> Option<f64> {
        match self {
            TokenBalance::Amount(v) => Some(*v),
            TokenBalance::Failed(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TokenBalance::Failed(_))
    }
}

/// A USD price, or the `"Price not found"` marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceField {
    Usd(f64),
    NotFound(String),
}

impl PriceField {
    pub fn not_found() -> Self {
        PriceField::NotFound(PRICE_NOT_FOUND.to_string())
    }

    pub fn usd(&self) -> Option<f64> {
        match self {
            PriceField::Usd(v) => Some(*v),
            PriceField::NotFound(_) => None,
        }
    }
}

/// Drain-audit outcome: a boolean, or the `"Error"` marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Completion {
    Flag(bool),
    Failed(String),
}

impl Completion {
    pub fn error() -> Self {
        Completion::Failed(COMPLETED_ERROR.to_string())
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Completion::Flag(true))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Completion::Failed(_))
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One tracked token mint, wire-compatible with the `addresses.json`
/// array format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub address: String,
    #[serde(default)]
    pub decimals: u8,
    #[serde(default)]
    pub used: bool,
    #[serde(rename = "usedAt", default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<i64>,
    #[serde(default)]
    pub reversed: bool,
    #[serde(rename = "reversedAt", default, skip_serializing_if = "Option::is_none")]
    pub reversed_at: Option<i64>,
    #[serde(default)]
    pub wallet: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<TokenBalance>,
    #[serde(rename = "OGpriceUSD", default, skip_serializing_if = "Option::is_none")]
    pub og_price_usd: Option<PriceField>,
    #[serde(rename = "priceUSD", default, skip_serializing_if = "Option::is_none")]
    pub price_usd: Option<f64>,
    #[serde(rename = "priceMeasuredAt", default, skip_serializing_if = "Option::is_none")]
    pub price_measured_at: Option<i64>,
    #[serde(rename = "changeLimit", default)]
    pub change_limit: bool,
    #[serde(rename = "changePositiveLimit", default)]
    pub change_positive_limit: bool,
    #[serde(rename = "changeNegativeLimit", default)]
    pub change_negative_limit: bool,
    #[serde(rename = "scannedAt", default)]
    pub scanned_at: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<Completion>,
}

/// Lifecycle position derived from the record flags. `Ignored` and
/// `Failed` are absorbing: the pipeline stops advancing such records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Scanned,
    Walleted,
    Bought,
    Sold,
    Completed,
    Ignored,
    Failed,
}

impl AddressRecord {
    /// Fresh record as created at discovery time.
    pub fn new(address: String, decimals: u8, now: i64) -> Self {
        Self {
            address,
            decimals,
            used: false,
            used_at: None,
            reversed: false,
            reversed_at: None,
            wallet: false,
            balance: None,
            og_price_usd: None,
            price_usd: None,
            price_measured_at: None,
            change_limit: false,
            change_positive_limit: false,
            change_negative_limit: false,
            scanned_at: now,
            ignore: false,
            completed: None,
        }
    }

    pub fn stage(&self) -> LifecycleStage {
        if self.ignore {
            return LifecycleStage::Ignored;
        }
        if self.completed.as_ref().is_some_and(|c| c.is_error())
            || self.balance.as_ref().is_some_and(|b| b.is_error())
        {
            return LifecycleStage::Failed;
        }
        if self.completed.as_ref().is_some_and(|c| c.is_done()) {
            return LifecycleStage::Completed;
        }
        if self.reversed {
            LifecycleStage::Sold
        } else if self.used {
            LifecycleStage::Bought
        } else if self.wallet {
            LifecycleStage::Walleted
        } else {
            LifecycleStage::Scanned
        }
    }

    /// Whether automated processing may still advance this record.
    pub fn is_active(&self) -> bool {
        !matches!(
            self.stage(),
            LifecycleStage::Ignored | LifecycleStage::Failed | LifecycleStage::Completed
        )
    }

    pub fn numeric_balance(&self) -> Option<f64> {
        self.balance.as_ref().and_then(|b| b.amount())
    }

    /// The on-chain token account exists.
    pub fn mark_walleted(&mut self) {
        self.wallet = true;
    }

    /// A buy transaction confirmed. Sets `used` and `used_at` together so
    /// the two fields can never disagree.
    pub fn mark_bought(&mut self, now: i64) -> Result<(), CoreError> {
        if !self.wallet {
            return Err(CoreError::InvalidState(format!(
                "{}: cannot buy before the token account exists",
                self.address
            )));
        }
        if self.used {
            return Err(CoreError::InvalidState(format!(
                "{}: already bought",
                self.address
            )));
        }
        self.used = true;
        self.used_at = Some(now);
        Ok(())
    }

    /// A sell transaction confirmed.
    pub fn mark_sold(&mut self, now: i64) -> Result<(), CoreError> {
        if !self.used || self.reversed {
            return Err(CoreError::InvalidState(format!(
                "{}: sell requires a bought, unsold record",
                self.address
            )));
        }
        self.reversed = true;
        self.reversed_at = Some(now);
        Ok(())
    }

    /// The sold position drained below the cutoff.
    pub fn mark_completed(&mut self) {
        self.completed = Some(Completion::Flag(true));
    }

    /// The sell left a residual balance; put the record back in the sell
    /// queue. Clears `reversed_at` so it is only set while `reversed` is.
    pub fn reopen(&mut self) {
        self.reversed = false;
        self.reversed_at = None;
        self.balance = None;
    }
}

/// One token surfaced by the discovery feed.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenCandidate {
    pub address: String,
    pub decimals: u8,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub volume_1h: f64,
    pub liquidity: f64,
    pub market_cap: Option<f64>,
    pub price_usd: f64,
    pub high_24h: Option<f64>,
    pub boosts: Option<u64>,
    pub exchanges: Vec<String>,
}

/// Capital available for trading, persisted between the treasury and buy
/// stages as `current_capital.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapitalSnapshot {
    pub lamports: u64,
}
