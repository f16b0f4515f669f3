// Token discovery and price feed client (GraphQL).

use crate::error::CoreError;
use crate::models::TokenCandidate;
use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};

/// Server-side filters for a discovery query.
#[derive(Debug, Clone)]
pub struct ScanFilters {
    pub created_after: i64,
    pub min_volume_1h: f64,
    pub min_liquidity: f64,
    pub min_price_usd: f64,
    pub exchange_address: String,
    pub network_id: u64,
    pub limit: usize,
}

#[async_trait(?Send)]
pub trait DiscoveryClient {
    /// Tokens matching the filters, newest listings first.
    async fn filter_tokens(&self, filters: &ScanFilters) -> Result<Vec<TokenCandidate>, CoreError>;

    /// Current USD price for a mint; None when the feed has no quote.
    async fn token_price(&self, address: &str) -> Result<Option<f64>, CoreError>;
}

/// The feed reports numbers inconsistently as JSON numbers or strings.
fn num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Parse a `filterTokens` response body into candidates. Entries missing
/// an address or a price are dropped.
pub fn parse_filter_results(body: &Value) -> Result<Vec<TokenCandidate>, CoreError> {
    let results = body
        .pointer("/data/filterTokens/results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| CoreError::ParseError("Missing filterTokens results".to_string()))?;

    let mut candidates = Vec::new();
    for entry in results {
        let token = match entry.get("token") {
            Some(t) => t,
            None => continue,
        };
        let address = match token.get("address").and_then(|a| a.as_str()) {
            Some(a) => a.to_string(),
            None => continue,
        };
        let price_usd = match entry.get("priceUSD").and_then(num) {
            Some(p) => p,
            None => continue,
        };
        candidates.push(TokenCandidate {
            address,
            decimals: token
                .get("decimals")
                .and_then(|d| d.as_u64())
                .unwrap_or(0) as u8,
            name: token.get("name").and_then(|v| v.as_str()).map(String::from),
            symbol: token.get("symbol").and_then(|v| v.as_str()).map(String::from),
            volume_1h: entry.get("volume1").and_then(num).unwrap_or(0.0),
            liquidity: entry.get("liquidity").and_then(num).unwrap_or(0.0),
            market_cap: entry.get("marketCap").and_then(num),
            price_usd,
            high_24h: entry.get("high1").and_then(num),
            boosts: entry.get("boosts").and_then(|v| v.as_u64()),
            exchanges: entry
                .get("exchanges")
                .and_then(|e| e.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|x| x.get("name").and_then(|n| n.as_str()))
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        });
    }
    Ok(candidates)
}

/// GraphQL client for the Codex token API.
pub struct CodexClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    network_id: u64,
}

impl CodexClient {
    pub fn new(url: String, api_key: String, network_id: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            api_key,
            network_id,
        }
    }

    async fn post_query(&self, query: String) -> Result<Value, CoreError> {
        debug!("Discovery query: {}", query);
        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Authorization", &self.api_key)
            .json(&json!({ "query": query }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Api(format!(
                "discovery API returned {}",
                status
            )));
        }
        let body: Value = response.json().await?;
        if let Some(errors) = body.get("errors") {
            if !errors.is_null() {
                return Err(CoreError::Api(format!("discovery API errors: {}", errors)));
            }
        }
        Ok(body)
    }
}

#[async_trait(?Send)]
impl DiscoveryClient for CodexClient {
    async fn filter_tokens(&self, filters: &ScanFilters) -> Result<Vec<TokenCandidate>, CoreError> {
        let query = format!(
            r#"{{
  filterTokens(
    filters: {{
        createdAt: {{ gte: {created_after} }}
        volume1: {{gte: {min_volume}}}
        liquidity: {{gte: {min_liquidity}}}
        priceUSD: {{gte: {min_price}}}
        exchangeAddress: "{exchange}"
        network: [{network}]
    }}
    limit: {limit}
  ) {{
    results {{
      volume1
      liquidity
      marketCap
      priceUSD
      high1
      exchanges {{
        name
      }}
      token {{
        address
        decimals
        name
        networkId
        symbol
      }}
    }}
  }}
}}"#,
            created_after = filters.created_after,
            min_volume = filters.min_volume_1h,
            min_liquidity = filters.min_liquidity,
            min_price = filters.min_price_usd,
            exchange = filters.exchange_address,
            network = filters.network_id,
            limit = filters.limit,
        );

        let body = self.post_query(query).await?;
        parse_filter_results(&body)
    }

    async fn token_price(&self, address: &str) -> Result<Option<f64>, CoreError> {
        let query = format!(
            r#"{{
    getTokenPrices(
        inputs: [{{ address: "{address}", networkId: {network} }}]
    ) {{
        priceUsd
    }}
}}"#,
            address = address,
            network = self.network_id,
        );

        let body = self.post_query(query).await?;
        let price = body
            .pointer("/data/getTokenPrices/0/priceUsd")
            .and_then(num);
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_number_formats() {
        let body = json!({
            "data": { "filterTokens": { "results": [
                {
                    "volume1": "125000.5",
                    "liquidity": 300000,
                    "marketCap": null,
                    "priceUSD": "0.042",
                    "high1": 0.05,
                    "exchanges": [{ "name": "Raydium" }],
                    "token": {
                        "address": "mintA",
                        "decimals": 6,
                        "name": "Alpha",
                        "networkId": 1399811149u64,
                        "symbol": "ALPHA"
                    }
                },
                {
                    "volume1": 1.0,
                    "priceUSD": 0.5,
                    "token": { "decimals": 9 }
                }
            ]}}
        });

        let candidates = parse_filter_results(&body).unwrap();
        // entry without an address is dropped
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.address, "mintA");
        assert_eq!(c.volume_1h, 125000.5);
        assert_eq!(c.liquidity, 300000.0);
        assert_eq!(c.price_usd, 0.042);
        assert_eq!(c.high_24h, Some(0.05));
        assert!(c.market_cap.is_none());
        assert_eq!(c.exchanges, vec!["Raydium".to_string()]);
    }

    #[test]
    fn malformed_body_is_an_error() {
        let body = json!({ "data": {} });
        assert!(parse_filter_results(&body).is_err());
    }
}
