// =============================================================================
// Bulk-load REST client - full snapshots and candle histories
// =============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::types::{Candle, MarketSnapshot, SymbolInfo, Timeframe};

/// REST client for the gateway's bulk-load endpoints, consumed by the market
/// store on initial load or explicit reload.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SymbolsResponse {
    symbols: Vec<SymbolInfo>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// GET /api/v1/market/{symbol} - full market snapshot.
    pub async fn market_data(&self, symbol: &str) -> Result<MarketSnapshot> {
        let url = format!(
            "{}/api/v1/market/{}",
            self.base_url.trim_end_matches('/'),
            symbol
        );
        let snapshot: MarketSnapshot = self.get_json(&url).await?;
        debug!(symbol = %snapshot.symbol, price = snapshot.price, "market snapshot loaded");
        Ok(snapshot)
    }

    /// GET /api/v1/market/{symbol}/klines - ordered candle list, oldest first.
    pub async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v1/market/{}/klines?interval={}&limit={}",
            self.base_url.trim_end_matches('/'),
            symbol,
            timeframe,
            limit
        );
        let candles: Vec<Candle> = self.get_json(&url).await?;
        debug!(symbol = %symbol, timeframe = %timeframe, count = candles.len(), "klines loaded");
        Ok(candles)
    }

    /// GET /api/v1/symbols - known symbol metadata.
    pub async fn symbols(&self) -> Result<Vec<SymbolInfo>> {
        let url = format!("{}/api/v1/symbols", self.base_url.trim_end_matches('/'));
        let response: SymbolsResponse = self.get_json(&url).await?;
        Ok(response.symbols)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GET {url} returned {status}: {body}");
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("failed to parse response from {url}"))
    }
}
