// =============================================================================
// Upstream REST client - public market-data endpoints
// =============================================================================
//
// Bulk snapshots, candle history and symbol metadata come from the upstream
// exchange's public REST API; no request signing is involved.
// =============================================================================

use anyhow::{Context, Result};
use tracing::debug;

use crate::protocol::now_ms;
use crate::types::{Candle, MarketSnapshot, SymbolInfo, Timeframe};

/// REST client for the upstream exchange's public market-data endpoints.
#[derive(Clone)]
pub struct UpstreamRestClient {
    base_url: String,
    client: reqwest::Client,
}

impl UpstreamRestClient {
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

    /// GET /api/v3/ticker/24hr - current price and 24h statistics.
    pub async fn ticker_24h(&self, symbol: &str) -> Result<MarketSnapshot> {
        let url = format!(
            "{}/api/v3/ticker/24hr?symbol={}",
            self.base_url,
            symbol.to_uppercase()
        );

        let body = self.get_json(&url).await?;

        let snapshot = MarketSnapshot {
            symbol: body["symbol"]
                .as_str()
                .unwrap_or(symbol)
                .to_uppercase(),
            price: parse_field_f64(&body, "lastPrice")?,
            volume_24h: parse_field_f64(&body, "volume").ok(),
            high_24h: parse_field_f64(&body, "highPrice").ok(),
            low_24h: parse_field_f64(&body, "lowPrice").ok(),
            price_change_24h: parse_field_f64(&body, "priceChange").ok(),
            price_change_percent_24h: parse_field_f64(&body, "priceChangePercent").ok(),
            timestamp: body["closeTime"].as_i64().unwrap_or_else(now_ms),
        };

        debug!(symbol = %snapshot.symbol, price = snapshot.price, "ticker retrieved");
        Ok(snapshot)
    }

    /// GET /api/v3/klines - ordered candle history, oldest first.
    pub async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            timeframe,
            limit
        );

        let body = self.get_json(&url).await?;

        let rows = body
            .as_array()
            .context("klines response is not an array")?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(parse_kline_row(row)?);
        }

        debug!(symbol = %symbol, timeframe = %timeframe, count = candles.len(), "klines retrieved");
        Ok(candles)
    }

    /// GET /api/v3/exchangeInfo - tradable symbol metadata.
    pub async fn exchange_info(&self) -> Result<Vec<SymbolInfo>> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);

        let body = self.get_json(&url).await?;

        let rows = body["symbols"]
            .as_array()
            .context("exchangeInfo response missing 'symbols' array")?;

        let mut infos = Vec::with_capacity(rows.len());
        for row in rows {
            infos.push(SymbolInfo {
                symbol: row["symbol"]
                    .as_str()
                    .context("symbol entry missing 'symbol'")?
                    .to_string(),
                base_asset: row["baseAsset"].as_str().unwrap_or_default().to_string(),
                quote_asset: row["quoteAsset"].as_str().unwrap_or_default().to_string(),
                status: row["status"].as_str().unwrap_or_default().to_string(),
                is_spot_trading_allowed: row["isSpotTradingAllowed"].as_bool().unwrap_or(false),
            });
        }

        Ok(infos)
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response from {url}"))?;

        if !status.is_success() {
            anyhow::bail!("upstream GET {url} returned {status}: {body}");
        }

        Ok(body)
    }
}

/// Parse a single kline REST row:
/// `[openTime, "o", "h", "l", "c", "v", closeTime, "q", n, "V", "Q", ...]`.
fn parse_kline_row(row: &serde_json::Value) -> Result<Candle> {
    let cols = row.as_array().context("kline row is not an array")?;
    if cols.len() < 11 {
        anyhow::bail!("kline row has {} columns, expected at least 11", cols.len());
    }

    Ok(Candle {
        open_time: cols[0].as_i64().context("kline open time missing")?,
        open: parse_value_f64(&cols[1], "open")?,
        high: parse_value_f64(&cols[2], "high")?,
        low: parse_value_f64(&cols[3], "low")?,
        close: parse_value_f64(&cols[4], "close")?,
        volume: parse_value_f64(&cols[5], "volume")?,
        close_time: cols[6].as_i64().context("kline close time missing")?,
        quote_volume: parse_value_f64(&cols[7], "quote_volume")?,
        trades: cols[8].as_u64().context("kline trade count missing")?,
        taker_buy_base_volume: parse_value_f64(&cols[9], "taker_buy_base_volume")?,
        taker_buy_quote_volume: parse_value_f64(&cols[10], "taker_buy_quote_volume")?,
    })
}

fn parse_field_f64(body: &serde_json::Value, name: &str) -> Result<f64> {
    parse_value_f64(&body[name], name)
}

fn parse_value_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}
