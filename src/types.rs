// =============================================================================
// Shared market-data types used across the Tickermux gateway
// =============================================================================

use serde::{Deserialize, Serialize};

/// Candle timeframe. Fixed enumerated set; only set-membership is meaningful,
/// the `Ord` derive exists so timeframe sets iterate deterministically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// All supported timeframes.
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// The wire representation, e.g. `"1m"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

/// A single OHLCV candle.
///
/// `open_time` is the unique key within a (symbol, timeframe) series: an
/// incoming candle with a matching `open_time` overwrites the stored one in
/// place (the still-forming bar), a new `open_time` appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
    pub quote_volume: f64,
    pub trades: u64,
    pub taker_buy_base_volume: f64,
    pub taker_buy_quote_volume: f64,
}

/// Current-state summary for a symbol: last price plus 24h statistics.
///
/// At most one live instance per symbol per session. `timestamp` (ms epoch)
/// is monotonically non-decreasing within a session; events that would move
/// it backwards are discarded by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_24h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_24h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_change_24h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_change_percent_24h: Option<f64>,
    pub timestamp: i64,
}

/// Descriptive symbol metadata sourced from the upstream exchange.
///
/// Refreshed periodically by the symbol directory; never mutated by the
/// synchronization core itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub status: String,
    #[serde(default)]
    pub is_spot_trading_allowed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_wire_names_roundtrip() {
        for tf in Timeframe::ALL {
            let parsed: Timeframe = tf.as_str().parse().unwrap();
            assert_eq!(parsed, tf);
            let json = serde_json::to_string(&tf).unwrap();
            assert_eq!(json, format!("\"{}\"", tf.as_str()));
        }
    }

    #[test]
    fn timeframe_rejects_unknown() {
        assert!("2m".parse::<Timeframe>().is_err());
        assert!("".parse::<Timeframe>().is_err());
    }

    #[test]
    fn snapshot_omits_missing_stats() {
        let snap = MarketSnapshot {
            symbol: "BTCUSDT".into(),
            price: 37000.0,
            volume_24h: None,
            high_24h: None,
            low_24h: None,
            price_change_24h: None,
            price_change_percent_24h: None,
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(!json.contains("volume_24h"));
        assert!(json.contains("\"price\":37000.0"));
    }
}
