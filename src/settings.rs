// =============================================================================
// Settings - gateway and session tuning knobs with atomic save
// =============================================================================
//
// Every overridable setting named by the synchronization layer lives here:
// tracked-symbol cap, heartbeat interval, reconnect delay, candle-series cap,
// outbound queue capacity, and the upstream endpoints.
//
// Persistence uses a tmp + rename pattern to prevent corruption on crash.
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older settings file.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1]
}

fn default_outbound_queue_size() -> usize {
    1000
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_max_tracked_symbols() -> usize {
    10
}

fn default_candle_series_cap() -> usize {
    100
}

fn default_symbol_refresh_interval_secs() -> u64 {
    300
}

fn default_upstream_ws_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_upstream_rest_url() -> String {
    "https://api.binance.com".to_string()
}

// =============================================================================
// Settings
// =============================================================================

/// Top-level settings for the Tickermux gateway.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // --- Server -------------------------------------------------------------

    /// Address the REST + WebSocket server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Symbols the upstream feed adapter subscribes to.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Kline timeframes the upstream feed adapter subscribes to per symbol.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,

    /// Capacity of each session's outbound message queue. When the queue is
    /// full the oldest message is dropped, never blocking the distributor.
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,

    // --- Session ------------------------------------------------------------

    /// Interval between client heartbeat pings while connected.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Fixed delay between reconnection attempts. Intentionally not
    /// exponential: worst-case reconnection latency stays bounded.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Maximum number of symbols a single client instance tracks.
    #[serde(default = "default_max_tracked_symbols")]
    pub max_tracked_symbols: usize,

    /// Maximum candles retained per (symbol, timeframe) series.
    #[serde(default = "default_candle_series_cap")]
    pub candle_series_cap: usize,

    // --- Upstream -----------------------------------------------------------

    /// Interval between symbol-directory refreshes.
    #[serde(default = "default_symbol_refresh_interval_secs")]
    pub symbol_refresh_interval_secs: u64,

    /// Upstream exchange WebSocket base URL.
    #[serde(default = "default_upstream_ws_url")]
    pub upstream_ws_url: String,

    /// Upstream exchange REST base URL.
    #[serde(default = "default_upstream_rest_url")]
    pub upstream_rest_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            symbols: default_symbols(),
            timeframes: default_timeframes(),
            outbound_queue_size: default_outbound_queue_size(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_tracked_symbols: default_max_tracked_symbols(),
            candle_series_cap: default_candle_series_cap(),
            symbol_refresh_interval_secs: default_symbol_refresh_interval_secs(),
            upstream_ws_url: default_upstream_ws_url(),
            upstream_rest_url: default_upstream_rest_url(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?settings.symbols,
            bind_addr = %settings.bind_addr,
            "settings loaded"
        );

        Ok(settings)
    }

    /// Persist the current settings to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise settings to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;

        info!(path = %path.display(), "settings saved (atomic)");
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn symbol_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.symbol_refresh_interval_secs)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_have_expected_values() {
        let s = Settings::default();
        assert_eq!(s.bind_addr, "0.0.0.0:8000");
        assert_eq!(s.symbols.len(), 5);
        assert_eq!(s.symbols[0], "BTCUSDT");
        assert_eq!(s.outbound_queue_size, 1000);
        assert_eq!(s.heartbeat_interval_secs, 30);
        assert_eq!(s.reconnect_delay_secs, 5);
        assert_eq!(s.max_tracked_symbols, 10);
        assert_eq!(s.candle_series_cap, 100);
        assert_eq!(s.timeframes, vec![
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::H1
        ]);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.max_tracked_symbols, 10);
        assert_eq!(s.candle_series_cap, 100);
        assert_eq!(s.upstream_rest_url, "https://api.binance.com");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["ETHUSDT"], "candle_series_cap": 250 }"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.symbols, vec!["ETHUSDT"]);
        assert_eq!(s.candle_series_cap, 250);
        assert_eq!(s.heartbeat_interval_secs, 30);
    }

    #[test]
    fn roundtrip_serialisation() {
        let s = Settings::default();
        let json = serde_json::to_string(&s).unwrap();
        let s2: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(s.symbols, s2.symbols);
        assert_eq!(s.timeframes, s2.timeframes);
        assert_eq!(s.outbound_queue_size, s2.outbound_queue_size);
    }
}
