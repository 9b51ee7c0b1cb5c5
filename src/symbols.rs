// =============================================================================
// Symbol directory - exchange symbol metadata, periodically refreshed
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::feed::UpstreamRestClient;
use crate::types::SymbolInfo;

/// In-memory map of symbol metadata. The synchronization core only reads it;
/// the refresh loop is the single writer.
pub struct SymbolDirectory {
    symbols: RwLock<HashMap<String, SymbolInfo>>,
}

impl SymbolDirectory {
    pub fn new() -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the entire directory with a fresh listing.
    pub fn replace_all(&self, infos: Vec<SymbolInfo>) {
        let mut map = self.symbols.write();
        map.clear();
        for info in infos {
            map.insert(info.symbol.clone(), info);
        }
    }

    pub fn get(&self, symbol: &str) -> Option<SymbolInfo> {
        self.symbols.read().get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains_key(symbol)
    }

    /// All known symbols, sorted by name.
    pub fn all(&self) -> Vec<SymbolInfo> {
        let mut infos: Vec<SymbolInfo> = self.symbols.read().values().cloned().collect();
        infos.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        infos
    }

    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

impl Default for SymbolDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Refresh the directory from the upstream exchange on a fixed interval.
/// The first refresh happens immediately on startup.
pub async fn run_refresh_loop(
    directory: Arc<SymbolDirectory>,
    upstream: UpstreamRestClient,
    refresh_interval: Duration,
) {
    let mut interval = tokio::time::interval(refresh_interval);
    loop {
        interval.tick().await;
        match upstream.exchange_info().await {
            Ok(infos) => {
                let count = infos.len();
                directory.replace_all(infos);
                info!(symbols = count, "symbol directory refreshed");
            }
            Err(e) => {
                warn!(error = %e, "symbol directory refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(symbol: &str) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.to_string(),
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            quote_asset: "USDT".to_string(),
            status: "TRADING".to_string(),
            is_spot_trading_allowed: true,
        }
    }

    #[test]
    fn replace_all_swaps_contents() {
        let dir = SymbolDirectory::new();
        dir.replace_all(vec![info("BTCUSDT"), info("ETHUSDT")]);
        assert_eq!(dir.len(), 2);
        assert!(dir.contains("BTCUSDT"));

        dir.replace_all(vec![info("SOLUSDT")]);
        assert_eq!(dir.len(), 1);
        assert!(!dir.contains("BTCUSDT"));
        assert!(dir.contains("SOLUSDT"));
    }

    #[test]
    fn all_is_sorted() {
        let dir = SymbolDirectory::new();
        dir.replace_all(vec![info("SOLUSDT"), info("BTCUSDT"), info("ETHUSDT")]);
        let names: Vec<String> = dir.all().into_iter().map(|i| i.symbol).collect();
        assert_eq!(names, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    }
}
