// =============================================================================
// Symbol tracker - bounds how many symbols one client instance follows
// =============================================================================
//
// Tracking a symbol issues a subscribe through the connection manager;
// releasing it issues an unsubscribe. The cap is enforced here, before any
// subscription happens, and is the only synchronous caller-visible failure
// in the synchronization layer. Removing the last tracked symbol is allowed;
// any minimum-one-symbol rule is a presentation concern.
// =============================================================================

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use tracing::debug;

use crate::client::connection::ConnectionHandle;
use crate::error::SyncError;
use crate::types::Timeframe;

/// Handle to one tracked symbol, returned by [`SymbolTracker::add_symbol`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolHandle {
    symbol: String,
}

impl SymbolHandle {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

pub struct SymbolTracker {
    limit: usize,
    conn: ConnectionHandle,
    tracked: Mutex<HashMap<String, BTreeSet<Timeframe>>>,
}

impl SymbolTracker {
    pub fn new(limit: usize, conn: ConnectionHandle) -> Self {
        Self {
            limit: limit.max(1),
            conn,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking `symbol` with the given timeframes.
    ///
    /// Idempotent for an already-tracked symbol: the timeframe set is
    /// updated, the subscription re-issued, and the existing handle returned
    /// without consuming another slot. At the cap this fails with
    /// `LimitExceeded` and performs no subscription.
    pub fn add_symbol(
        &self,
        symbol: &str,
        timeframes: BTreeSet<Timeframe>,
    ) -> Result<SymbolHandle, SyncError> {
        {
            let mut tracked = self.tracked.lock();

            if let Some(existing) = tracked.get_mut(symbol) {
                *existing = timeframes.clone();
                debug!(symbol = %symbol, "symbol already tracked, updating timeframes");
            } else {
                if tracked.len() >= self.limit {
                    return Err(SyncError::LimitExceeded(self.limit));
                }
                tracked.insert(symbol.to_string(), timeframes.clone());
            }
        }

        self.conn.subscribe(symbol, timeframes);
        Ok(SymbolHandle {
            symbol: symbol.to_string(),
        })
    }

    /// Stop tracking the symbol behind `handle` and release its slot.
    pub fn remove_symbol(&self, handle: &SymbolHandle) {
        let removed = self.tracked.lock().remove(&handle.symbol).is_some();
        if removed {
            self.conn.unsubscribe(handle.symbol.clone());
        }
    }

    /// Currently tracked symbols, sorted.
    pub fn tracked_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.tracked.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn timeframes(&self, symbol: &str) -> Option<BTreeSet<Timeframe>> {
        self.tracked.lock().get(symbol).cloned()
    }

    pub fn len(&self) -> usize {
        self.tracked.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.lock().is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::connection::Command;

    fn tfs(list: &[Timeframe]) -> BTreeSet<Timeframe> {
        list.iter().copied().collect()
    }

    #[test]
    fn cap_is_enforced_on_the_extra_symbol() {
        let (conn, _cmd_rx) = ConnectionHandle::detached();
        let tracker = SymbolTracker::new(3, conn);

        for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
            tracker.add_symbol(symbol, tfs(&[Timeframe::M1])).unwrap();
        }

        let err = tracker
            .add_symbol("XRPUSDT", tfs(&[Timeframe::M1]))
            .unwrap_err();
        assert!(matches!(err, SyncError::LimitExceeded(3)));
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn re_adding_at_cap_is_idempotent() {
        let (conn, _cmd_rx) = ConnectionHandle::detached();
        let tracker = SymbolTracker::new(2, conn);

        tracker.add_symbol("BTCUSDT", tfs(&[Timeframe::M1])).unwrap();
        tracker.add_symbol("ETHUSDT", tfs(&[Timeframe::M1])).unwrap();

        // Already tracked: no extra slot consumed, timeframes updated.
        let handle = tracker
            .add_symbol("BTCUSDT", tfs(&[Timeframe::M5, Timeframe::H1]))
            .unwrap();
        assert_eq!(handle.symbol(), "BTCUSDT");
        assert_eq!(tracker.len(), 2);
        assert_eq!(
            tracker.timeframes("BTCUSDT"),
            Some(tfs(&[Timeframe::M5, Timeframe::H1]))
        );
    }

    #[test]
    fn remove_frees_a_slot() {
        let (conn, _cmd_rx) = ConnectionHandle::detached();
        let tracker = SymbolTracker::new(1, conn);

        let handle = tracker.add_symbol("BTCUSDT", tfs(&[Timeframe::M1])).unwrap();
        assert!(tracker.add_symbol("ETHUSDT", tfs(&[Timeframe::M1])).is_err());

        tracker.remove_symbol(&handle);
        assert!(tracker.is_empty());
        assert!(tracker.add_symbol("ETHUSDT", tfs(&[Timeframe::M1])).is_ok());
    }

    #[tokio::test]
    async fn add_and_remove_issue_connection_commands() {
        let (conn, mut cmd_rx) = ConnectionHandle::detached();
        let tracker = SymbolTracker::new(5, conn);

        let handle = tracker
            .add_symbol("BTCUSDT", tfs(&[Timeframe::M1, Timeframe::H1]))
            .unwrap();
        tracker.remove_symbol(&handle);

        match cmd_rx.recv().await.unwrap() {
            Command::Subscribe { symbol, timeframes } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(timeframes, tfs(&[Timeframe::M1, Timeframe::H1]));
            }
            _ => panic!("expected subscribe command"),
        }
        match cmd_rx.recv().await.unwrap() {
            Command::Unsubscribe { symbol } => assert_eq!(symbol, "BTCUSDT"),
            _ => panic!("expected unsubscribe command"),
        }
    }

    #[test]
    fn rejected_symbol_sends_no_command() {
        let (conn, mut cmd_rx) = ConnectionHandle::detached();
        let tracker = SymbolTracker::new(1, conn);

        tracker.add_symbol("BTCUSDT", tfs(&[Timeframe::M1])).unwrap();
        let _ = tracker.add_symbol("ETHUSDT", tfs(&[Timeframe::M1]));

        // Only the accepted symbol's subscribe is on the channel.
        assert!(matches!(
            cmd_rx.try_recv(),
            Ok(Command::Subscribe { symbol, .. }) if symbol == "BTCUSDT"
        ));
        assert!(cmd_rx.try_recv().is_err());
    }

    #[test]
    fn removing_the_last_symbol_is_allowed() {
        let (conn, _cmd_rx) = ConnectionHandle::detached();
        let tracker = SymbolTracker::new(3, conn);

        let handle = tracker.add_symbol("BTCUSDT", tfs(&[Timeframe::M1])).unwrap();
        tracker.remove_symbol(&handle);
        assert!(tracker.is_empty());
    }
}
