// =============================================================================
// Subscription Registry - who gets what
// =============================================================================
//
// Server-side source of truth mapping each session to its (symbol,
// timeframes) subscriptions, with a reverse index from symbol to interested
// sessions for O(1) amortized routing lookups. Both maps are kept consistent
// under a single readers-writer lock on every mutation; no I/O happens here.
// =============================================================================

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;
use serde::Serialize;

use crate::feed::FeedEvent;
use crate::types::Timeframe;

#[derive(Default)]
struct RegistryInner {
    /// session -> symbol -> subscribed timeframes
    by_session: HashMap<String, HashMap<String, BTreeSet<Timeframe>>>,
    /// symbol -> sessions interested in it
    by_symbol: HashMap<String, HashSet<String>>,
}

/// One session's subscriptions, as reported by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSubscriptions {
    pub session_id: String,
    pub subscriptions: Vec<SymbolSubscription>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolSubscription {
    pub symbol: String,
    pub timeframes: Vec<Timeframe>,
}

pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register (or replace) the subscription for `session_id` + `symbol`.
    /// Subscribing again with a new timeframe set replaces, never duplicates.
    pub fn subscribe(&self, session_id: &str, symbol: &str, timeframes: BTreeSet<Timeframe>) {
        let mut inner = self.inner.write();

        inner
            .by_session
            .entry(session_id.to_string())
            .or_default()
            .insert(symbol.to_string(), timeframes);

        inner
            .by_symbol
            .entry(symbol.to_string())
            .or_default()
            .insert(session_id.to_string());
    }

    /// Remove the subscription for `session_id` + `symbol`.
    /// Returns whether a subscription existed.
    pub fn unsubscribe(&self, session_id: &str, symbol: &str) -> bool {
        let mut inner = self.inner.write();

        let existed = inner
            .by_session
            .get_mut(session_id)
            .map(|subs| subs.remove(symbol).is_some())
            .unwrap_or(false);

        if existed {
            if let Some(sessions) = inner.by_symbol.get_mut(symbol) {
                sessions.remove(session_id);
                if sessions.is_empty() {
                    inner.by_symbol.remove(symbol);
                }
            }
        }

        existed
    }

    /// Remove every subscription for a disconnecting session.
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe_all(&self, session_id: &str) -> usize {
        let mut inner = self.inner.write();

        let Some(subs) = inner.by_session.remove(session_id) else {
            return 0;
        };

        for symbol in subs.keys() {
            if let Some(sessions) = inner.by_symbol.get_mut(symbol) {
                sessions.remove(session_id);
                if sessions.is_empty() {
                    inner.by_symbol.remove(symbol);
                }
            }
        }

        subs.len()
    }

    /// Sessions that should receive `event`. For kline events the session's
    /// subscribed timeframe set must also contain the event's interval.
    pub fn routing_targets(&self, event: &FeedEvent) -> Vec<String> {
        let inner = self.inner.read();

        let Some(sessions) = inner.by_symbol.get(event.symbol()) else {
            return Vec::new();
        };

        match event {
            FeedEvent::Kline {
                symbol, interval, ..
            } => sessions
                .iter()
                .filter(|sid| {
                    inner
                        .by_session
                        .get(*sid)
                        .and_then(|subs| subs.get(symbol))
                        .is_some_and(|tfs| tfs.contains(interval))
                })
                .cloned()
                .collect(),
            _ => sessions.iter().cloned().collect(),
        }
    }

    /// Number of subscriptions held by one session.
    pub fn subscription_count(&self, session_id: &str) -> usize {
        self.inner
            .read()
            .by_session
            .get(session_id)
            .map_or(0, HashMap::len)
    }

    /// Total subscriptions across all sessions.
    pub fn total_subscriptions(&self) -> usize {
        self.inner.read().by_session.values().map(HashMap::len).sum()
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().by_session.len()
    }

    /// Full subscription listing for the status endpoint, sorted for
    /// deterministic output.
    pub fn summary(&self) -> Vec<SessionSubscriptions> {
        let inner = self.inner.read();

        let mut sessions: Vec<SessionSubscriptions> = inner
            .by_session
            .iter()
            .map(|(sid, subs)| {
                let mut subscriptions: Vec<SymbolSubscription> = subs
                    .iter()
                    .map(|(symbol, tfs)| SymbolSubscription {
                        symbol: symbol.clone(),
                        timeframes: tfs.iter().copied().collect(),
                    })
                    .collect();
                subscriptions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
                SessionSubscriptions {
                    session_id: sid.clone(),
                    subscriptions,
                }
            })
            .collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
