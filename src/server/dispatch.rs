// =============================================================================
// Feed-event dispatcher - registry-filtered fan-out to session queues
// =============================================================================
//
// A single task consumes normalized feed events and pushes one serializable
// message per matching session. Queue pushes are non-blocking ring mutations,
// so a slow or disconnected session never delays delivery to others.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::feed::FeedEvent;
use crate::protocol::{now_ms, ServerMessage};
use crate::server::state::AppState;

/// Consume feed events until the channel closes.
pub async fn run_dispatcher(state: Arc<AppState>, mut events: mpsc::Receiver<FeedEvent>) {
    info!("feed dispatcher started");
    while let Some(event) = events.recv().await {
        dispatch_event(&state, event);
    }
    info!("feed channel closed, dispatcher stopping");
}

/// Route one event to every interested session's outbound queue.
pub fn dispatch_event(state: &AppState, event: FeedEvent) {
    let targets = state.registry.routing_targets(&event);
    if targets.is_empty() {
        return;
    }

    let msg = server_message_for(event);
    let sessions = state.session_queues();

    for session_id in &targets {
        match sessions.get(session_id) {
            Some(queue) => {
                if queue.push(msg.clone()) {
                    debug!(
                        session = %session_id,
                        dropped_total = queue.dropped_count(),
                        "outbound queue full, oldest message dropped"
                    );
                }
            }
            // Registry said this session exists but its queue is gone: the
            // session already disconnected. No-op.
            None => {
                debug!(session = %session_id, "routing target vanished, skipping");
            }
        }
    }

    state.events_dispatched.fetch_add(1, Ordering::Relaxed);
}

fn server_message_for(event: FeedEvent) -> ServerMessage {
    match event {
        FeedEvent::Price {
            symbol,
            price,
            volume,
            timestamp,
        } => ServerMessage::PriceUpdate {
            symbol,
            price,
            volume,
            timestamp,
        },
        FeedEvent::Kline {
            symbol,
            interval,
            kline,
        } => ServerMessage::KlineUpdate {
            symbol,
            interval,
            kline,
            timestamp: now_ms(),
        },
        FeedEvent::OrderBook {
            symbol,
            bids,
            asks,
        } => ServerMessage::OrderbookUpdate {
            symbol,
            bids,
            asks,
            timestamp: now_ms(),
        },
        FeedEvent::Trade {
            symbol,
            price,
            quantity,
            is_buyer_maker,
        } => ServerMessage::TradeUpdate {
            symbol,
            price,
            quantity,
            is_buyer_maker,
            timestamp: now_ms(),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::settings::Settings;
    use crate::types::Timeframe;

    fn price_event(symbol: &str, price: f64, ts: i64) -> FeedEvent {
        FeedEvent::Price {
            symbol: symbol.to_string(),
            price,
            volume: None,
            timestamp: ts,
        }
    }

    #[test]
    fn event_reaches_only_subscribed_sessions() {
        let state = AppState::new(Settings::default());
        let q1 = state.register_session("s1");
        let q2 = state.register_session("s2");

        let tfs: BTreeSet<Timeframe> = [Timeframe::M1].into_iter().collect();
        state.registry.subscribe("s1", "BTCUSDT", tfs);

        dispatch_event(&state, price_event("BTCUSDT", 37000.0, 1));

        assert_eq!(q1.len(), 1);
        assert!(q2.is_empty());
    }

    #[test]
    fn vanished_session_is_a_noop() {
        let state = AppState::new(Settings::default());

        // Subscribed in the registry but no queue registered: the session
        // already disconnected. Dispatch must not panic or deliver.
        let tfs: BTreeSet<Timeframe> = [Timeframe::M1].into_iter().collect();
        state.registry.subscribe("ghost", "BTCUSDT", tfs);

        dispatch_event(&state, price_event("BTCUSDT", 37000.0, 1));
        assert_eq!(state.events_dispatched.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn kline_routing_respects_timeframe() {
        let state = AppState::new(Settings::default());
        let q1 = state.register_session("s1");

        let tfs: BTreeSet<Timeframe> = [Timeframe::M5].into_iter().collect();
        state.registry.subscribe("s1", "BTCUSDT", tfs);

        let kline = crate::types::Candle {
            open_time: 0,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
            close_time: 59_999,
            quote_volume: 0.0,
            trades: 0,
            taker_buy_base_volume: 0.0,
            taker_buy_quote_volume: 0.0,
        };

        dispatch_event(
            &state,
            FeedEvent::Kline {
                symbol: "BTCUSDT".to_string(),
                interval: Timeframe::M1,
                kline: kline.clone(),
            },
        );
        assert!(q1.is_empty());

        dispatch_event(
            &state,
            FeedEvent::Kline {
                symbol: "BTCUSDT".to_string(),
                interval: Timeframe::M5,
                kline,
            },
        );
        assert_eq!(q1.len(), 1);
    }
}
