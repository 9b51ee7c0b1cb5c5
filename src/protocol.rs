// =============================================================================
// Control-plane wire protocol between a session and the distribution endpoint
// =============================================================================
//
// JSON-serialized, internally tagged on `type`. Every message carries a
// millisecond epoch `timestamp`.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Candle, Timeframe};

/// Current wall-clock time as milliseconds since the UNIX epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Client -> server
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the session's subscription for `symbol` with `timeframes`.
    Subscribe {
        symbol: String,
        timeframes: Vec<Timeframe>,
        timestamp: i64,
    },
    /// Drop the session's subscription for `symbol`.
    Unsubscribe { symbol: String, timestamp: i64 },
    /// Heartbeat. Keeps intermediaries from closing an idle connection;
    /// the server answers `pong` without touching the registry.
    Ping { timestamp: i64 },
}

impl ClientMessage {
    pub fn subscribe(symbol: impl Into<String>, timeframes: Vec<Timeframe>) -> Self {
        Self::Subscribe {
            symbol: symbol.into(),
            timeframes,
            timestamp: now_ms(),
        }
    }

    pub fn unsubscribe(symbol: impl Into<String>) -> Self {
        Self::Unsubscribe {
            symbol: symbol.into(),
            timestamp: now_ms(),
        }
    }

    pub fn ping() -> Self {
        Self::Ping {
            timestamp: now_ms(),
        }
    }
}

// =============================================================================
// Server -> client
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges a `subscribe`, so the client can distinguish an accepted
    /// subscription from one lost in transit. One ack per request; the ack
    /// itself is not deduplicated.
    SubscriptionConfirmed {
        symbol: String,
        timeframes: Vec<Timeframe>,
        timestamp: i64,
    },
    UnsubscriptionConfirmed { symbol: String, timestamp: i64 },
    Pong { timestamp: i64 },
    PriceUpdate {
        symbol: String,
        price: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<f64>,
        timestamp: i64,
    },
    KlineUpdate {
        symbol: String,
        interval: Timeframe,
        kline: Candle,
        timestamp: i64,
    },
    OrderbookUpdate {
        symbol: String,
        bids: Vec<[f64; 2]>,
        asks: Vec<[f64; 2]>,
        timestamp: i64,
    },
    TradeUpdate {
        symbol: String,
        price: f64,
        quantity: f64,
        is_buyer_maker: bool,
        timestamp: i64,
    },
}

impl ServerMessage {
    /// The symbol a data message concerns, if any.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::SubscriptionConfirmed { symbol, .. }
            | Self::UnsubscriptionConfirmed { symbol, .. }
            | Self::PriceUpdate { symbol, .. }
            | Self::KlineUpdate { symbol, .. }
            | Self::OrderbookUpdate { symbol, .. }
            | Self::TradeUpdate { symbol, .. } => Some(symbol),
            Self::Pong { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_wire_shape() {
        let msg = ClientMessage::Subscribe {
            symbol: "BTCUSDT".into(),
            timeframes: vec![Timeframe::M1, Timeframe::H1],
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"subscribe\""));
        assert!(json.contains("\"timeframes\":[\"1m\",\"1h\"]"));

        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn pong_parses_from_raw_json() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"pong","timestamp":1700000000000}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Pong {
                timestamp: 1_700_000_000_000
            }
        );
    }

    #[test]
    fn kline_update_roundtrip() {
        let msg = ServerMessage::KlineUpdate {
            symbol: "ETHUSDT".into(),
            interval: Timeframe::M5,
            kline: Candle {
                open_time: 1_700_000_000_000,
                open: 2000.0,
                high: 2010.0,
                low: 1995.0,
                close: 2005.0,
                volume: 12.5,
                close_time: 1_700_000_299_999,
                quote_volume: 25_000.0,
                trades: 42,
                taker_buy_base_volume: 6.0,
                taker_buy_quote_volume: 12_000.0,
            },
            timestamp: 1_700_000_000_500,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"kline_update\""));
        assert!(json.contains("\"interval\":\"5m\""));
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn price_update_omits_missing_volume() {
        let msg = ServerMessage::PriceUpdate {
            symbol: "BTCUSDT".into(),
            price: 37000.0,
            volume: None,
            timestamp: 1,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("volume"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_str::<ClientMessage>(
            r#"{"type":"resubscribe","symbol":"BTCUSDT","timestamp":1}"#,
        );
        assert!(err.is_err());
    }
}
